//! hive - Rust 助手服务宿主
//!
//! 模块划分：
//! - **app**: `AssistantApp` 构建器与 `AssistantService`（助手/会话生命周期、事件受理）
//! - **assistant_config**: 带密钥打码的配置 provider，schema / UI schema 推导与校验
//! - **boundary**: JSON 请求信封、一次性错误翻译与按会话分道的请求派发
//! - **config**: 宿主配置加载（TOML + 环境变量）
//! - **core**: 错误分类、错误翻译、助手与会话上下文
//! - **events**: 会话事件类型、事件日志、处理器与两阶段路由
//! - **inspector**: 会话检查器注册表与内置事件日志检查器
//! - **observability**: 日志初始化
//! - **safety**: 内容安全评估（分块、并发、阈值聚合）与 HTTP 后端
//! - **storage**: 会话持久状态（状态树、存储后端、导出/导入）

pub mod app;
pub mod assistant_config;
pub mod boundary;
pub mod config;
pub mod core;
pub mod events;
pub mod inspector;
pub mod observability;
pub mod safety;
pub mod storage;

pub use app::{AssistantApp, AssistantService};
