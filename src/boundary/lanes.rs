//! 请求分道：同一会话的请求按到达顺序逐个处理，不同会话、不同助手之间并行
//!
//! 每个助手一条分道（tokio 任务 + mpsc），按顺序执行助手级请求，会话级请求转交给该会话自己的分道。
//! 助手级请求执行前先等该助手下所有会话分道排空，所以 put_assistant、put_conversation、
//! post_conversation_event 依次提交时，服务看到的也是这个顺序。
//! service_info 与无法解析的行不排队。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};

use super::{handle_request, parse_line, HostOperation, HostRequest, HostResponse};
use crate::app::AssistantService;

enum Lane {
    Service,
    Assistant(String),
    Conversation {
        assistant_id: String,
        conversation_id: String,
    },
}

fn lane_of(op: &HostOperation) -> Lane {
    match op {
        HostOperation::ServiceInfo => Lane::Service,
        HostOperation::PutAssistant { assistant_id, .. }
        | HostOperation::DeleteAssistant { assistant_id }
        | HostOperation::GetConfig { assistant_id }
        | HostOperation::PutConfig { assistant_id, .. }
        | HostOperation::ExportAssistant { assistant_id } => Lane::Assistant(assistant_id.clone()),
        HostOperation::PutConversation {
            assistant_id,
            conversation_id,
            ..
        }
        | HostOperation::DeleteConversation {
            assistant_id,
            conversation_id,
        }
        | HostOperation::ListInspectors {
            assistant_id,
            conversation_id,
        }
        | HostOperation::GetInspectorState {
            assistant_id,
            conversation_id,
            ..
        }
        | HostOperation::ExportConversation {
            assistant_id,
            conversation_id,
        } => Lane::Conversation {
            assistant_id: assistant_id.clone(),
            conversation_id: conversation_id.clone(),
        },
        HostOperation::PostConversationEvent { assistant_id, event } => Lane::Conversation {
            assistant_id: assistant_id.clone(),
            conversation_id: event.conversation_id.clone(),
        },
    }
}

enum AssistantJob {
    Assistant(HostRequest),
    Conversation(String, HostRequest),
}

enum ConversationJob {
    Request(HostRequest),
    /// 之前排队的请求都处理完后回复
    Drain(oneshot::Sender<()>),
}

type Responses = mpsc::Sender<HostResponse>;

async fn respond(responses: &Responses, response: HostResponse) {
    if let Err(e) = responses.send(response).await {
        tracing::warn!(request_id = ?e.0.id, "response dropped, writer is gone");
    }
}

async fn respond_lost(responses: &Responses, request: HostRequest) {
    let err = anyhow::anyhow!("request lane stopped before handling the request");
    tracing::error!(request_id = ?request.id, "request lane stopped");
    respond(responses, HostResponse::fault(request.id, &err)).await;
}

/// 按助手 / 会话分道的请求派发器，响应经由 `responses` 送出（不保证跨分道的顺序）
pub struct RequestLanes {
    service: Arc<AssistantService>,
    responses: Responses,
    assistants: HashMap<String, mpsc::UnboundedSender<AssistantJob>>,
}

impl RequestLanes {
    pub fn new(service: Arc<AssistantService>, responses: mpsc::Sender<HostResponse>) -> Self {
        Self {
            service,
            responses,
            assistants: HashMap::new(),
        }
    }

    /// 解析一行并派发；无法解析的行直接回复 400
    pub async fn submit_line(&mut self, line: &str) {
        match parse_line(line) {
            Ok(request) => self.submit(request).await,
            Err(response) => respond(&self.responses, response).await,
        }
    }

    pub async fn submit(&mut self, request: HostRequest) {
        let (assistant_id, job) = match lane_of(&request.op) {
            Lane::Service => {
                let service = Arc::clone(&self.service);
                let responses = self.responses.clone();
                tokio::spawn(async move {
                    let response = handle_request(&service, request).await;
                    respond(&responses, response).await;
                });
                return;
            }
            Lane::Assistant(assistant_id) => (assistant_id, AssistantJob::Assistant(request)),
            Lane::Conversation {
                assistant_id,
                conversation_id,
            } => (assistant_id, AssistantJob::Conversation(conversation_id, request)),
        };

        let lane = self
            .assistants
            .entry(assistant_id.clone())
            .or_insert_with(|| spawn_assistant_lane(Arc::clone(&self.service), self.responses.clone()));
        if let Err(mpsc::error::SendError(job)) = lane.send(job) {
            self.assistants.remove(&assistant_id);
            let request = match job {
                AssistantJob::Assistant(request) | AssistantJob::Conversation(_, request) => request,
            };
            respond_lost(&self.responses, request).await;
        }
    }
}

fn spawn_assistant_lane(service: Arc<AssistantService>, responses: Responses) -> mpsc::UnboundedSender<AssistantJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AssistantJob>();
    tokio::spawn(async move {
        let mut conversations: HashMap<String, mpsc::UnboundedSender<ConversationJob>> = HashMap::new();
        while let Some(job) = rx.recv().await {
            match job {
                AssistantJob::Conversation(conversation_id, request) => {
                    let deleting = matches!(request.op, HostOperation::DeleteConversation { .. });
                    let lane = conversations
                        .entry(conversation_id.clone())
                        .or_insert_with(|| spawn_conversation_lane(Arc::clone(&service), responses.clone()));
                    if let Err(mpsc::error::SendError(job)) = lane.send(ConversationJob::Request(request)) {
                        conversations.remove(&conversation_id);
                        if let ConversationJob::Request(request) = job {
                            respond_lost(&responses, request).await;
                        }
                        continue;
                    }
                    if deleting {
                        // 删除完成后才释放分道，同 ID 的后续请求不会越过它
                        if let Some(lane) = conversations.remove(&conversation_id) {
                            drain([&lane]).await;
                        }
                    }
                }
                AssistantJob::Assistant(request) => {
                    drain(conversations.values()).await;
                    let deleting = matches!(request.op, HostOperation::DeleteAssistant { .. });
                    let response = handle_request(&service, request).await;
                    respond(&responses, response).await;
                    if deleting {
                        conversations.clear();
                    }
                }
            }
        }
    });
    tx
}

fn spawn_conversation_lane(service: Arc<AssistantService>, responses: Responses) -> mpsc::UnboundedSender<ConversationJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ConversationJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                ConversationJob::Request(request) => {
                    let response = handle_request(&service, request).await;
                    respond(&responses, response).await;
                }
                ConversationJob::Drain(done) => {
                    if done.send(()).is_err() {
                        tracing::debug!("drain waiter went away");
                    }
                }
            }
        }
    });
    tx
}

/// 等给定分道里已排队的请求全部处理完
async fn drain<'a>(lanes: impl IntoIterator<Item = &'a mpsc::UnboundedSender<ConversationJob>>) {
    let waits: Vec<_> = lanes
        .into_iter()
        .filter_map(|lane| {
            let (done, wait) = oneshot::channel();
            lane.send(ConversationJob::Drain(done)).ok().map(|_| wait)
        })
        .collect();
    join_all(waits).await;
}
