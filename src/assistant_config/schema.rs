//! 基于 schemars RootSchema 的配置遍历：校验、密钥打码 / 还原、UI schema 推导
//!
//! 密钥字段的判定：解析 `$ref` 后 `format = "password"` 且 `writeOnly`（或某个 allOf 成员如此）。
//! anyOf / oneOf 按能通过校验的第一个分支继续遍历。

use schemars::schema::{
    ArrayValidation, InstanceType, NumberValidation, ObjectValidation, RootSchema, Schema, SchemaObject,
    SingleOrVec, StringValidation,
};
use serde_json::{json, Map, Value};

use super::secret::{self, SecretUpdate};
use crate::core::FieldError;

const DEFINITIONS_PREFIX: &str = "#/definitions/";
const MAX_DEPTH: usize = 32;

/// 校验 value，返回所有不合法字段
pub fn validate(root: &RootSchema, value: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();
    SchemaWalker::new(root).check_object(&root.schema, value, "", &mut errors);
    errors
}

/// 非空密钥字段替换为掩码
pub fn redact(root: &RootSchema, value: &mut Value) {
    SchemaWalker::new(root).redact_object(&root.schema, value, 0);
}

/// 把提交值中的掩码还原为 stored 中对应位置的明文
pub fn restore_secrets(root: &RootSchema, value: &mut Value, stored: Option<&Value>) {
    SchemaWalker::new(root).restore_object(&root.schema, value, stored, 0);
}

/// UI schema：顶层分区隐藏标题，密钥字段使用 password 控件，再叠加各分区的自定义 UI
pub fn ui_schema(root: &RootSchema, overrides: &[(&str, Value)]) -> Value {
    let walker = SchemaWalker::new(root);
    let mut ui = Map::new();
    if let Some(object) = &root.schema.object {
        for key in object.properties.keys() {
            ui.insert(key.clone(), json!({ "ui:options": { "hide_title": true } }));
        }
    }
    walker.collect_ui(&root.schema, &mut ui, 0);

    let mut ui = Value::Object(ui);
    for (section, overlay) in overrides {
        if let Some(target) = ui.get_mut(*section) {
            merge_json(target, overlay);
        }
    }
    ui
}

/// 深度合并：对象逐键合并，其余类型由 overlay 覆盖
pub fn merge_json(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn index_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "$"
    } else {
        path
    }
}

fn instance_matches(instance: &InstanceType, value: &Value) -> bool {
    match instance {
        InstanceType::Null => value.is_null(),
        InstanceType::Boolean => value.is_boolean(),
        InstanceType::Object => value.is_object(),
        InstanceType::Array => value.is_array(),
        InstanceType::Number => value.is_number(),
        InstanceType::String => value.is_string(),
        InstanceType::Integer => value.is_i64() || value.is_u64(),
    }
}

fn instance_name(instance: &InstanceType) -> &'static str {
    match instance {
        InstanceType::Null => "null",
        InstanceType::Boolean => "boolean",
        InstanceType::Object => "object",
        InstanceType::Array => "array",
        InstanceType::Number => "number",
        InstanceType::String => "string",
        InstanceType::Integer => "integer",
    }
}

fn type_error(types: &SingleOrVec<InstanceType>, value: &Value) -> Option<String> {
    let (matches, expected) = match types {
        SingleOrVec::Single(instance) => (instance_matches(instance, value), instance_name(instance).to_string()),
        SingleOrVec::Vec(instances) => (
            instances.iter().any(|i| instance_matches(i, value)),
            instances.iter().map(instance_name).collect::<Vec<_>>().join(" or "),
        ),
    };
    (!matches).then(|| format!("expected {expected}"))
}

struct SchemaWalker<'a> {
    root: &'a RootSchema,
}

impl<'a> SchemaWalker<'a> {
    fn new(root: &'a RootSchema) -> Self {
        Self { root }
    }

    /// 沿 `$ref` 找到定义；找不到时返回自身
    fn deref(&self, mut object: &'a SchemaObject) -> &'a SchemaObject {
        for _ in 0..MAX_DEPTH {
            let Some(name) = object
                .reference
                .as_deref()
                .and_then(|r| r.strip_prefix(DEFINITIONS_PREFIX))
            else {
                break;
            };
            match self.root.definitions.get(name) {
                Some(Schema::Object(target)) => object = target,
                _ => break,
            }
        }
        object
    }

    fn is_secret(&self, object: &'a SchemaObject) -> bool {
        let object = self.deref(object);
        let write_only = object.metadata.as_ref().map_or(false, |m| m.write_only);
        if object.format.as_deref() == Some("password") && write_only {
            return true;
        }
        object
            .subschemas
            .as_ref()
            .and_then(|s| s.all_of.as_ref())
            .map_or(false, |all_of| {
                all_of.iter().any(|member| match member {
                    Schema::Object(member) => self.is_secret(member),
                    Schema::Bool(_) => false,
                })
            })
    }

    fn check(&self, schema: &'a Schema, value: &Value, path: &str, errors: &mut Vec<FieldError>) {
        match schema {
            Schema::Bool(true) => {}
            Schema::Bool(false) => errors.push(FieldError::new(display_path(path), "value not permitted")),
            Schema::Object(object) => self.check_object(object, value, path, errors),
        }
    }

    fn check_object(&self, object: &'a SchemaObject, value: &Value, path: &str, errors: &mut Vec<FieldError>) {
        let object = self.deref(object);

        if let Some(types) = &object.instance_type {
            if let Some(message) = type_error(types, value) {
                errors.push(FieldError::new(display_path(path), message));
                return;
            }
        }
        if let Some(allowed) = &object.enum_values {
            if !allowed.contains(value) {
                errors.push(FieldError::new(
                    display_path(path),
                    format!("value must be one of {}", Value::Array(allowed.clone())),
                ));
                return;
            }
        }
        if let Some(expected) = &object.const_value {
            if expected != value {
                errors.push(FieldError::new(display_path(path), format!("value must be {expected}")));
                return;
            }
        }

        if let Some(subschemas) = &object.subschemas {
            if let Some(all_of) = &subschemas.all_of {
                for member in all_of {
                    self.check(member, value, path, errors);
                }
            }
            for variants in [&subschemas.any_of, &subschemas.one_of].into_iter().flatten() {
                if let Some(best) = self.closest_variant_errors(variants, value, path) {
                    errors.extend(best);
                }
            }
        }

        match value {
            Value::Number(number) => {
                if let (Some(rules), Some(number)) = (&object.number, number.as_f64()) {
                    check_number(rules, number, path, errors);
                }
            }
            Value::String(text) => {
                if let Some(rules) = &object.string {
                    check_string(rules, text, path, errors);
                }
            }
            Value::Array(items) => {
                if let Some(rules) = &object.array {
                    self.check_array(rules, items, path, errors);
                }
            }
            Value::Object(map) => {
                if let Some(rules) = &object.object {
                    self.check_map(rules, map, path, errors);
                }
            }
            _ => {}
        }
    }

    /// 有分支通过时返回 None，否则返回错误最少的分支的错误
    fn closest_variant_errors(&self, variants: &'a [Schema], value: &Value, path: &str) -> Option<Vec<FieldError>> {
        let mut candidates: Vec<&'a Schema> = variants
            .iter()
            .filter(|variant| self.discriminator_matches(variant, value))
            .collect();
        if candidates.is_empty() {
            candidates = variants.iter().collect();
        }

        let mut closest: Option<Vec<FieldError>> = None;
        for variant in candidates {
            let mut errors = Vec::new();
            self.check(variant, value, path, &mut errors);
            if errors.is_empty() {
                return None;
            }
            if closest.as_ref().map_or(true, |c| errors.len() < c.len()) {
                closest = Some(errors);
            }
        }
        closest
    }

    /// 分支中取值固定的属性（如 serde 标签）与 value 不一致时返回 false
    fn discriminator_matches(&self, variant: &'a Schema, value: &Value) -> bool {
        let (Schema::Object(variant), Value::Object(map)) = (variant, value) else {
            return true;
        };
        let Some(rules) = &self.deref(variant).object else {
            return true;
        };
        rules.properties.iter().all(|(key, property)| {
            let (Schema::Object(property), Some(actual)) = (property, map.get(key)) else {
                return true;
            };
            let property = self.deref(property);
            match (&property.const_value, &property.enum_values) {
                (Some(expected), _) => expected == actual,
                (None, Some(allowed)) if allowed.len() == 1 => allowed[0] == *actual,
                _ => true,
            }
        })
    }

    fn matching_variant(&self, variants: &'a [Schema], value: &Value) -> Option<&'a Schema> {
        variants.iter().find(|variant| {
            let mut errors = Vec::new();
            self.check(variant, value, "", &mut errors);
            errors.is_empty()
        })
    }

    fn check_array(&self, rules: &'a ArrayValidation, items: &[Value], path: &str, errors: &mut Vec<FieldError>) {
        if let Some(min) = rules.min_items {
            if items.len() < min as usize {
                errors.push(FieldError::new(display_path(path), format!("expected at least {min} items")));
            }
        }
        if let Some(max) = rules.max_items {
            if items.len() > max as usize {
                errors.push(FieldError::new(display_path(path), format!("expected at most {max} items")));
            }
        }
        match &rules.items {
            Some(SingleOrVec::Single(schema)) => {
                for (index, item) in items.iter().enumerate() {
                    self.check(schema, item, &index_path(path, index), errors);
                }
            }
            Some(SingleOrVec::Vec(schemas)) => {
                for (index, (schema, item)) in schemas.iter().zip(items).enumerate() {
                    self.check(schema, item, &index_path(path, index), errors);
                }
            }
            None => {}
        }
    }

    fn check_map(&self, rules: &'a ObjectValidation, map: &Map<String, Value>, path: &str, errors: &mut Vec<FieldError>) {
        for key in &rules.required {
            if !map.contains_key(key) {
                errors.push(FieldError::new(child_path(path, key), "field required"));
            }
        }
        for (key, value) in map {
            let field = child_path(path, key);
            match (rules.properties.get(key), rules.additional_properties.as_deref()) {
                (Some(schema), _) => self.check(schema, value, &field, errors),
                (None, Some(Schema::Bool(false))) => {
                    errors.push(FieldError::new(field, "extra field not permitted"));
                }
                (None, Some(schema)) => self.check(schema, value, &field, errors),
                (None, None) => {}
            }
        }
    }

    fn property_schema(rules: &'a ObjectValidation, key: &str) -> Option<&'a Schema> {
        rules
            .properties
            .get(key)
            .or(rules.additional_properties.as_deref())
    }

    /// 当前节点的子 schema（allOf 全部 + anyOf/oneOf 中与 value 匹配的分支）
    fn applicable_subschemas(&self, object: &'a SchemaObject, value: &Value) -> Vec<&'a Schema> {
        let mut applicable = Vec::new();
        if let Some(subschemas) = &object.subschemas {
            if let Some(all_of) = &subschemas.all_of {
                applicable.extend(all_of.iter());
            }
            for variants in [&subschemas.any_of, &subschemas.one_of].into_iter().flatten() {
                applicable.extend(self.matching_variant(variants, value));
            }
        }
        applicable
    }

    fn redact_object(&self, object: &'a SchemaObject, value: &mut Value, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        if self.is_secret(object) {
            if let Value::String(text) = value {
                *text = secret::redact(text).to_string();
            }
            return;
        }
        let object = self.deref(object);
        for schema in self.applicable_subschemas(object, value) {
            if let Schema::Object(member) = schema {
                self.redact_object(member, value, depth + 1);
            }
        }
        match value {
            Value::Object(map) => {
                if let Some(rules) = &object.object {
                    for (key, field) in map.iter_mut() {
                        if let Some(Schema::Object(member)) = Self::property_schema(rules, key) {
                            self.redact_object(member, field, depth + 1);
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(Some(SingleOrVec::Single(schema))) = object.array.as_ref().map(|a| &a.items) {
                    if let Schema::Object(member) = schema.as_ref() {
                        for item in items.iter_mut() {
                            self.redact_object(member, item, depth + 1);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn restore_object(&self, object: &'a SchemaObject, value: &mut Value, stored: Option<&Value>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        if self.is_secret(object) {
            if let Value::String(text) = value {
                let update = SecretUpdate::from_wire(text);
                *text = update.resolve(stored.and_then(Value::as_str));
            }
            return;
        }
        let object = self.deref(object);
        for schema in self.applicable_subschemas(object, value) {
            if let Schema::Object(member) = schema {
                self.restore_object(member, value, stored, depth + 1);
            }
        }
        match value {
            Value::Object(map) => {
                if let Some(rules) = &object.object {
                    for (key, field) in map.iter_mut() {
                        if let Some(Schema::Object(member)) = Self::property_schema(rules, key) {
                            let previous = stored.and_then(|s| s.get(key.as_str()));
                            self.restore_object(member, field, previous, depth + 1);
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(Some(SingleOrVec::Single(schema))) = object.array.as_ref().map(|a| &a.items) {
                    if let Schema::Object(member) = schema.as_ref() {
                        for (index, item) in items.iter_mut().enumerate() {
                            let previous = stored.and_then(|s| s.get(index));
                            self.restore_object(member, item, previous, depth + 1);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// 收集密钥字段的 password 控件；组合 schema 的各分支共用同一个 UI 节点
    fn collect_ui(&self, object: &'a SchemaObject, ui: &mut Map<String, Value>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        let object = self.deref(object);
        if let Some(subschemas) = &object.subschemas {
            let members = [&subschemas.all_of, &subschemas.any_of, &subschemas.one_of];
            for member in members.into_iter().flatten().flatten() {
                if let Schema::Object(member) = member {
                    self.collect_ui(member, ui, depth + 1);
                }
            }
        }
        let Some(rules) = &object.object else {
            return;
        };
        for (key, property) in &rules.properties {
            let Schema::Object(property) = property else {
                continue;
            };
            let mut node = Map::new();
            if self.is_secret(property) {
                node.insert("ui:options".to_string(), json!({ "widget": "password" }));
            } else {
                self.collect_ui(property, &mut node, depth + 1);
            }
            if node.is_empty() {
                continue;
            }
            let entry = ui.entry(key.clone()).or_insert_with(|| json!({}));
            merge_json(entry, &Value::Object(node));
        }
    }
}

fn check_number(rules: &NumberValidation, number: f64, path: &str, errors: &mut Vec<FieldError>) {
    let path = display_path(path);
    if let Some(min) = rules.minimum {
        if number < min {
            errors.push(FieldError::new(path, format!("must be greater than or equal to {min}")));
        }
    }
    if let Some(max) = rules.maximum {
        if number > max {
            errors.push(FieldError::new(path, format!("must be less than or equal to {max}")));
        }
    }
    if let Some(min) = rules.exclusive_minimum {
        if number <= min {
            errors.push(FieldError::new(path, format!("must be greater than {min}")));
        }
    }
    if let Some(max) = rules.exclusive_maximum {
        if number >= max {
            errors.push(FieldError::new(path, format!("must be less than {max}")));
        }
    }
}

fn check_string(rules: &StringValidation, text: &str, path: &str, errors: &mut Vec<FieldError>) {
    let path = display_path(path);
    let length = text.chars().count();
    if let Some(min) = rules.min_length {
        if length < min as usize {
            errors.push(FieldError::new(path, format!("must be at least {min} characters")));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max as usize {
            errors.push(FieldError::new(path, format!("must be at most {max} characters")));
        }
    }
    if let Some(pattern) = &rules.pattern {
        match regex::Regex::new(pattern) {
            Ok(re) if !re.is_match(text) => {
                errors.push(FieldError::new(path, format!("must match pattern {pattern}")));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(pattern = %pattern, error = %e, "invalid pattern in config schema"),
        }
    }
}
