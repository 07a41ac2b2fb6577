// Built-in action handlers

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{
    ActionKind, ActionSpec, AssignTicketParams, DbUpdateParams, DbWriteParams, SendWebhookParams,
    TriggerPayoutParams,
};
use super::executor::{ActionError, ActionHandler, CustomFunctionRegistry, ExecutionContext, StepOutcome};
use crate::services::{Mailer, OutgoingEmail};
use crate::store::RecordStore;

type HmacSha256 = Hmac<Sha256>;

pub const ADMIN_NOTIFICATIONS_TABLE: &str = "admin_notifications";
pub const CREATOR_NOTIFICATIONS_TABLE: &str = "creator_notifications";
pub const DIRECT_MESSAGES_TABLE: &str = "direct_messages";
pub const USER_TAGS_TABLE: &str = "user_tags";
pub const CREATOR_TAGS_TABLE: &str = "creator_tags";
pub const SUPPORT_TICKETS_TABLE: &str = "support_tickets";
pub const PAYOUT_REQUESTS_TABLE: &str = "payout_requests";

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const RUN_ID_HEADER: &str = "X-Automation-Run-Id";

/// Collaborators the built-in handlers reach out to
#[derive(Clone)]
pub struct HandlerDeps {
    pub mailer: Arc<dyn Mailer>,
    pub records: Arc<dyn RecordStore>,
    pub http: reqwest::Client,
}

pub fn builtin_handlers(deps: HandlerDeps) -> Vec<(ActionKind, Arc<dyn ActionHandler>)> {
    let records = RecordHandler {
        records: deps.records.clone(),
    };
    vec![
        (ActionKind::SendEmail, Arc::new(EmailHandler { mailer: deps.mailer.clone() })),
        (ActionKind::SendWebhook, Arc::new(WebhookHandler { http: deps.http.clone() })),
        (ActionKind::Delay, Arc::new(DelayHandler)),
        (ActionKind::DbWrite, Arc::new(records.clone())),
        (ActionKind::DbUpdate, Arc::new(records.clone())),
        (ActionKind::AdminNotify, Arc::new(records.clone())),
        (ActionKind::CreatorNotify, Arc::new(records.clone())),
        (ActionKind::SendDm, Arc::new(records.clone())),
        (ActionKind::TagUser, Arc::new(records.clone())),
        (ActionKind::TagCreator, Arc::new(records.clone())),
        (ActionKind::AssignTicket, Arc::new(records.clone())),
        (ActionKind::TriggerPayout, Arc::new(records)),
    ]
}

fn unexpected(expected: &str, action: &ActionSpec) -> ActionError {
    ActionError::InvalidParams(format!("{} handler received a {} action", expected, action.kind()))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ==================== Email ====================

pub struct EmailHandler {
    mailer: Arc<dyn Mailer>,
}

#[async_trait]
impl ActionHandler for EmailHandler {
    async fn handle(&self, action: &ActionSpec, _ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let ActionSpec::SendEmail(params) = action else {
            return Err(unexpected("send_email", action));
        };

        let email = OutgoingEmail {
            to: params.to.clone(),
            to_name: params.to_name.clone().filter(|n| !n.is_empty()),
            subject: params.subject.clone(),
            html_body: params.body.clone(),
            text_body: None,
        };
        self.mailer.send(&email).await?;

        Ok(StepOutcome::with_output(json!({
            "to": params.to,
            "subject": params.subject,
        })))
    }
}

// ==================== Webhook ====================

pub struct WebhookHandler {
    http: reqwest::Client,
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, ActionError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ActionError::InvalidParams(format!("invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl WebhookHandler {
    async fn call(&self, params: &SendWebhookParams, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let method = Method::from_str(&params.method.to_uppercase())
            .map_err(|_| ActionError::InvalidParams(format!("invalid method '{}'", params.method)))?;

        let body = match &params.body {
            Some(body) => serde_json::to_vec(body)?,
            None => Vec::new(),
        };

        let mut request = self
            .http
            .request(method, &params.url)
            .header(RUN_ID_HEADER, ctx.run_id.to_string());

        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(secret) = params.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign_payload(secret, &body)?));
        }

        if params.body.is_some() {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json").body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ActionError::Webhook(format!("{}: {}", params.url, e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!("Webhook {} returned {}", params.url, status);
            return Err(ActionError::Webhook(format!("{} returned {}", params.url, status.as_u16())));
        }

        let response_body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(StepOutcome::with_output(json!({
            "url": params.url,
            "status_code": status.as_u16(),
            "body": response_body,
        })))
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    async fn handle(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        match action {
            ActionSpec::SendWebhook(params) => self.call(params, ctx).await,
            other => Err(unexpected("send_webhook", other)),
        }
    }
}

// ==================== Delay ====================

pub struct DelayHandler;

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn handle(&self, action: &ActionSpec, _ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let ActionSpec::Delay(params) = action else {
            return Err(unexpected("delay", action));
        };
        let duration = params.duration();
        Ok(StepOutcome {
            output: Some(json!({"delayed_seconds": duration.as_secs()})),
            defer_next: Some(duration),
        })
    }
}

// ==================== Records ====================

/// Handles every action that lands as a row in a platform table
#[derive(Clone)]
pub struct RecordHandler {
    records: Arc<dyn RecordStore>,
}

impl RecordHandler {
    async fn db_write(&self, params: &DbWriteParams) -> Result<StepOutcome, ActionError> {
        self.records.insert_record(&params.table, &params.record).await?;
        Ok(StepOutcome::with_output(json!({
            "table": params.table,
            "record": params.record,
        })))
    }

    async fn db_update(&self, params: &DbUpdateParams) -> Result<StepOutcome, ActionError> {
        let affected = self
            .records
            .update_records(&params.table, &params.filter, &params.changes)
            .await?;
        Ok(StepOutcome::with_output(json!({
            "table": params.table,
            "rows_affected": affected,
        })))
    }

    async fn insert(&self, table: &str, record: Value) -> Result<StepOutcome, ActionError> {
        let record = object(record);
        self.records.insert_record(table, &record).await?;
        Ok(StepOutcome::with_output(json!({"table": table, "id": record.get("id")})))
    }

    async fn tag(&self, table: &str, owner_column: &str, owner: &str, tag: &str) -> Result<StepOutcome, ActionError> {
        if owner.is_empty() || tag.is_empty() {
            return Err(ActionError::InvalidParams(format!("{} requires {} and tag", table, owner_column)));
        }
        let record = object(json!({
            owner_column: owner,
            "tag": tag,
            "created_at": Utc::now(),
        }));
        let inserted = self
            .records
            .upsert_record(table, &record, &[owner_column, "tag"])
            .await?;
        Ok(StepOutcome::with_output(json!({
            owner_column: owner,
            "tag": tag,
            "created": inserted,
        })))
    }

    async fn assign_ticket(&self, params: &AssignTicketParams) -> Result<StepOutcome, ActionError> {
        let filter = object(json!({"id": params.ticket_id}));
        let changes = object(json!({
            "assigned_to": params.assignee_id,
            "updated_at": Utc::now(),
        }));
        let affected = self
            .records
            .update_records(SUPPORT_TICKETS_TABLE, &filter, &changes)
            .await?;
        if affected == 0 {
            return Err(ActionError::TargetNotFound(format!("ticket {}", params.ticket_id)));
        }
        Ok(StepOutcome::with_output(json!({
            "ticket_id": params.ticket_id,
            "assigned_to": params.assignee_id,
        })))
    }

    async fn trigger_payout(&self, params: &TriggerPayoutParams, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let amount = parse_amount(&params.amount)?;
        if amount <= Decimal::ZERO {
            return Err(ActionError::InvalidParams(format!("payout amount must be positive, got {}", amount)));
        }
        if params.creator_id.is_empty() {
            return Err(ActionError::InvalidParams("trigger_payout requires creator_id".to_string()));
        }

        let key = ctx.idempotency_key();
        let record = object(json!({
            "id": Uuid::new_v4(),
            "creator_id": params.creator_id,
            "amount": amount.to_string(),
            "currency": params.currency.to_uppercase(),
            "note": params.note,
            "status": "pending",
            "idempotency_key": key,
            "workflow_run_id": ctx.run_id,
            "created_at": Utc::now(),
        }));

        let created = self
            .records
            .upsert_record(PAYOUT_REQUESTS_TABLE, &record, &["idempotency_key"])
            .await?;
        if created {
            info!("Payout of {} {} requested for creator {}", amount, params.currency, params.creator_id);
        }

        Ok(StepOutcome::with_output(json!({
            "creator_id": params.creator_id,
            "amount": amount.to_string(),
            "idempotency_key": key,
            "created": created,
        })))
    }
}

/// Accepts a JSON number or a numeric string
pub fn parse_amount(value: &Value) -> Result<Decimal, ActionError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => return Err(ActionError::InvalidParams(format!("amount must be numeric, got {}", other))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| ActionError::InvalidParams(format!("amount '{}' is not a decimal", text)))
}

#[async_trait]
impl ActionHandler for RecordHandler {
    async fn handle(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let now = Utc::now();
        match action {
            ActionSpec::DbWrite(params) => self.db_write(params).await,
            ActionSpec::DbUpdate(params) => self.db_update(params).await,
            ActionSpec::AdminNotify(params) => {
                self.insert(
                    ADMIN_NOTIFICATIONS_TABLE,
                    json!({
                        "id": Uuid::new_v4(),
                        "title": params.title,
                        "message": params.message,
                        "severity": params.severity,
                        "workflow_run_id": ctx.run_id,
                        "created_at": now,
                    }),
                )
                .await
            }
            ActionSpec::CreatorNotify(params) => {
                self.insert(
                    CREATOR_NOTIFICATIONS_TABLE,
                    json!({
                        "id": Uuid::new_v4(),
                        "creator_id": params.creator_id,
                        "title": params.title,
                        "message": params.message,
                        "is_read": false,
                        "created_at": now,
                    }),
                )
                .await
            }
            ActionSpec::SendDm(params) => {
                self.insert(
                    DIRECT_MESSAGES_TABLE,
                    json!({
                        "id": Uuid::new_v4(),
                        "sender_id": params.sender_id,
                        "recipient_id": params.recipient_id,
                        "message": params.message,
                        "created_at": now,
                    }),
                )
                .await
            }
            ActionSpec::TagUser(params) => self.tag(USER_TAGS_TABLE, "user_id", &params.user_id, &params.tag).await,
            ActionSpec::TagCreator(params) => {
                self.tag(CREATOR_TAGS_TABLE, "creator_id", &params.creator_id, &params.tag)
                    .await
            }
            ActionSpec::AssignTicket(params) => self.assign_ticket(params).await,
            ActionSpec::TriggerPayout(params) => self.trigger_payout(params, ctx).await,
            other => Err(unexpected("record", other)),
        }
    }
}

// ==================== Custom code ====================

pub struct CustomCodeHandler {
    functions: CustomFunctionRegistry,
}

impl CustomCodeHandler {
    pub fn new(functions: CustomFunctionRegistry) -> Self {
        Self { functions }
    }
}

#[async_trait]
impl ActionHandler for CustomCodeHandler {
    async fn handle(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let ActionSpec::CustomCode(params) = action else {
            return Err(unexpected("custom_code", action));
        };
        let function = self
            .functions
            .get(&params.function)
            .await
            .ok_or_else(|| ActionError::UnknownCustomFunction(params.function.clone()))?;

        let output = function.call(params.params.clone(), ctx).await?;
        Ok(StepOutcome::with_output(output))
    }
}
