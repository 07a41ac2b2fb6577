// Workflow Actions - Steps that workflows execute

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::interpolation::interpolate_value;

/// Discriminant of [`ActionSpec`], used as the handler registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    SendWebhook,
    Delay,
    DbWrite,
    DbUpdate,
    AdminNotify,
    CreatorNotify,
    SendDm,
    TagUser,
    TagCreator,
    AssignTicket,
    TriggerPayout,
    CustomCode,
}

impl ActionKind {
    pub const ALL: [ActionKind; 13] = [
        Self::SendEmail,
        Self::SendWebhook,
        Self::Delay,
        Self::DbWrite,
        Self::DbUpdate,
        Self::AdminNotify,
        Self::CreatorNotify,
        Self::SendDm,
        Self::TagUser,
        Self::TagCreator,
        Self::AssignTicket,
        Self::TriggerPayout,
        Self::CustomCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::SendWebhook => "send_webhook",
            Self::Delay => "delay",
            Self::DbWrite => "db_write",
            Self::DbUpdate => "db_update",
            Self::AdminNotify => "admin_notify",
            Self::CreatorNotify => "creator_notify",
            Self::SendDm => "send_dm",
            Self::TagUser => "tag_user",
            Self::TagCreator => "tag_creator",
            Self::AssignTicket => "assign_ticket",
            Self::TriggerPayout => "trigger_payout",
            Self::CustomCode => "custom_code",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a workflow. String parameters may contain `{{path}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    SendEmail(SendEmailParams),
    SendWebhook(SendWebhookParams),
    Delay(DelayParams),
    DbWrite(DbWriteParams),
    DbUpdate(DbUpdateParams),
    AdminNotify(AdminNotifyParams),
    CreatorNotify(CreatorNotifyParams),
    SendDm(SendDmParams),
    TagUser(TagUserParams),
    TagCreator(TagCreatorParams),
    AssignTicket(AssignTicketParams),
    TriggerPayout(TriggerPayoutParams),
    CustomCode(CustomCodeParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailParams {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendWebhookParams {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// When set, the body is signed with HMAC-SHA256 into `X-Signature`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

pub const REDACTED: &str = "[redacted]";

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayParams {
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub hours: u64,
}

impl DelayParams {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(
            self.seconds
                .saturating_add(self.minutes.saturating_mul(60))
                .saturating_add(self.hours.saturating_mul(3600)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbWriteParams {
    pub table: String,
    pub record: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbUpdateParams {
    pub table: String,
    /// Column equality filter; must not be empty
    pub filter: Map<String, Value>,
    pub changes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminNotifyParams {
    pub title: String,
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorNotifyParams {
    pub creator_id: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDmParams {
    pub sender_id: String,
    pub recipient_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUserParams {
    pub user_id: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCreatorParams {
    pub creator_id: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignTicketParams {
    pub ticket_id: String,
    pub assignee_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayoutParams {
    pub creator_id: String,
    /// Decimal amount as a JSON number or numeric string (may be a placeholder)
    pub amount: Value,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCodeParams {
    /// Name the function was registered under
    pub function: String,
    #[serde(default)]
    pub params: Value,
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SendEmail(_) => ActionKind::SendEmail,
            Self::SendWebhook(_) => ActionKind::SendWebhook,
            Self::Delay(_) => ActionKind::Delay,
            Self::DbWrite(_) => ActionKind::DbWrite,
            Self::DbUpdate(_) => ActionKind::DbUpdate,
            Self::AdminNotify(_) => ActionKind::AdminNotify,
            Self::CreatorNotify(_) => ActionKind::CreatorNotify,
            Self::SendDm(_) => ActionKind::SendDm,
            Self::TagUser(_) => ActionKind::TagUser,
            Self::TagCreator(_) => ActionKind::TagCreator,
            Self::AssignTicket(_) => ActionKind::AssignTicket,
            Self::TriggerPayout(_) => ActionKind::TriggerPayout,
            Self::CustomCode(_) => ActionKind::CustomCode,
        }
    }

    /// Substitute placeholders in every string parameter. The `type` tag is never touched.
    pub fn interpolate(&self, context: &Value) -> Result<ActionSpec, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            for (key, param) in map.iter_mut() {
                if key != "type" {
                    *param = interpolate_value(param, context);
                }
            }
        }
        serde_json::from_value(value)
    }

    /// Copy safe to persist in logs: webhook signing secrets are masked
    pub fn redacted(&self) -> ActionSpec {
        match self {
            Self::SendWebhook(p) if p.secret.is_some() => Self::SendWebhook(SendWebhookParams {
                secret: Some(REDACTED.to_string()),
                ..p.clone()
            }),
            other => other.clone(),
        }
    }

    /// Structural checks that do not depend on runtime data
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::SendEmail(p) if p.to.trim().is_empty() => Err("send_email requires 'to'".into()),
            Self::SendWebhook(p) if p.url.trim().is_empty() => Err("send_webhook requires 'url'".into()),
            Self::SendWebhook(p) if !matches!(p.method.to_uppercase().as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE") => {
                Err(format!("unsupported webhook method '{}'", p.method))
            }
            Self::DbWrite(p) if p.record.is_empty() => Err("db_write requires a non-empty record".into()),
            Self::DbUpdate(p) if p.filter.is_empty() => Err("db_update requires a non-empty filter".into()),
            Self::DbUpdate(p) if p.changes.is_empty() => Err("db_update requires non-empty changes".into()),
            Self::CustomCode(p) if p.function.trim().is_empty() => Err("custom_code requires 'function'".into()),
            _ => Ok(()),
        }
    }

    // ===== Builders =====

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::SendEmail(SendEmailParams {
            to: to.to_string(),
            to_name: None,
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }

    pub fn send_webhook(url: &str, body: Value) -> Self {
        Self::SendWebhook(SendWebhookParams {
            url: url.to_string(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: Some(body),
            secret: None,
        })
    }

    pub fn delay_seconds(seconds: u64) -> Self {
        Self::Delay(DelayParams {
            seconds,
            ..Default::default()
        })
    }

    pub fn db_write(table: &str, record: Value) -> Self {
        Self::DbWrite(DbWriteParams {
            table: table.to_string(),
            record: into_map(record),
        })
    }

    pub fn db_update(table: &str, filter: Value, changes: Value) -> Self {
        Self::DbUpdate(DbUpdateParams {
            table: table.to_string(),
            filter: into_map(filter),
            changes: into_map(changes),
        })
    }

    pub fn admin_notify(title: &str, message: &str) -> Self {
        Self::AdminNotify(AdminNotifyParams {
            title: title.to_string(),
            message: message.to_string(),
            severity: default_severity(),
        })
    }

    pub fn creator_notify(creator_id: &str, title: &str, message: &str) -> Self {
        Self::CreatorNotify(CreatorNotifyParams {
            creator_id: creator_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
        })
    }

    pub fn send_dm(sender_id: &str, recipient_id: &str, message: &str) -> Self {
        Self::SendDm(SendDmParams {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            message: message.to_string(),
        })
    }

    pub fn tag_user(user_id: &str, tag: &str) -> Self {
        Self::TagUser(TagUserParams {
            user_id: user_id.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn tag_creator(creator_id: &str, tag: &str) -> Self {
        Self::TagCreator(TagCreatorParams {
            creator_id: creator_id.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn assign_ticket(ticket_id: &str, assignee_id: &str) -> Self {
        Self::AssignTicket(AssignTicketParams {
            ticket_id: ticket_id.to_string(),
            assignee_id: assignee_id.to_string(),
        })
    }

    pub fn trigger_payout(creator_id: &str, amount: Value) -> Self {
        Self::TriggerPayout(TriggerPayoutParams {
            creator_id: creator_id.to_string(),
            amount,
            currency: default_currency(),
            note: None,
        })
    }

    pub fn custom_code(function: &str, params: Value) -> Self {
        Self::CustomCode(CustomCodeParams {
            function: function.to_string(),
            params,
        })
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Pre-built action sequences for common platform automations
pub mod presets {
    use super::*;

    /// Greet a new subscriber and tag them by plan
    pub fn welcome_subscriber() -> Vec<ActionSpec> {
        vec![
            ActionSpec::send_email(
                "{{user.email}}",
                "Welcome, {{user.display_name}}!",
                "Thanks for joining. Your {{user.plan}} plan is active.",
            ),
            ActionSpec::tag_user("{{user.id}}", "plan:{{user.plan}}"),
        ]
    }

    /// Notify staff and the creator after a payout request, with a cooling-off delay
    pub fn payout_review(hold_hours: u64) -> Vec<ActionSpec> {
        vec![
            ActionSpec::admin_notify(
                "Payout requested",
                "Creator {{creator.id}} requested {{payout.amount}} {{payout.currency}}",
            ),
            ActionSpec::Delay(DelayParams {
                hours: hold_hours,
                ..Default::default()
            }),
            ActionSpec::trigger_payout("{{creator.id}}", Value::String("{{payout.amount}}".into())),
            ActionSpec::creator_notify(
                "{{creator.id}}",
                "Payout on its way",
                "Your payout of {{payout.amount}} has been scheduled.",
            ),
        ]
    }

    /// Route a fresh support ticket
    pub fn triage_ticket(assignee_id: &str) -> Vec<ActionSpec> {
        vec![
            ActionSpec::assign_ticket("{{ticket.id}}", assignee_id),
            ActionSpec::admin_notify("New ticket", "{{ticket.subject}}"),
        ]
    }
}
