// Workflow Triggers - Platform events that start workflow runs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Event type names emitted by the platform. Workflows may use any string;
/// these are the ones the platform itself raises.
pub mod event_types {
    pub const USER_CREATED: &str = "user.created";
    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";
    pub const CREATOR_APPROVED: &str = "creator.approved";
    pub const PAYOUT_REQUESTED: &str = "payout.requested";
    pub const TICKET_CREATED: &str = "ticket.created";
    pub const MESSAGE_RECEIVED: &str = "message.received";

    pub const ALL: [&str; 7] = [
        USER_CREATED,
        SUBSCRIPTION_CREATED,
        SUBSCRIPTION_CANCELLED,
        CREATOR_APPROVED,
        PAYOUT_REQUESTED,
        TICKET_CREATED,
        MESSAGE_RECEIVED,
    ];
}

/// Payload for trigger events
pub type EventPayload = serde_json::Value;

/// A trigger event that can initiate workflow runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: EventPayload,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Source of the trigger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    System,
    User(String),
    Api,
    Webhook,
    Scheduler,
    Test,
}

impl TriggerEvent {
    pub fn new(event_type: &str, payload: EventPayload, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload,
            source,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn user_created(user_id: &str, email: &str, display_name: &str, plan: &str) -> Self {
        Self::new(
            event_types::USER_CREATED,
            json!({
                "user": {
                    "id": user_id,
                    "email": email,
                    "display_name": display_name,
                    "plan": plan
                }
            }),
            EventSource::System,
        )
    }

    pub fn subscription_created(user_id: &str, creator_id: &str, tier: &str, price: Decimal) -> Self {
        Self::new(
            event_types::SUBSCRIPTION_CREATED,
            json!({
                "user": {"id": user_id},
                "creator": {"id": creator_id},
                "subscription": {"tier": tier, "price": price.to_string()}
            }),
            EventSource::System,
        )
    }

    pub fn subscription_cancelled(user_id: &str, creator_id: &str, reason: Option<&str>) -> Self {
        Self::new(
            event_types::SUBSCRIPTION_CANCELLED,
            json!({
                "user": {"id": user_id},
                "creator": {"id": creator_id},
                "reason": reason
            }),
            EventSource::System,
        )
    }

    pub fn creator_approved(creator_id: &str, display_name: &str, approved_by: &str) -> Self {
        Self::new(
            event_types::CREATOR_APPROVED,
            json!({
                "creator": {"id": creator_id, "display_name": display_name, "verified": true},
                "approved_by": approved_by
            }),
            EventSource::User(approved_by.to_string()),
        )
    }

    pub fn payout_requested(creator_id: &str, amount: Decimal, currency: &str) -> Self {
        Self::new(
            event_types::PAYOUT_REQUESTED,
            json!({
                "creator": {"id": creator_id},
                "payout": {
                    "amount": amount.to_string(),
                    "currency": currency
                }
            }),
            EventSource::User(creator_id.to_string()),
        )
    }

    pub fn ticket_created(ticket_id: &str, user_id: &str, subject: &str, priority: &str) -> Self {
        Self::new(
            event_types::TICKET_CREATED,
            json!({
                "ticket": {
                    "id": ticket_id,
                    "subject": subject,
                    "priority": priority,
                    "assigned_to": null
                },
                "user": {"id": user_id}
            }),
            EventSource::User(user_id.to_string()),
        )
    }

    pub fn message_received(sender_id: &str, recipient_id: &str, preview: &str) -> Self {
        Self::new(
            event_types::MESSAGE_RECEIVED,
            json!({
                "message": {
                    "sender_id": sender_id,
                    "recipient_id": recipient_id,
                    "preview": preview
                }
            }),
            EventSource::User(sender_id.to_string()),
        )
    }

    /// Add correlation ID for tracking related events
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
