use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One of the four SMS lifecycle events the gateway reports.
///
/// Wire representation is the `sms:<kind>` tag used both in the gateway's
/// webhook registrations and as the `event` discriminant on the ingress
/// envelope; [`EventKind::short`] is the bare tag used in URL paths and as
/// the dedup/registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Received,
    Sent,
    Delivered,
    Failed,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Received,
        EventKind::Sent,
        EventKind::Delivered,
        EventKind::Failed,
    ];

    /// The bare tag, e.g. `"received"`. Used in URL paths and dedup keys.
    pub fn short(&self) -> &'static str {
        match self {
            EventKind::Received => "received",
            EventKind::Sent => "sent",
            EventKind::Delivered => "delivered",
            EventKind::Failed => "failed",
        }
    }

    /// The gateway's wire tag, e.g. `"sms:received"`.
    pub fn wire(&self) -> String {
        format!("sms:{}", self.short())
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        let short = s.strip_prefix("sms:").unwrap_or(s);
        Self::from_short(short)
    }

    pub fn from_short(s: &str) -> Option<Self> {
        match s {
            "received" => Some(EventKind::Received),
            "sent" => Some(EventKind::Sent),
            "delivered" => Some(EventKind::Delivered),
            "failed" => Some(EventKind::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

/// The deployment ring a sender is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Ring {
    Prod,
    Ppe,
}

impl Ring {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prod" => Some(Ring::Prod),
            "ppe" => Some(Ring::Ppe),
            _ => None,
        }
    }
}

impl std::fmt::Display for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ring::Prod => f.write_str("prod"),
            Ring::Ppe => f.write_str("ppe"),
        }
    }
}

/// Fields shared by every payload shape, regardless of event kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayloadBase {
    pub message_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub sim_number: Option<String>,
}

/// The kind-specific payload, modeled as a flat discriminated union rather
/// than an inheritance hierarchy: each variant extends [`PayloadBase`] with
/// only the fields that event kind actually carries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Received {
        #[serde(flatten)]
        base: PayloadBase,
        message: String,
        received_at: DateTime<Utc>,
    },
    Sent {
        #[serde(flatten)]
        base: PayloadBase,
        sent_at: DateTime<Utc>,
    },
    Delivered {
        #[serde(flatten)]
        base: PayloadBase,
        delivered_at: DateTime<Utc>,
    },
    Failed {
        #[serde(flatten)]
        base: PayloadBase,
        failed_at: DateTime<Utc>,
        reason: String,
    },
}

impl Payload {
    pub fn base(&self) -> &PayloadBase {
        match self {
            Payload::Received { base, .. }
            | Payload::Sent { base, .. }
            | Payload::Delivered { base, .. }
            | Payload::Failed { base, .. } => base,
        }
    }

    /// Parse the kind-specific payload for a known [`EventKind`]. Untagged
    /// deserialization alone can't select the right variant, so we dispatch
    /// on the already-parsed envelope kind and deserialize into the exact
    /// shape that kind requires.
    pub fn parse_for_kind(kind: EventKind, raw: &serde_json::Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Received {
            #[serde(flatten)]
            base: PayloadBase,
            message: String,
            received_at: DateTime<Utc>,
        }
        #[derive(Deserialize)]
        struct Sent {
            #[serde(flatten)]
            base: PayloadBase,
            sent_at: DateTime<Utc>,
        }
        #[derive(Deserialize)]
        struct Delivered {
            #[serde(flatten)]
            base: PayloadBase,
            delivered_at: DateTime<Utc>,
        }
        #[derive(Deserialize)]
        struct Failed {
            #[serde(flatten)]
            base: PayloadBase,
            failed_at: DateTime<Utc>,
            reason: String,
        }

        Ok(match kind {
            EventKind::Received => {
                let p: Received = serde_json::from_value(raw.clone())?;
                Payload::Received {
                    base: p.base,
                    message: p.message,
                    received_at: p.received_at,
                }
            }
            EventKind::Sent => {
                let p: Sent = serde_json::from_value(raw.clone())?;
                Payload::Sent {
                    base: p.base,
                    sent_at: p.sent_at,
                }
            }
            EventKind::Delivered => {
                let p: Delivered = serde_json::from_value(raw.clone())?;
                Payload::Delivered {
                    base: p.base,
                    delivered_at: p.delivered_at,
                }
            }
            EventKind::Failed => {
                let p: Failed = serde_json::from_value(raw.clone())?;
                Payload::Failed {
                    base: p.base,
                    failed_at: p.failed_at,
                    reason: p.reason,
                }
            }
        })
    }
}

/// The envelope the gateway posts to the ingress listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngressEnvelope {
    pub id: String,
    pub webhook_id: String,
    pub device_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// A registered subscriber.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Subscriber {
    pub id: String,
    pub webhook_base_url: String,
    pub ring: Ring,
    pub kinds: HashSet<EventKind>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
