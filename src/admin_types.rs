use crate::model::{EventKind, Ring, Subscriber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub gateway: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    /// Stable identifier for this subscriber; 1-128 characters.
    pub id: String,
    pub webhook_url: String,
    pub ring: Ring,
    #[serde(default)]
    pub sms_received: bool,
    #[serde(default)]
    pub sms_sent: bool,
    #[serde(default)]
    pub sms_delivered: bool,
    #[serde(default)]
    pub sms_failed: bool,
}

impl RegisterRequest {
    pub fn kinds(&self) -> HashSet<EventKind> {
        let mut kinds = HashSet::new();
        if self.sms_received {
            kinds.insert(EventKind::Received);
        }
        if self.sms_sent {
            kinds.insert(EventKind::Sent);
        }
        if self.sms_delivered {
            kinds.insert(EventKind::Delivered);
        }
        if self.sms_failed {
            kinds.insert(EventKind::Failed);
        }
        kinds
    }
}

#[derive(Serialize, ToSchema)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub id: String,
}

#[derive(Deserialize, ToSchema)]
pub struct AllowlistQuery {
    pub number: String,
    #[serde(default)]
    pub ring: Option<Ring>,
}

#[derive(Serialize, ToSchema)]
pub struct AllowlistAddResponse {
    pub status: &'static str,
    pub number: String,
    pub ring: Ring,
}

#[derive(Serialize, ToSchema)]
pub struct AllowlistRemoveResponse {
    pub status: &'static str,
    pub number: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SendRequest {
    pub phone_numbers: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub sim_number: Option<String>,
}

pub type AllowlistMap = HashMap<String, Ring>;
pub type ClientsResponse = Vec<Subscriber>;
