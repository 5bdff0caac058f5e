use crate::error::GatewayError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookRegistration {
    pub id: String,
    pub url: String,
    pub event: String,
}

#[derive(Debug, Serialize)]
struct RegisterHookRequest<'a> {
    url: &'a str,
    event: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    #[serde(rename = "phoneNumbers")]
    phone_numbers: &'a [String],
    message: &'a str,
    #[serde(rename = "simNumber", skip_serializing_if = "Option::is_none")]
    sim_number: Option<&'a str>,
}

/// Typed, blocking-per-call (no internal retries) HTTP client for the
/// upstream gateway. Every call has a 5s hard deadline and is
/// authenticated with HTTP basic auth; the client itself is stateless
/// beyond those credentials and is safe to share across tasks.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    user: &'static str,
    password: String,
}

impl GatewayClient {
    /// `bind_address`, when given, pins outbound requests to that local
    /// interface rather than letting the OS pick one. The gateway has been
    /// observed to behave differently toward loopback-origin callers than
    /// toward callers arriving from a real interface (see the startup
    /// discovery step this address comes from), so the proxy reaches it
    /// from its discovered private address rather than `127.0.0.1`.
    pub fn new(
        base_url: String,
        user: &'static str,
        password: String,
        bind_address: Option<IpAddr>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(addr) = bind_address {
            builder = builder.local_address(addr);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            base_url,
            user,
            password,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn unexpected_status(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(256)
            .collect();
        GatewayError::UnexpectedStatus { status, body }
    }

    pub async fn health(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .get(self.url("/health"))
            .basic_auth(self.user, Some(&self.password))
            .send()
            .await?;
        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(Self::unexpected_status(response).await)
        }
    }

    pub async fn list_hooks(&self) -> Result<Vec<HookRegistration>, GatewayError> {
        let response = self
            .client
            .get(self.url("/webhooks"))
            .basic_auth(self.user, Some(&self.password))
            .send()
            .await?;
        if response.status() == StatusCode::OK {
            Ok(response.json().await?)
        } else {
            Err(Self::unexpected_status(response).await)
        }
    }

    pub async fn register_hook(&self, event: &str, url: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url("/webhooks"))
            .basic_auth(self.user, Some(&self.password))
            .json(&RegisterHookRequest { url, event })
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            _ => Err(Self::unexpected_status(response).await),
        }
    }

    pub async fn delete_hook(&self, id: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.url(&format!("/webhooks/{id}")))
            .basic_auth(self.user, Some(&self.password))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::unexpected_status(response).await),
        }
    }

    pub async fn send_message(
        &self,
        phone_numbers: &[String],
        message: &str,
        sim_number: Option<&str>,
    ) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .client
            .post(self.url("/messages"))
            .basic_auth(self.user, Some(&self.password))
            .json(&SendMessageRequest {
                phone_numbers,
                message,
                sim_number,
            })
            .send()
            .await?;
        if response.status() == StatusCode::ACCEPTED {
            Ok(response.json().await?)
        } else {
            Err(Self::unexpected_status(response).await)
        }
    }
}
