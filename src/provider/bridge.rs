use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{Advance, PageProvider, SendReport};
use crate::error::ProviderError;
use crate::parser::RawSnapshot;

/// Talks to a page-automation agent running next to the browser tab.
///
/// `POST /advance`, `GET /capture` and `POST /send` all exchange JSON.
pub struct BridgeProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    phone: &'a str,
    text: &'a str,
}

impl BridgeProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Remote(format!("{}: {}", status, body.trim())));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl PageProvider for BridgeProvider {
    async fn advance(&mut self) -> Result<Advance, ProviderError> {
        let response = self.client.post(self.url("advance")).send().await?;
        let advance: Advance = Self::decode(response).await?;
        debug!(
            rows = advance.snapshot.rows.len(),
            end_reached = advance.end_reached,
            "Bridge advance"
        );
        Ok(advance)
    }

    async fn capture_once(&mut self) -> Result<RawSnapshot, ProviderError> {
        let response = self.client.get(self.url("capture")).send().await?;
        Self::decode(response).await
    }

    async fn send(&mut self, phone: &str, text: &str) -> Result<SendReport, ProviderError> {
        let response = self
            .client
            .post(self.url("send"))
            .json(&SendRequest { phone, text })
            .send()
            .await?;
        Self::decode(response).await
    }
}
