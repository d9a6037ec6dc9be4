pub mod bridge;
pub mod replay;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::parser::RawSnapshot;

pub use bridge::BridgeProvider;
pub use replay::ReplayProvider;

/// Result of asking the page to scroll the member list once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advance {
    #[serde(default)]
    pub snapshot: RawSnapshot,
    /// The list did not move after scrolling.
    #[serde(default)]
    pub end_reached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    NotFound,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendReport {
    pub outcome: SendOutcome,
    #[serde(default)]
    pub detail: Option<String>,
}

impl SendReport {
    #[cfg(test)]
    pub fn sent() -> Self {
        Self {
            outcome: SendOutcome::Sent,
            detail: None,
        }
    }
}

/// Everything that touches the live page: scrolling and reading the member
/// list, and delivering one message.
#[async_trait]
pub trait PageProvider: Send {
    async fn advance(&mut self) -> Result<Advance, ProviderError>;

    /// Read what is visible without scrolling.
    async fn capture_once(&mut self) -> Result<RawSnapshot, ProviderError>;

    async fn send(&mut self, phone: &str, text: &str) -> Result<SendReport, ProviderError>;
}

#[async_trait]
impl<P: PageProvider + ?Sized> PageProvider for Box<P> {
    async fn advance(&mut self) -> Result<Advance, ProviderError> {
        (**self).advance().await
    }

    async fn capture_once(&mut self) -> Result<RawSnapshot, ProviderError> {
        (**self).capture_once().await
    }

    async fn send(&mut self, phone: &str, text: &str) -> Result<SendReport, ProviderError> {
        (**self).send(phone, text).await
    }
}
