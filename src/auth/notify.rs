//! Outbound notification seam. Verification codes leave through a
//! [`Notifier`]; the default implementation only logs, real transports
//! (email, SMS, push) plug in behind the same trait.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Email(String),
    Phone(String),
}

impl Recipient {
    pub fn address(&self) -> &str {
        match self {
            Self::Email(address) | Self::Phone(address) => address,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(
        &self,
        template_id: &str,
        recipient: &Recipient,
        variables: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Logs the notification instead of delivering it. Useful for local runs and
/// as the backstop when no transport is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(
        &self,
        template_id: &str,
        recipient: &Recipient,
        variables: &BTreeMap<String, String>,
    ) -> Result<()> {
        info!(template_id, recipient = recipient.address(), ?variables, "notification dispatched");
        Ok(())
    }
}
