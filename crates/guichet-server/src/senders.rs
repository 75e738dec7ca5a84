//! Outbound delivery providers.
//!
//! Real provider APIs sit behind [`ChannelSender`] so the dispatcher and the
//! routes never talk to a vendor SDK directly.  The default implementations
//! are sandboxes that log instead of delivering, which is also what local
//! development runs against.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use guichet_shared::types::MessageChannel;

/// One rendered message ready for handoff to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPayload {
    /// Destination address: an email address or a phone number.
    pub to: String,
    /// Subject line, email only.
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Provider rejected the message: {0}")]
    Rejected(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Provider key, matches [`guichet_shared::models::Integration::provider`].
    fn provider(&self) -> &'static str;

    async fn send(&self, payload: &OutboundPayload) -> Result<(), SendError>;
}

/// A message template as it exists on the provider's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTemplate {
    pub remote_id: String,
    pub name: String,
    /// BCP 47 language tag.
    pub language: String,
    pub body: String,
}

/// Read access to the provider's approved-template catalog.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn list_remote_templates(&self) -> Result<Vec<RemoteTemplate>, SendError>;
}

/// The provider for each channel, resolved once at startup.
#[derive(Clone)]
pub struct SenderSet {
    pub whatsapp: Arc<dyn ChannelSender>,
    pub email: Arc<dyn ChannelSender>,
    pub catalog: Arc<dyn TemplateCatalog>,
}

impl SenderSet {
    pub fn sandbox() -> Self {
        Self {
            whatsapp: Arc::new(SandboxSender::new("whatsapp")),
            email: Arc::new(SandboxSender::new("email")),
            catalog: Arc::new(SandboxCatalog),
        }
    }

    pub fn for_channel(&self, channel: MessageChannel) -> &Arc<dyn ChannelSender> {
        match channel {
            MessageChannel::WhatsappTemplate => &self.whatsapp,
            MessageChannel::Email => &self.email,
        }
    }
}

/// Logs every send and reports success.
pub struct SandboxSender {
    provider: &'static str,
}

impl SandboxSender {
    pub fn new(provider: &'static str) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChannelSender for SandboxSender {
    fn provider(&self) -> &'static str {
        self.provider
    }

    async fn send(&self, payload: &OutboundPayload) -> Result<(), SendError> {
        info!(
            provider = self.provider,
            to = %payload.to,
            bytes = payload.body.len(),
            "Sandbox send"
        );
        Ok(())
    }
}

/// Serves the one starter template sandbox accounts ship with.
pub struct SandboxCatalog;

#[async_trait]
impl TemplateCatalog for SandboxCatalog {
    async fn list_remote_templates(&self) -> Result<Vec<RemoteTemplate>, SendError> {
        Ok(vec![RemoteTemplate {
            remote_id: "sandbox-hello-world".to_string(),
            name: "hello_world".to_string(),
            language: "en".to_string(),
            body: "Hello {{name}}, welcome aboard!".to_string(),
        }])
    }
}

#[cfg(test)]
pub mod testing {
    //! A sender that records payloads and can be told to fail.

    use std::sync::Mutex;

    use super::*;

    pub struct RecordingSender {
        provider: &'static str,
        pub sent: Mutex<Vec<OutboundPayload>>,
        pub fail_with: Mutex<Option<String>>,
    }

    impl RecordingSender {
        pub fn new(provider: &'static str) -> Self {
            Self {
                provider,
                sent: Mutex::new(Vec::new()),
                fail_with: Mutex::new(None),
            }
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn set_failure(&self, reason: &str) {
            *self.fail_with.lock().unwrap() = Some(reason.to_string());
        }

        pub fn clear_failure(&self) {
            *self.fail_with.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        fn provider(&self) -> &'static str {
            self.provider
        }

        async fn send(&self, payload: &OutboundPayload) -> Result<(), SendError> {
            if let Some(reason) = self.fail_with.lock().unwrap().clone() {
                return Err(SendError::Rejected(reason));
            }
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    /// A catalog with a settable inventory.
    pub struct StubCatalog {
        pub templates: Mutex<Vec<RemoteTemplate>>,
        pub fail_with: Mutex<Option<String>>,
    }

    impl StubCatalog {
        pub fn new(templates: Vec<RemoteTemplate>) -> Self {
            Self {
                templates: Mutex::new(templates),
                fail_with: Mutex::new(None),
            }
        }

        pub fn set_failure(&self, reason: &str) {
            *self.fail_with.lock().unwrap() = Some(reason.to_string());
        }
    }

    #[async_trait]
    impl TemplateCatalog for StubCatalog {
        async fn list_remote_templates(&self) -> Result<Vec<RemoteTemplate>, SendError> {
            if let Some(reason) = self.fail_with.lock().unwrap().clone() {
                return Err(SendError::Unavailable(reason));
            }
            Ok(self.templates.lock().unwrap().clone())
        }
    }
}
