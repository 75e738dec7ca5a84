//! Dispatch request validation.
//!
//! The client validates before asking the server to send; the server
//! validates again before touching a provider.  Both run this exact code,
//! so a request refused locally would have been refused remotely too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Campaign, VariableBinding};
use crate::types::{ContactId, MessageChannel, TemplateId};

/// What a bulk send needs: the frozen recipient set plus the
/// channel-specific payload, and an optional future launch time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRequest {
    pub channel: MessageChannel,
    pub recipient_ids: Vec<ContactId>,
    /// Template channels only.
    pub template_id: Option<TemplateId>,
    /// Template channels only: language variant to send.
    pub language: Option<String>,
    /// Email only.
    pub subject: Option<String>,
    /// Email only.
    pub body: Option<String>,
    pub mappings: Vec<VariableBinding>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl DispatchRequest {
    pub fn from_campaign(campaign: &Campaign) -> Self {
        Self {
            channel: campaign.channel,
            recipient_ids: campaign.recipient_ids.clone(),
            template_id: campaign.template_id,
            language: None,
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
            mappings: campaign.mappings.clone(),
            scheduled_at: campaign.scheduled_at,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No recipients selected")]
    NoRecipients,

    #[error("A template must be selected for template sends")]
    MissingTemplate,

    #[error("Email sends need both a subject and a body")]
    MissingEmailContent,

    #[error("The {0} integration is not configured")]
    IntegrationNotConfigured(String),
}

/// Refuses a request that would fail downstream.  Checked in order:
/// recipients, channel payload, integration state.  An empty recipient
/// set is rejected before the integration flag is even looked at.
pub fn validate(req: &DispatchRequest, integration_configured: bool) -> Result<(), DispatchError> {
    if req.recipient_ids.is_empty() {
        return Err(DispatchError::NoRecipients);
    }
    match req.channel {
        MessageChannel::WhatsappTemplate => {
            if req.template_id.is_none() {
                return Err(DispatchError::MissingTemplate);
            }
        }
        MessageChannel::Email => {
            let blank = |s: &Option<String>| s.as_deref().map(str::trim).unwrap_or("").is_empty();
            if blank(&req.subject) || blank(&req.body) {
                return Err(DispatchError::MissingEmailContent);
            }
        }
    }
    if !integration_configured {
        return Err(DispatchError::IntegrationNotConfigured(
            req.channel.provider().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_request(recipients: usize) -> DispatchRequest {
        DispatchRequest {
            channel: MessageChannel::WhatsappTemplate,
            recipient_ids: (0..recipients).map(|_| ContactId::new()).collect(),
            template_id: Some(TemplateId::new()),
            language: Some("en".to_string()),
            subject: None,
            body: None,
            mappings: Vec::new(),
            scheduled_at: None,
        }
    }

    fn email_request(recipients: usize) -> DispatchRequest {
        DispatchRequest {
            channel: MessageChannel::Email,
            recipient_ids: (0..recipients).map(|_| ContactId::new()).collect(),
            template_id: None,
            language: None,
            subject: Some("Hello".to_string()),
            body: Some("<p>Hi {{name}}</p>".to_string()),
            mappings: Vec::new(),
            scheduled_at: None,
        }
    }

    #[test]
    fn test_empty_recipients_rejected_first() {
        // Rejected before the integration flag matters.
        let req = template_request(0);
        assert_eq!(validate(&req, true), Err(DispatchError::NoRecipients));
        assert_eq!(validate(&req, false), Err(DispatchError::NoRecipients));
    }

    #[test]
    fn test_template_channel_requires_template() {
        let mut req = template_request(2);
        req.template_id = None;
        assert_eq!(validate(&req, true), Err(DispatchError::MissingTemplate));
    }

    #[test]
    fn test_email_requires_subject_and_body() {
        let mut req = email_request(1);
        req.subject = None;
        assert_eq!(validate(&req, true), Err(DispatchError::MissingEmailContent));

        let mut req = email_request(1);
        req.body = Some("   ".to_string());
        assert_eq!(validate(&req, true), Err(DispatchError::MissingEmailContent));
    }

    #[test]
    fn test_unconfigured_integration_refused() {
        let req = email_request(1);
        assert_eq!(
            validate(&req, false),
            Err(DispatchError::IntegrationNotConfigured("email".to_string()))
        );
    }

    #[test]
    fn test_valid_requests_pass() {
        assert_eq!(validate(&template_request(3), true), Ok(()));
        assert_eq!(validate(&email_request(1), true), Ok(()));
    }
}
