//! SendGrid courier
//!
//! Sends emails via the SendGrid v3 mail/send API. Transactional sends use a
//! single personalization with multiple recipients, so recipient lists are
//! de-duplicated case-insensitively: CC is filtered against To, and BCC
//! against To and CC.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{CourierError, CourierResult};
use crate::models::{Address, Content, ContentKind, Email};
use crate::provider::{ensure_supported, ConfirmingCourier, Courier};
use crate::receipts::ReceiptStore;

/// SendGrid API endpoint.
const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

const SUPPORTED_CONTENT: &[ContentKind] = &[
    ContentKind::Empty,
    ContentKind::Simple,
    ContentKind::Templated,
];

/// SendGrid mail/send request payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendGridMessage {
    pub personalizations: Vec<Personalization>,
    pub from: SendGridAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<SendGridAddress>,
    pub subject: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<SendGridContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SendGridAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Personalization {
    pub to: Vec<SendGridAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<SendGridAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<SendGridAddress>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub substitutions: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendGridAddress {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&Address> for SendGridAddress {
    fn from(address: &Address) -> Self {
        Self {
            email: address.email.clone(),
            name: address.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendGridContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendGridAttachment {
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub filename: String,
    pub disposition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Raw response from the mail/send endpoint. The courier interprets the
/// status itself, so the client hands back every response as-is.
#[derive(Debug, Clone)]
pub struct SendGridResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SendGridResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A transport-level failure talking to SendGrid.
#[derive(Debug, Clone, thiserror::Error)]
#[error("SendGrid request failed: {0}")]
pub struct SendGridApiError(pub String);

/// The slice of the SendGrid API the courier depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SendGridApi: Send + Sync {
    async fn send(&self, message: &SendGridMessage) -> Result<SendGridResponse, SendGridApiError>;
}

/// HTTP client for the SendGrid v3 API.
pub struct SendGridClient {
    http: Client,
    api_key: String,
    url: String,
}

impl SendGridClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            url: SENDGRID_API_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint, e.g. a test server.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Create from environment variables.
    ///
    /// Expects `SENDGRID_API_KEY`.
    pub fn from_env() -> CourierResult<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .map_err(|_| CourierError::Validation("SENDGRID_API_KEY not set".to_string()))?;

        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl SendGridApi for SendGridClient {
    async fn send(&self, message: &SendGridMessage) -> Result<SendGridResponse, SendGridApiError> {
        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(message)
            .send()
            .await
            .map_err(|e| SendGridApiError(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(field, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (field.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| SendGridApiError(e.to_string()))?;

        Ok(SendGridResponse {
            status,
            headers,
            body,
        })
    }
}

/// Courier backed by the SendGrid v3 API.
pub struct SendGridCourier<A: SendGridApi> {
    api: A,
    receipts: ReceiptStore,
}

impl<A: SendGridApi> SendGridCourier<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            receipts: ReceiptStore::new(),
        }
    }

    /// Keep the first occurrence of each address, comparing emails
    /// case-insensitively, and drop any address already claimed by an
    /// earlier recipient class.
    fn distinct_addresses<'a>(addresses: &'a [Address], existing: &[&Address]) -> Vec<&'a Address> {
        let mut seen: HashSet<String> = existing
            .iter()
            .map(|address| address.email.to_lowercase())
            .collect();

        addresses
            .iter()
            .filter(|address| seen.insert(address.email.to_lowercase()))
            .collect()
    }

    fn build_recipients(email: &Email) -> Personalization {
        let to = Self::distinct_addresses(&email.to, &[]);

        let existing: Vec<&Address> = email.to.iter().collect();
        let cc = Self::distinct_addresses(&email.cc, &existing);

        let existing: Vec<&Address> = email.to.iter().chain(email.cc.iter()).collect();
        let bcc = Self::distinct_addresses(&email.bcc, &existing);

        Personalization {
            to: to.into_iter().map(SendGridAddress::from).collect(),
            cc: cc.into_iter().map(SendGridAddress::from).collect(),
            bcc: bcc.into_iter().map(SendGridAddress::from).collect(),
            substitutions: Map::new(),
        }
    }

    fn build_content(content: &Content) -> Vec<SendGridContent> {
        let mut parts = Vec::new();

        if let Content::Simple { html, text } = content {
            if let Some(text) = text {
                parts.push(SendGridContent {
                    content_type: "text/plain".to_string(),
                    value: text.clone(),
                });
            }

            if let Some(html) = html {
                parts.push(SendGridContent {
                    content_type: "text/html".to_string(),
                    value: html.clone(),
                });
            }
        }

        // Empty content, or simple content with no parts, still needs a body.
        if parts.is_empty() && !matches!(content, Content::Templated { .. }) {
            parts.push(SendGridContent {
                content_type: "text/plain".to_string(),
                value: String::new(),
            });
        }

        parts
    }

    fn build_attachments(email: &Email) -> CourierResult<Vec<SendGridAttachment>> {
        let mut attachments = Vec::new();

        for attachment in &email.attachments {
            attachments.push(SendGridAttachment {
                content: attachment.base64_content()?,
                content_type: attachment.content_type.clone(),
                filename: attachment.name.clone(),
                disposition: "attachment".to_string(),
                content_id: None,
            });
        }

        for attachment in &email.embedded {
            attachments.push(SendGridAttachment {
                content: attachment.base64_content()?,
                content_type: attachment.content_type.clone(),
                filename: attachment.name.clone(),
                disposition: "inline".to_string(),
                content_id: attachment.content_id.clone(),
            });
        }

        Ok(attachments)
    }

    fn build_message(email: &Email) -> CourierResult<SendGridMessage> {
        let mut personalization = Self::build_recipients(email);
        let mut template_id = None;

        if let Content::Templated {
            template_id: id,
            template_data,
        } = &email.content
        {
            personalization.substitutions = template_data.clone();
            template_id = Some(id.clone());
        }

        Ok(SendGridMessage {
            personalizations: vec![personalization],
            from: SendGridAddress::from(&email.from),
            // SendGrid only supports a single reply-to.
            reply_to: email.reply_to.first().map(SendGridAddress::from),
            subject: email.subject.clone(),
            content: Self::build_content(&email.content),
            attachments: Self::build_attachments(email)?,
            template_id,
        })
    }
}

#[async_trait]
impl<A: SendGridApi> Courier for SendGridCourier<A> {
    async fn deliver(&self, email: &Email) -> CourierResult<()> {
        ensure_supported(email, SUPPORTED_CONTENT)?;

        let message = Self::build_message(email)?;

        debug!(subject = %message.subject, "sending email via SendGrid");

        let response = self
            .api
            .send(&message)
            .await
            .map_err(|e| CourierError::transmission(None, e))?;

        if response.status >= 400 {
            error!(
                status = response.status,
                body = %response.body,
                "SendGrid rejected the email"
            );

            return Err(CourierError::transmission_code(i64::from(response.status)));
        }

        // A nominally successful call without a message id is still a failure:
        // there is nothing to confirm the delivery by.
        let receipt = response.header("X-Message-Id").ok_or_else(|| {
            error!(
                status = response.status,
                "SendGrid response carried no X-Message-Id header"
            );

            CourierError::Transmission {
                code: None,
                source: None,
            }
        })?;

        self.receipts.save(email, receipt);

        Ok(())
    }
}

impl<A: SendGridApi> ConfirmingCourier for SendGridCourier<A> {
    fn receipt_for(&self, email: &Email) -> CourierResult<String> {
        self.receipts.receipt_for(email)
    }
}
