//! SparkPost courier
//!
//! Sends emails through the SparkPost transmissions API.
//!
//! SparkPost does not support attachments on templated transmissions. When a
//! templated email carries attachments, the courier fetches the stored
//! template and synthesizes an equivalent inline transmission from its
//! content. Substitution data is still applied by SparkPost, but
//! tracking/reporting for the template may not behave as usual.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{CourierError, CourierResult};
use crate::models::{Address, Content, ContentKind, Email};
use crate::provider::{ensure_supported, join_addresses, ConfirmingCourier, Courier};
use crate::receipts::ReceiptStore;

/// SparkPost API endpoint.
const SPARKPOST_API_URL: &str = "https://api.sparkpost.com/api/v1";

const SUPPORTED_CONTENT: &[ContentKind] = &[
    ContentKind::Empty,
    ContentKind::Simple,
    ContentKind::Templated,
];

/// SparkPost transmissions request payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransmissionPayload {
    pub recipients: Vec<Recipient>,
    pub content: TransmissionContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substitution_data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub address: RecipientAddress,
}

/// SparkPost has no native CC/BCC classes, so every recipient is listed flat
/// and `header_to` forces the rendered "To" header to show the intended
/// To list regardless of the envelope recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientAddress {
    pub email: String,
    pub header_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransmissionContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<SparkPostFrom>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SparkPostAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparkPostFrom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparkPostAttachment {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub data: String,
}

/// Stored template content fetched from `GET templates/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateContent {
    #[serde(default)]
    pub from: Option<TemplateFrom>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateFrom {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Successful transmission response, `results.id` on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct TransmissionResponse {
    pub id: String,
}

/// A failure reported by the SparkPost API or its transport.
#[derive(Debug, Clone, thiserror::Error)]
#[error("SparkPost returned status {code}: {body}")]
pub struct SparkPostApiError {
    pub code: u16,
    pub body: String,
}

/// The slice of the SparkPost API the courier depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SparkPostApi: Send + Sync {
    async fn post_transmission(
        &self,
        payload: &TransmissionPayload,
    ) -> Result<TransmissionResponse, SparkPostApiError>;

    async fn get_template(&self, template_id: &str)
        -> Result<TemplateContent, SparkPostApiError>;
}

/// HTTP client for the SparkPost API.
pub struct SparkPostClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl SparkPostClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: SPARKPOST_API_URL.to_string(),
        }
    }

    /// Point the client at a different base URL, e.g. a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Create from environment variables.
    ///
    /// Expects `SPARKPOST_API_KEY`.
    pub fn from_env() -> CourierResult<Self> {
        let api_key = std::env::var("SPARKPOST_API_KEY")
            .map_err(|_| CourierError::Validation("SPARKPOST_API_KEY not set".to_string()))?;

        Ok(Self::new(api_key))
    }

    async fn read_error(response: reqwest::Response) -> SparkPostApiError {
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SparkPostApiError { code, body }
    }
}

#[async_trait]
impl SparkPostApi for SparkPostClient {
    async fn post_transmission(
        &self,
        payload: &TransmissionPayload,
    ) -> Result<TransmissionResponse, SparkPostApiError> {
        #[derive(Deserialize)]
        struct Results {
            results: TransmissionResponse,
        }

        let transport_error = |e: reqwest::Error| SparkPostApiError {
            code: 0,
            body: e.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/transmissions", self.base_url))
            .header("Authorization", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        response
            .json::<Results>()
            .await
            .map(|body| body.results)
            .map_err(transport_error)
    }

    async fn get_template(
        &self,
        template_id: &str,
    ) -> Result<TemplateContent, SparkPostApiError> {
        #[derive(Deserialize)]
        struct Results {
            results: TemplateResults,
        }

        #[derive(Deserialize)]
        struct TemplateResults {
            content: TemplateContent,
        }

        let transport_error = |e: reqwest::Error| SparkPostApiError {
            code: 0,
            body: e.to_string(),
        };

        let response = self
            .http
            .get(format!("{}/templates/{}", self.base_url, template_id))
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        response
            .json::<Results>()
            .await
            .map(|body| body.results.content)
            .map_err(transport_error)
    }
}

/// Courier backed by the SparkPost transmissions API.
pub struct SparkPostCourier<A: SparkPostApi> {
    api: A,
    receipts: ReceiptStore,
}

impl<A: SparkPostApi> SparkPostCourier<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            receipts: ReceiptStore::new(),
        }
    }

    fn build_recipients(email: &Email) -> Vec<Recipient> {
        let header_to = join_addresses(&email.to, ",");

        email
            .to
            .iter()
            .chain(email.cc.iter())
            .chain(email.bcc.iter())
            .map(|address| Recipient {
                address: RecipientAddress {
                    email: address.email.clone(),
                    header_to: header_to.clone(),
                },
            })
            .collect()
    }

    /// CC has no native representation at this layer, so it rides along as a
    /// literal header on the content.
    fn cc_headers(email: &Email) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if !email.cc.is_empty() {
            headers.insert("CC".to_string(), join_addresses(&email.cc, ","));
        }
        headers
    }

    fn build_simple_content(
        email: &Email,
        html: Option<String>,
        text: Option<String>,
    ) -> CourierResult<TransmissionContent> {
        let attachments = email
            .attachments
            .iter()
            .map(|attachment| {
                Ok(SparkPostAttachment {
                    name: attachment.name.clone(),
                    content_type: attachment.content_type.clone(),
                    data: attachment.base64_content()?,
                })
            })
            .collect::<CourierResult<Vec<_>>>()?;

        Ok(TransmissionContent {
            from: Some(SparkPostFrom {
                name: email.from.name.clone(),
                email: email.from.email.clone(),
            }),
            subject: Some(email.subject.clone()),
            html,
            text,
            attachments,
            // SparkPost only supports a single reply-to.
            reply_to: email.reply_to.first().map(|address| address.to_rfc2822()),
            template_id: None,
            headers: Self::cc_headers(email),
        })
    }

    /// SparkPost treats the from, subject and reply-to as substitutable
    /// template content, so the email's values are injected under
    /// conventional keys unless the caller already provided them.
    fn build_template_data(email: &Email) -> Map<String, Value> {
        let Content::Templated { template_data, .. } = &email.content else {
            return Map::new();
        };

        let mut data = template_data.clone();

        if let Some(first) = email.reply_to.first() {
            data.entry("replyTo".to_string())
                .or_insert_with(|| Value::String(first.to_rfc2822()));
        }

        data.entry("fromName".to_string()).or_insert_with(|| {
            email
                .from
                .name
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null)
        });

        data.entry("fromEmail".to_string())
            .or_insert_with(|| Value::String(email.from.local_part().to_string()));

        data.entry("fromDomain".to_string())
            .or_insert_with(|| Value::String(email.from.domain().to_string()));

        data.entry("subject".to_string())
            .or_insert_with(|| Value::String(email.subject.clone()));

        if !email.cc.is_empty() {
            data.entry("ccHeader".to_string())
                .or_insert_with(|| Value::String(join_addresses(&email.cc, ",")));
        }

        data
    }

    async fn build_template_content(
        &self,
        email: &Email,
        template_id: &str,
    ) -> CourierResult<TransmissionContent> {
        if email.attachments.is_empty() {
            return Ok(TransmissionContent {
                template_id: Some(template_id.to_string()),
                headers: Self::cc_headers(email),
                ..Default::default()
            });
        }

        // Attachments cannot ride on a templated transmission; fetch the
        // stored template and send its content inline instead.
        let template = self.api.get_template(template_id).await.map_err(|e| {
            error!(
                status = e.code,
                body = %e.body,
                "failed to retrieve the SparkPost template"
            );

            CourierError::transmission(Some(i64::from(e.code)), e)
        })?;

        let mut inline = email.clone();
        inline.subject = template.subject.clone().unwrap_or_default();

        // A from address with placeholder syntax would fail validation on an
        // inline send, so the caller's literal from stands in for it.
        if let Some(from) = &template.from {
            if !from.email.contains("{{") {
                let mut address = Address::new(&from.email);
                if let Some(name) = &from.name {
                    address = address.with_name(name);
                }
                inline.from = address;
            }
        }

        if let Some(reply_to) = &template.reply_to {
            if reply_to.contains("{{") {
                let first = email.reply_to.first().ok_or_else(|| {
                    CourierError::Validation(
                        "Reply to is templated but no value was given".to_string(),
                    )
                })?;
                inline.reply_to = vec![first.clone()];
            } else {
                inline.reply_to = vec![Address::parse(reply_to)?];
            }
        }

        let mut content =
            Self::build_simple_content(&inline, template.html.clone(), template.text.clone())?;

        // Template headers win for keys present in both maps.
        if let Some(template_headers) = template.headers {
            content.headers.extend(template_headers);
        }

        Ok(content)
    }
}

#[async_trait]
impl<A: SparkPostApi> Courier for SparkPostCourier<A> {
    async fn deliver(&self, email: &Email) -> CourierResult<()> {
        ensure_supported(email, SUPPORTED_CONTENT)?;

        let recipients = Self::build_recipients(email);

        let (content, substitution_data) = match &email.content {
            Content::Templated { template_id, .. } => (
                self.build_template_content(email, template_id).await?,
                Some(Self::build_template_data(email)),
            ),
            Content::Simple { html, text } => (
                Self::build_simple_content(email, html.clone(), text.clone())?,
                None,
            ),
            // An empty body becomes an inline send with empty parts; the
            // caller's email is left untouched.
            Content::Empty => (
                Self::build_simple_content(email, Some(String::new()), Some(String::new()))?,
                None,
            ),
        };

        let payload = TransmissionPayload {
            recipients,
            content,
            substitution_data,
        };

        debug!(subject = %email.subject, "sending transmission via SparkPost");

        let response = self.api.post_transmission(&payload).await.map_err(|e| {
            error!(
                status = e.code,
                body = %e.body,
                "SparkPost rejected the transmission"
            );

            CourierError::transmission(Some(i64::from(e.code)), e)
        })?;

        self.receipts.save(email, response.id);

        Ok(())
    }
}

impl<A: SparkPostApi> ConfirmingCourier for SparkPostCourier<A> {
    fn receipt_for(&self, email: &Email) -> CourierResult<String> {
        self.receipts.receipt_for(email)
    }
}
