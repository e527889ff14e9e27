//! Postmark courier
//!
//! Sends emails through the Postmark REST API. Templated content maps to the
//! `email/withTemplate` endpoint with the subject injected into the template
//! model; everything else goes through the plain `email` endpoint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{CourierError, CourierResult};
use crate::models::{Content, ContentKind, Email};
use crate::provider::{ensure_supported, join_addresses, ConfirmingCourier, Courier};
use crate::receipts::ReceiptStore;

/// Postmark API endpoint.
const POSTMARK_API_URL: &str = "https://api.postmarkapp.com";

const SUPPORTED_CONTENT: &[ContentKind] = &[
    ContentKind::Empty,
    ContentKind::Simple,
    ContentKind::Templated,
];

/// Request payload for Postmark's `email` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostmarkMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cc: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bcc: String,
    pub track_opens: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<PostmarkAttachment>,
}

/// Request payload for Postmark's `email/withTemplate` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostmarkTemplateMessage {
    pub from: String,
    pub to: String,
    pub template_id: i64,
    pub template_model: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cc: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bcc: String,
    pub track_opens: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<PostmarkAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostmarkAttachment {
    pub name: String,
    pub content: String,
    pub content_type: String,
    #[serde(rename = "ContentID", skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Successful response from either send endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PostmarkResponse {
    #[serde(rename = "MessageID")]
    pub message_id: String,
}

/// A failure reported by the Postmark API or its transport.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Postmark returned status {http_status} (API code {api_error_code}): {message}")]
pub struct PostmarkApiError {
    pub http_status: u16,
    pub api_error_code: i64,
    pub message: String,
}

/// The narrow slice of the Postmark API the courier depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostmarkApi: Send + Sync {
    async fn send_email(&self, message: &PostmarkMessage)
        -> Result<PostmarkResponse, PostmarkApiError>;

    async fn send_email_with_template(
        &self,
        message: &PostmarkTemplateMessage,
    ) -> Result<PostmarkResponse, PostmarkApiError>;
}

/// HTTP client for the Postmark API.
pub struct PostmarkClient {
    http: Client,
    server_token: String,
    base_url: String,
}

impl PostmarkClient {
    pub fn new(server_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_token: server_token.into(),
            base_url: POSTMARK_API_URL.to_string(),
        }
    }

    /// Point the client at a different base URL, e.g. a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Create from environment variables.
    ///
    /// Expects `POSTMARK_SERVER_TOKEN`.
    pub fn from_env() -> CourierResult<Self> {
        let server_token = std::env::var("POSTMARK_SERVER_TOKEN").map_err(|_| {
            CourierError::Validation("POSTMARK_SERVER_TOKEN not set".to_string())
        })?;

        Ok(Self::new(server_token))
    }

    async fn request<B>(&self, path: &str, body: &B) -> Result<PostmarkResponse, PostmarkApiError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let transport_error = |e: reqwest::Error| PostmarkApiError {
            http_status: 0,
            api_error_code: 0,
            message: e.to_string(),
        };

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("X-Postmark-Server-Token", &self.server_token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();

        if status.is_success() {
            return response.json::<PostmarkResponse>().await.map_err(transport_error);
        }

        #[derive(Default, Deserialize)]
        struct ErrorBody {
            #[serde(rename = "ErrorCode", default)]
            error_code: i64,
            #[serde(rename = "Message", default)]
            message: String,
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();

        Err(PostmarkApiError {
            http_status: status.as_u16(),
            api_error_code: parsed.error_code,
            message: if parsed.message.is_empty() {
                body
            } else {
                parsed.message
            },
        })
    }
}

#[async_trait]
impl PostmarkApi for PostmarkClient {
    async fn send_email(
        &self,
        message: &PostmarkMessage,
    ) -> Result<PostmarkResponse, PostmarkApiError> {
        self.request("/email", message).await
    }

    async fn send_email_with_template(
        &self,
        message: &PostmarkTemplateMessage,
    ) -> Result<PostmarkResponse, PostmarkApiError> {
        self.request("/email/withTemplate", message).await
    }
}

/// Courier backed by the Postmark API.
pub struct PostmarkCourier<A: PostmarkApi> {
    api: A,
    receipts: ReceiptStore,
}

impl<A: PostmarkApi> PostmarkCourier<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            receipts: ReceiptStore::new(),
        }
    }

    fn build_reply_to(email: &Email) -> Option<String> {
        // Postmark only supports a single reply-to; extras are dropped.
        email.reply_to.first().map(|address| address.to_rfc2822())
    }

    /// Collapse the header list into a map, last value winning per field.
    fn build_headers(email: &Email) -> BTreeMap<String, String> {
        email
            .headers
            .iter()
            .map(|header| (header.field.clone(), header.value.clone()))
            .collect()
    }

    /// Regular and embedded attachments share one list; only embedded
    /// entries carry a content id.
    fn build_attachments(email: &Email) -> CourierResult<Vec<PostmarkAttachment>> {
        email
            .attachments
            .iter()
            .chain(email.embedded.iter())
            .map(|attachment| {
                Ok(PostmarkAttachment {
                    name: attachment.name.clone(),
                    content: attachment.base64_content()?,
                    content_type: attachment.content_type.clone(),
                    content_id: attachment.content_id.clone(),
                })
            })
            .collect()
    }

    fn build_template_message(
        email: &Email,
        template_id: &str,
        template_data: &Map<String, Value>,
    ) -> CourierResult<PostmarkTemplateMessage> {
        let template_id: i64 = template_id.parse().map_err(|_| {
            CourierError::Validation(format!(
                "Postmark template ids must be numeric, got '{template_id}'"
            ))
        })?;

        let mut template_model = template_data.clone();
        // The subject travels inside the template model for dynamic replacement.
        template_model.insert("subject".to_string(), Value::String(email.subject.clone()));

        Ok(PostmarkTemplateMessage {
            from: email.from.to_rfc2822(),
            to: join_addresses(&email.to, ","),
            template_id,
            template_model,
            reply_to: Self::build_reply_to(email),
            cc: join_addresses(&email.cc, ","),
            bcc: join_addresses(&email.bcc, ","),
            track_opens: true,
            headers: Self::build_headers(email),
            attachments: Self::build_attachments(email)?,
        })
    }

    fn build_message(email: &Email) -> CourierResult<PostmarkMessage> {
        let (html_body, text_body) = match &email.content {
            Content::Simple { html, text } => (html.clone(), text.clone()),
            // An empty body is not accepted by Postmark, so stand in a marker.
            _ => (
                Some("No message".to_string()),
                Some("No message".to_string()),
            ),
        };

        Ok(PostmarkMessage {
            from: email.from.to_rfc2822(),
            to: join_addresses(&email.to, ","),
            subject: email.subject.clone(),
            html_body,
            text_body,
            reply_to: Self::build_reply_to(email),
            cc: join_addresses(&email.cc, ","),
            bcc: join_addresses(&email.bcc, ","),
            track_opens: true,
            headers: Self::build_headers(email),
            attachments: Self::build_attachments(email)?,
        })
    }

    fn translate_error(error: PostmarkApiError) -> CourierError {
        error!(
            status = error.http_status,
            api_code = error.api_error_code,
            message = %error.message,
            "Postmark rejected the email"
        );

        CourierError::transmission(Some(error.api_error_code), error)
    }
}

#[async_trait]
impl<A: PostmarkApi> Courier for PostmarkCourier<A> {
    async fn deliver(&self, email: &Email) -> CourierResult<()> {
        ensure_supported(email, SUPPORTED_CONTENT)?;

        let response = match &email.content {
            Content::Templated {
                template_id,
                template_data,
            } => {
                let message = Self::build_template_message(email, template_id, template_data)?;

                debug!(template_id = message.template_id, to = %message.to, "sending templated email via Postmark");

                self.api
                    .send_email_with_template(&message)
                    .await
                    .map_err(Self::translate_error)?
            }
            _ => {
                let message = Self::build_message(email)?;

                debug!(subject = %message.subject, to = %message.to, "sending email via Postmark");

                self.api
                    .send_email(&message)
                    .await
                    .map_err(Self::translate_error)?
            }
        };

        self.receipts.save(email, response.message_id);

        Ok(())
    }
}

impl<A: PostmarkApi> ConfirmingCourier for PostmarkCourier<A> {
    fn receipt_for(&self, email: &Email) -> CourierResult<String> {
        self.receipts.receipt_for(email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, Attachment};
    use serde_json::json;

    fn response(message_id: &str) -> PostmarkResponse {
        PostmarkResponse {
            message_id: message_id.to_string(),
        }
    }

    fn base_email() -> Email {
        Email::new(
            Address::new("sender@example.com").with_name("Sender"),
            "A subject",
        )
        .to(Address::new("to@example.com"))
    }

    #[tokio::test]
    async fn sends_simple_content_and_records_the_receipt() {
        let mut api = MockPostmarkApi::new();
        api.expect_send_email()
            .withf(|message: &PostmarkMessage| {
                message.from == "Sender <sender@example.com>"
                    && message.to == "to@example.com"
                    && message.subject == "A subject"
                    && message.html_body.as_deref() == Some("<b>Hello</b>")
                    && message.text_body.is_none()
            })
            .times(1)
            .returning(|_| Ok(response("pm-1")));

        let courier = PostmarkCourier::new(api);
        let email = base_email().with_content(Content::html("<b>Hello</b>"));

        courier.deliver(&email).await.unwrap();
        assert_eq!(courier.receipt_for(&email).unwrap(), "pm-1");
    }

    #[tokio::test]
    async fn empty_content_sends_a_placeholder_body() {
        let mut api = MockPostmarkApi::new();
        api.expect_send_email()
            .withf(|message: &PostmarkMessage| {
                message.html_body.as_deref() == Some("No message")
                    && message.text_body.as_deref() == Some("No message")
            })
            .times(1)
            .returning(|_| Ok(response("pm-2")));

        let courier = PostmarkCourier::new(api);
        courier.deliver(&base_email()).await.unwrap();
    }

    #[tokio::test]
    async fn templated_content_injects_the_subject_and_uses_first_reply_to() {
        let mut api = MockPostmarkApi::new();
        api.expect_send_email_with_template()
            .withf(|message: &PostmarkTemplateMessage| {
                message.template_id == 1234
                    && message.template_model.get("name") == Some(&json!("Jordan"))
                    && message.template_model.get("subject") == Some(&json!("A subject"))
                    && message.reply_to.as_deref() == Some("first@example.com")
            })
            .times(1)
            .returning(|_| Ok(response("pm-3")));

        let mut template_data = Map::new();
        template_data.insert("name".to_string(), json!("Jordan"));

        let courier = PostmarkCourier::new(api);
        let email = base_email()
            .reply_to(Address::new("first@example.com"))
            .reply_to(Address::new("second@example.com"))
            .with_content(Content::templated("1234", template_data));

        courier.deliver(&email).await.unwrap();
        assert_eq!(courier.receipt_for(&email).unwrap(), "pm-3");
    }

    #[tokio::test]
    async fn non_numeric_template_id_fails_before_any_call() {
        // No expectations registered: any API call would panic the mock.
        let api = MockPostmarkApi::new();
        let courier = PostmarkCourier::new(api);

        let email = base_email().with_content(Content::templated("not-a-number", Map::new()));

        let err = courier.deliver(&email).await.unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[tokio::test]
    async fn merges_regular_and_embedded_attachments() {
        let mut api = MockPostmarkApi::new();
        api.expect_send_email()
            .withf(|message: &PostmarkMessage| {
                message.attachments.len() == 2
                    && message.attachments[0].content_id.is_none()
                    && message.attachments[1].content_id.as_deref() == Some("logo")
                    && message.attachments[1].content == "aGVsbG8="
            })
            .times(1)
            .returning(|_| Ok(response("pm-4")));

        let courier = PostmarkCourier::new(api);
        let email = base_email()
            .with_content(Content::text("body"))
            .attach(Attachment::from_bytes("a.txt", "text/plain", b"doc".to_vec()))
            .embed(
                Attachment::from_bytes("logo.png", "image/png", b"hello".to_vec()),
                "logo",
            );

        courier.deliver(&email).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_header_fields_overwrite_last_wins() {
        let mut api = MockPostmarkApi::new();
        api.expect_send_email()
            .withf(|message: &PostmarkMessage| {
                message.headers.get("X-Test").map(String::as_str) == Some("second")
            })
            .times(1)
            .returning(|_| Ok(response("pm-5")));

        let courier = PostmarkCourier::new(api);
        let email = base_email()
            .with_content(Content::text("body"))
            .header("X-Test", "first")
            .header("X-Test", "second");

        courier.deliver(&email).await.unwrap();
    }

    #[tokio::test]
    async fn provider_errors_become_transmission_failures_with_the_api_code() {
        let mut api = MockPostmarkApi::new();
        api.expect_send_email().times(1).returning(|_| {
            Err(PostmarkApiError {
                http_status: 422,
                api_error_code: 300,
                message: "Invalid email request".to_string(),
            })
        });

        let courier = PostmarkCourier::new(api);
        let email = base_email().with_content(Content::text("body"));

        let err = courier.deliver(&email).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::Transmission {
                code: Some(300),
                ..
            }
        ));
        assert!(matches!(
            courier.receipt_for(&email),
            Err(CourierError::Receipt)
        ));
    }
}
