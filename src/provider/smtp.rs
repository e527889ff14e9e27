//! SMTP courier using lettre
//!
//! The generic mail-transport courier: message construction lives here, the
//! actual transmission is delegated to an injected [`AsyncTransport`]. Unlike
//! the API-backed couriers it supports every reply-to address, but it only
//! accepts file-backed attachments.

use async_trait::async_trait;
use lettre::{
    message::{
        header::ContentType, Attachment as MessagePart, Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::error::{CourierError, CourierResult};
use crate::models::{Address, Content, ContentKind, Email};
use crate::provider::{ensure_supported, Courier};

const SUPPORTED_CONTENT: &[ContentKind] = &[ContentKind::Empty, ContentKind::Simple];

/// SMTP connection configuration.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

/// Courier that builds an RFC 5322 message with lettre and hands it to the
/// injected transport. Transport failures surface as transmission errors
/// with the underlying error attached; nothing else is interpreted.
pub struct SmtpCourier<T> {
    transport: T,
}

impl SmtpCourier<AsyncSmtpTransport<Tokio1Executor>> {
    /// Create a courier over an SMTP relay.
    pub fn new(config: SmtpConfig) -> CourierResult<Self> {
        let transport = if config.use_tls {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| {
                    CourierError::Validation(format!("failed to create SMTP relay: {e}"))
                })?
                .credentials(creds)
                .port(config.port)
                .build()
        } else if !config.username.is_empty() {
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .credentials(creds)
                .port(config.port)
                .build()
        } else {
            // No auth (for Mailpit/Mailhog).
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        };

        Ok(Self { transport })
    }

    /// Create a courier from environment variables.
    ///
    /// Expects `SMTP_HOST`; `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD` and
    /// `SMTP_USE_TLS` are optional.
    pub fn from_env() -> CourierResult<Self> {
        let config = SmtpConfig {
            host: std::env::var("SMTP_HOST")
                .map_err(|_| CourierError::Validation("SMTP_HOST not set".to_string()))?,
            port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| CourierError::Validation("invalid SMTP_PORT".to_string()))?,
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        };

        Self::new(config)
    }
}

impl<T> SmtpCourier<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    /// Use an already-configured transport, e.g. a stub in tests.
    pub fn with_transport(transport: T) -> Self {
        Self { transport }
    }

    fn mailbox(address: &Address) -> CourierResult<Mailbox> {
        let email = address.email.parse().map_err(|e| {
            CourierError::Validation(format!("invalid address '{}': {e}", address.email))
        })?;

        Ok(Mailbox::new(address.name.clone(), email))
    }

    fn attachment_part(attachment: &crate::models::Attachment) -> CourierResult<SinglePart> {
        if attachment.file_path().is_none() {
            return Err(CourierError::Validation(format!(
                "unsupported attachment type: '{}' is {}, only file-backed attachments can be sent over SMTP",
                attachment.name,
                attachment.body_kind()
            )));
        }

        let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
            CourierError::Validation(format!(
                "invalid content type '{}': {e}",
                attachment.content_type
            ))
        })?;

        Ok(MessagePart::new(attachment.name.clone()).body(attachment.bytes()?, content_type))
    }

    fn build_message(email: &Email) -> CourierResult<Message> {
        let mut builder = Message::builder()
            .from(Self::mailbox(&email.from)?)
            .subject(&email.subject);

        for reply_to in &email.reply_to {
            builder = builder.reply_to(Self::mailbox(reply_to)?);
        }

        for to in &email.to {
            builder = builder.to(Self::mailbox(to)?);
        }

        for cc in &email.cc {
            builder = builder.cc(Self::mailbox(cc)?);
        }

        for bcc in &email.bcc {
            builder = builder.bcc(Self::mailbox(bcc)?);
        }

        // HTML is the preferred body; text rides along as an alternative.
        let (html, text) = match &email.content {
            Content::Simple { html, text } => (html.clone(), text.clone()),
            _ => (None, None),
        };

        let body = match (html, text) {
            (Some(html), Some(text)) => BodyPart::Alternative(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            ),
            (Some(html), None) => BodyPart::Single(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html),
            ),
            (None, Some(text)) => BodyPart::Single(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text),
            ),
            (None, None) => BodyPart::Single(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(String::new()),
            ),
        };

        let structural_error =
            |e: lettre::error::Error| CourierError::Validation(format!("invalid message: {e}"));

        if email.attachments.is_empty() {
            return match body {
                BodyPart::Alternative(multipart) => {
                    builder.multipart(multipart).map_err(structural_error)
                }
                BodyPart::Single(part) => builder.singlepart(part).map_err(structural_error),
            };
        }

        let mut mixed = match body {
            BodyPart::Alternative(multipart) => MultiPart::mixed().multipart(multipart),
            BodyPart::Single(part) => MultiPart::mixed().singlepart(part),
        };

        for attachment in &email.attachments {
            mixed = mixed.singlepart(Self::attachment_part(attachment)?);
        }

        builder.multipart(mixed).map_err(structural_error)
    }
}

enum BodyPart {
    Alternative(MultiPart),
    Single(SinglePart),
}

#[async_trait]
impl<T> Courier for SmtpCourier<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    async fn deliver(&self, email: &Email) -> CourierResult<()> {
        ensure_supported(email, SUPPORTED_CONTENT)?;

        let message = Self::build_message(email)?;

        debug!(subject = %email.subject, "sending email via SMTP");

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| CourierError::transmission(None, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;
    use lettre::transport::stub::AsyncStubTransport;

    fn base_email() -> Email {
        Email::new(
            Address::new("sender@example.com").with_name("Sender"),
            "A subject",
        )
        .to(Address::new("to@example.com"))
    }

    #[tokio::test]
    async fn delivers_simple_content() {
        let transport = AsyncStubTransport::new_ok();
        let courier = SmtpCourier::with_transport(transport.clone());

        let email = base_email()
            .cc(Address::new("cc@example.com"))
            .reply_to(Address::new("first@example.com"))
            .reply_to(Address::new("second@example.com"))
            .with_content(Content::simple(
                Some("<b>rich</b>".to_string()),
                Some("plain".to_string()),
            ));

        courier.deliver(&email).await.unwrap();
        assert_eq!(transport.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_content_sends_an_empty_text_body() {
        let transport = AsyncStubTransport::new_ok();
        let courier = SmtpCourier::with_transport(transport.clone());

        courier.deliver(&base_email()).await.unwrap();
        assert_eq!(transport.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn templated_content_is_rejected_before_sending() {
        let transport = AsyncStubTransport::new_ok();
        let courier = SmtpCourier::with_transport(transport.clone());

        let email = base_email().with_content(Content::templated(
            "tpl-1",
            serde_json::Map::new(),
        ));

        let err = courier.deliver(&email).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::UnsupportedContent(ContentKind::Templated)
        ));
        assert!(transport.messages().await.is_empty());
    }

    #[tokio::test]
    async fn in_memory_attachments_are_rejected() {
        let transport = AsyncStubTransport::new_ok();
        let courier = SmtpCourier::with_transport(transport.clone());

        let email = base_email()
            .with_content(Content::text("body"))
            .attach(Attachment::from_bytes("a.txt", "text/plain", b"doc".to_vec()));

        let err = courier.deliver(&email).await.unwrap_err();
        match err {
            CourierError::Validation(message) => {
                assert!(message.contains("in-memory"), "unexpected message: {message}");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert!(transport.messages().await.is_empty());
    }

    #[tokio::test]
    async fn file_backed_attachments_are_sent() {
        let path = std::env::temp_dir().join("courier-smtp-test.txt");
        std::fs::write(&path, b"doc").unwrap();

        let transport = AsyncStubTransport::new_ok();
        let courier = SmtpCourier::with_transport(transport.clone());

        let email = base_email()
            .with_content(Content::text("body"))
            .attach(Attachment::from_file(&path, "a.txt", "text/plain"));

        courier.deliver(&email).await.unwrap();
        assert_eq!(transport.messages().await.len(), 1);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn transport_failures_become_transmission_errors() {
        let transport = AsyncStubTransport::new_error();
        let courier = SmtpCourier::with_transport(transport);

        let email = base_email().with_content(Content::text("body"));

        let err = courier.deliver(&email).await.unwrap_err();
        assert!(matches!(err, CourierError::Transmission { code: None, .. }));
    }
}
