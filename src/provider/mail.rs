//! Raw MIME courier over a `mail`-style transport.
//!
//! A drop-in option for local development: the courier assembles a
//! multipart/alternative message by hand and hands it to a [`MailTransport`],
//! by default the local sendmail binary. Template rendering is not
//! implemented; templated emails are delivered as a plain-text description of
//! the template id and data.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error};

use crate::error::{CourierError, CourierResult};
use crate::models::{Attachment, Content, ContentKind, Email};
use crate::provider::{ensure_supported, join_addresses, Courier};

const SUPPORTED_CONTENT: &[ContentKind] = &[ContentKind::Simple, ContentKind::Templated];

/// The `mail(to, subject, body, headers)` primitive the courier delivers
/// through. `headers` is a CRLF-joined header block.
#[cfg_attr(test, mockall::automock)]
pub trait MailTransport: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str, headers: &str) -> std::io::Result<()>;
}

/// Pipes the assembled message to a local sendmail binary.
pub struct SendmailTransport {
    path: PathBuf,
}

impl SendmailTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SendmailTransport {
    fn default() -> Self {
        Self::new("/usr/sbin/sendmail")
    }
}

impl MailTransport for SendmailTransport {
    fn send(&self, to: &str, subject: &str, body: &str, headers: &str) -> std::io::Result<()> {
        let mut child = Command::new(&self.path)
            .arg("-t")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let message = format!("To: {to}\r\nSubject: {subject}\r\n{headers}\r\n\r\n{body}");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("sendmail stdin was not captured"))?;
        stdin.write_all(message.as_bytes())?;
        drop(stdin);

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        Ok(())
    }
}

/// Courier that hand-builds a multipart/alternative MIME message and sends
/// it through a [`MailTransport`].
pub struct MailCourier<T: MailTransport> {
    transport: T,
}

impl Default for MailCourier<SendmailTransport> {
    fn default() -> Self {
        Self::new(SendmailTransport::default())
    }
}

impl<T: MailTransport> MailCourier<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn build_content_parts(content: &Content) -> Vec<String> {
        let mut parts = Vec::new();

        match content {
            Content::Simple { html, text } => {
                if let Some(text) = text {
                    parts.push(format!(
                        "Content-Type: text/plain; charset=utf-8\r\n\r\n{text}"
                    ));
                }

                if let Some(html) = html {
                    parts.push(format!(
                        "Content-Type: text/html; charset=utf-8\r\n\r\n{html}"
                    ));
                }
            }
            Content::Templated {
                template_id,
                template_data,
            } => {
                let data = serde_json::to_string_pretty(template_data)
                    .unwrap_or_else(|_| "{}".to_string());

                parts.push(format!(
                    "Content-Type: text/plain; charset=utf-8\r\n\r\nTemplate ID: {template_id}\r\nTemplate Data:\r\n\r\n{data}"
                ));
            }
            Content::Empty => {}
        }

        parts
    }

    fn attachment_content_type(attachment: &Attachment) -> String {
        match &attachment.charset {
            Some(charset) => format!("{};{charset}", attachment.content_type),
            None => attachment.content_type.clone(),
        }
    }

    fn build_attachment_parts(email: &Email) -> CourierResult<Vec<String>> {
        let mut parts = Vec::new();

        for attachment in &email.attachments {
            parts.push(format!(
                "Content-Type: {}\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: attachment; filename=\"{}\"\r\n\r\n{}",
                Self::attachment_content_type(attachment),
                attachment.name,
                chunk_base64(&attachment.base64_content()?),
            ));
        }

        for attachment in &email.embedded {
            parts.push(format!(
                "Content-Type: {}\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: inline; filename=\"{}\"\r\nContent-ID: <{}>\r\n\r\n{}",
                Self::attachment_content_type(attachment),
                attachment.name,
                attachment.content_id.as_deref().unwrap_or_default(),
                chunk_base64(&attachment.base64_content()?),
            ));
        }

        Ok(parts)
    }
}

/// Split a base64 string into 76-character lines, each CRLF-terminated.
fn chunk_base64(content: &str) -> String {
    let mut chunked = String::with_capacity(content.len() + content.len() / 38);

    for chunk in content.as_bytes().chunks(76) {
        chunked.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        chunked.push_str("\r\n");
    }

    chunked
}

#[async_trait]
impl<T: MailTransport> Courier for MailCourier<T> {
    async fn deliver(&self, email: &Email) -> CourierResult<()> {
        ensure_supported(email, SUPPORTED_CONTENT)?;

        let boundary = format!("==Multipart_Boundary_{:016x}", rand::rng().random::<u64>());

        let mut headers = vec![
            format!("From: {}", email.from.to_rfc2822()),
            format!("Content-Type: multipart/alternative;boundary=\"{boundary}\""),
        ];

        if !email.cc.is_empty() {
            headers.push(format!("Cc: {}", join_addresses(&email.cc, ", ")));
        }

        if !email.bcc.is_empty() {
            headers.push(format!("Bcc: {}", join_addresses(&email.bcc, ", ")));
        }

        if !email.reply_to.is_empty() {
            headers.push(format!("Reply-To: {}", join_addresses(&email.reply_to, ", ")));
        }

        for header in &email.headers {
            headers.push(format!("{}: {}", header.field, header.value));
        }

        let mut parts = Self::build_content_parts(&email.content);
        parts.extend(Self::build_attachment_parts(email)?);

        let body = format!(
            "--{boundary}\r\n{}",
            parts.join(&format!("\r\n--{boundary}\r\n"))
        );

        debug!(subject = %email.subject, "delivering email via mail transport");

        self.transport
            .send(
                &join_addresses(&email.to, ", "),
                &email.subject,
                &body,
                &headers.join("\r\n"),
            )
            .map_err(|e| {
                error!(message = %e, "mail transport failed to send");
                CourierError::transmission(None, e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;
    use serde_json::{json, Map};

    fn base_email() -> Email {
        Email::new(
            Address::new("sender@example.com").with_name("Sender"),
            "A subject",
        )
        .to(Address::new("to@example.com"))
    }

    #[tokio::test]
    async fn builds_a_multipart_alternative_message() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .withf(|to: &str, subject: &str, body: &str, headers: &str| {
                to == "to@example.com"
                    && subject == "A subject"
                    && body.contains("Content-Type: text/plain; charset=utf-8\r\n\r\nplain")
                    && body.contains("Content-Type: text/html; charset=utf-8\r\n\r\n<b>rich</b>")
                    && headers.contains("From: Sender <sender@example.com>")
                    && headers.contains("Content-Type: multipart/alternative;boundary=\"==Multipart_Boundary_")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let courier = MailCourier::new(transport);
        let email = base_email().with_content(Content::simple(
            Some("<b>rich</b>".to_string()),
            Some("plain".to_string()),
        ));

        courier.deliver(&email).await.unwrap();
    }

    #[tokio::test]
    async fn recipient_and_custom_headers_are_included() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .withf(|_, _, _, headers: &str| {
                headers.contains("Cc: cc@example.com")
                    && headers.contains("Bcc: bcc@example.com")
                    && headers.contains("Reply-To: reply@example.com")
                    && headers.contains("X-Test: value")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let courier = MailCourier::new(transport);
        let email = base_email()
            .cc(Address::new("cc@example.com"))
            .bcc(Address::new("bcc@example.com"))
            .reply_to(Address::new("reply@example.com"))
            .header("X-Test", "value")
            .with_content(Content::text("body"));

        courier.deliver(&email).await.unwrap();
    }

    #[tokio::test]
    async fn templated_content_renders_the_template_description() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .withf(|_, _, body: &str, _| {
                body.contains("Template ID: tpl-1")
                    && body.contains("Template Data:")
                    && body.contains("\"name\": \"Jordan\"")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut template_data = Map::new();
        template_data.insert("name".to_string(), json!("Jordan"));

        let courier = MailCourier::new(transport);
        let email = base_email().with_content(Content::templated("tpl-1", template_data));

        courier.deliver(&email).await.unwrap();
    }

    #[tokio::test]
    async fn empty_content_is_rejected_before_the_transport_is_called() {
        // No expectations: any transport call would panic the mock.
        let transport = MockMailTransport::new();
        let courier = MailCourier::new(transport);

        let err = courier.deliver(&base_email()).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::UnsupportedContent(ContentKind::Empty)
        ));
    }

    #[tokio::test]
    async fn attachments_are_base64_parts_with_dispositions() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .withf(|_, _, body: &str, _| {
                body.contains("Content-Disposition: attachment; filename=\"a.txt\"")
                    && body.contains("Content-Transfer-Encoding: base64")
                    && body.contains("Content-Disposition: inline; filename=\"logo.png\"")
                    && body.contains("Content-ID: <logo>")
                    && body.contains("aGVsbG8=")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let courier = MailCourier::new(transport);
        let email = base_email()
            .with_content(Content::text("body"))
            .attach(Attachment::from_bytes("a.txt", "text/plain", b"hello".to_vec()))
            .embed(
                Attachment::from_bytes("logo.png", "image/png", b"img".to_vec()),
                "logo",
            );

        courier.deliver(&email).await.unwrap();
    }

    #[tokio::test]
    async fn transport_failures_become_transmission_errors() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _, _, _| Err(std::io::Error::other("mail failed")));

        let courier = MailCourier::new(transport);
        let email = base_email().with_content(Content::text("body"));

        let err = courier.deliver(&email).await.unwrap_err();
        assert!(matches!(err, CourierError::Transmission { code: None, .. }));
    }

    #[test]
    fn chunks_long_base64_into_76_character_lines() {
        let content = "A".repeat(100);
        let chunked = chunk_base64(&content);

        let lines: Vec<&str> = chunked.trim_end().split("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 24);
    }
}
