//! Logging courier
//!
//! Writes every structural field of the email to the `tracing` debug sink
//! instead of delivering it. Useful as a drop-in local implementation when
//! the message body matters (e.g. generated password-reset links) but no
//! real delivery should happen. Accepts every content variant.

use async_trait::async_trait;
use tracing::debug;

use crate::error::CourierResult;
use crate::models::{Content, Email};
use crate::provider::{join_addresses, Courier};

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCourier;

impl LoggingCourier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Courier for LoggingCourier {
    async fn deliver(&self, email: &Email) -> CourierResult<()> {
        debug!(
            subject = %email.subject,
            from = %email.from.to_rfc2822(),
            reply_to = %join_addresses(&email.reply_to, ", "),
            to = %join_addresses(&email.to, ", "),
            cc = %join_addresses(&email.cc, ", "),
            bcc = %join_addresses(&email.bcc, ", "),
            "delivered email"
        );

        for header in &email.headers {
            debug!(field = %header.field, value = %header.value, "header");
        }

        let attachment_names = email
            .attachments
            .iter()
            .map(|attachment| attachment.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let embedded_ids = email
            .embedded
            .iter()
            .map(|attachment| attachment.content_id.as_deref().unwrap_or("NA"))
            .collect::<Vec<_>>()
            .join(", ");

        debug!(attaching = %attachment_names, embedding = %embedded_ids, "attachments");

        match &email.content {
            Content::Templated {
                template_id,
                template_data,
            } => {
                let data = serde_json::to_string_pretty(template_data)
                    .unwrap_or_else(|_| "{}".to_string());
                debug!(template_id = %template_id, template_data = %data, "templated content");
            }
            Content::Simple { html, text } => {
                debug!(
                    html = %html.as_deref().unwrap_or_default(),
                    text = %text.as_deref().unwrap_or_default(),
                    "simple content"
                );
            }
            Content::Empty => {
                debug!("empty content");
            }
        }

        Ok(())
    }
}
