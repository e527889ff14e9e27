//! Courier implementations, one per delivery provider.

pub mod logging;
pub mod mail;
pub mod null;
pub mod postmark;
pub mod sendgrid;
pub mod smtp;
pub mod sparkpost;

pub use logging::LoggingCourier;
pub use mail::{MailCourier, MailTransport, SendmailTransport};
pub use null::NullCourier;
pub use postmark::{PostmarkApi, PostmarkClient, PostmarkCourier};
pub use sendgrid::{SendGridApi, SendGridClient, SendGridCourier};
pub use smtp::{SmtpConfig, SmtpCourier};
pub use sparkpost::{SparkPostApi, SparkPostClient, SparkPostCourier};

use async_trait::async_trait;

use crate::error::{CourierError, CourierResult};
use crate::models::{ContentKind, Email};

/// A courier translates the unified [`Email`] model into one provider's
/// request format and performs a single delivery attempt.
#[async_trait]
pub trait Courier: Send + Sync {
    /// Deliver the email through this courier's provider.
    ///
    /// Performs at most one outbound call; failures are terminal, retry
    /// policy is a caller concern. The email is never mutated.
    async fn deliver(&self, email: &Email) -> CourierResult<()>;
}

/// A courier that records a provider-issued receipt on each successful
/// delivery, retrievable for the same email instance.
pub trait ConfirmingCourier: Courier {
    /// The receipt recorded by the most recent successful [`Courier::deliver`]
    /// call for this exact email instance.
    fn receipt_for(&self, email: &Email) -> CourierResult<String>;
}

/// Fail closed when the email's content variant is outside the courier's
/// declared capability set.
pub(crate) fn ensure_supported(email: &Email, supported: &[ContentKind]) -> CourierResult<()> {
    let kind = email.content.kind();
    if supported.contains(&kind) {
        Ok(())
    } else {
        Err(CourierError::UnsupportedContent(kind))
    }
}

/// Comma-join addresses in their RFC 2822 display form.
pub(crate) fn join_addresses(addresses: &[crate::models::Address], separator: &str) -> String {
    addresses
        .iter()
        .map(|address| address.to_rfc2822())
        .collect::<Vec<_>>()
        .join(separator)
}
