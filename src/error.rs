//! Error taxonomy shared by every courier.

use crate::models::ContentKind;

/// Result type for courier operations.
pub type CourierResult<T> = Result<T, CourierError>;

/// Errors surfaced by [`Courier::deliver`](crate::Courier::deliver) and
/// [`ConfirmingCourier::receipt_for`](crate::ConfirmingCourier::receipt_for).
///
/// Provider-native failures are logged at the catch site and translated into
/// `Transmission`; callers never see reqwest or lettre types except as the
/// boxed `source`. No variant is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// The email's content variant is outside the courier's supported set.
    /// Raised before any network call is attempted.
    #[error("the content type '{0}' is not supported")]
    UnsupportedContent(ContentKind),

    /// The provider call failed: non-2xx status, transport error, or a
    /// missing required response field. `code` carries the provider's
    /// status or API error code when one was available.
    #[error("there was an error communicating with the courier provider")]
    Transmission {
        code: Option<i64>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Structurally invalid input discovered while building a payload.
    #[error("{0}")]
    Validation(String),

    /// No receipt was recorded for the given email instance.
    #[error("unable to find a receipt for the email")]
    Receipt,
}

impl CourierError {
    /// A transmission failure with a provider code and an underlying error.
    pub(crate) fn transmission(
        code: Option<i64>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transmission {
            code,
            source: Some(Box::new(source)),
        }
    }

    /// A transmission failure with only a provider code.
    pub(crate) fn transmission_code(code: i64) -> Self {
        Self::Transmission {
            code: Some(code),
            source: None,
        }
    }
}
