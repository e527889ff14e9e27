//! Courier: one interface for delivering transactional email through
//! multiple providers.
//!
//! A [`Courier`] accepts the provider-agnostic [`Email`](models::Email)
//! model and translates it into a specific provider's request format:
//!
//! - **Postmark** and **SendGrid** over their REST APIs
//! - **SparkPost** over its transmissions API, including an inline
//!   simulation for attachments on templated sends
//! - **SMTP** via lettre, and a raw MIME [`MailCourier`] over a
//!   sendmail-style transport for local development
//! - **Logging** and **Null** stubs for tests
//!
//! Providers that return a message id implement [`ConfirmingCourier`], which
//! records a delivery receipt per email instance.
//!
//! ```ignore
//! use courier::{Courier, ConfirmingCourier, PostmarkClient, PostmarkCourier};
//! use courier::models::{Address, Content, Email};
//!
//! let courier = PostmarkCourier::new(PostmarkClient::from_env()?);
//!
//! let email = Email::new(Address::new("app@example.com"), "Welcome!")
//!     .to(Address::new("user@example.com"))
//!     .with_content(Content::html("<h1>Hello</h1>"));
//!
//! courier.deliver(&email).await?;
//! let receipt = courier.receipt_for(&email)?;
//! ```
//!
//! Each `deliver` call performs a single delivery attempt; there is no
//! internal retry, and failures surface as a
//! [`CourierError`](error::CourierError).

pub mod error;
pub mod models;
pub mod provider;
pub mod receipts;

pub use error::{CourierError, CourierResult};
pub use provider::{
    ConfirmingCourier, Courier, LoggingCourier, MailCourier, MailTransport, NullCourier,
    PostmarkApi, PostmarkClient, PostmarkCourier, SendGridApi, SendGridClient, SendGridCourier,
    SendmailTransport, SmtpConfig, SmtpCourier, SparkPostApi, SparkPostClient, SparkPostCourier,
};
pub use receipts::ReceiptStore;
