//! The provider-agnostic email model consumed by every courier.

mod attachment;

pub use attachment::Attachment;

use std::fmt;

use serde_json::{Map, Value};
use uuid::Uuid;

/// A single mailbox: an email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub email: String,
    pub name: Option<String>,
}

impl Address {
    /// Create an address without a display name.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse an address from either `Name <user@example.com>` or a bare
    /// `user@example.com` string.
    pub fn parse(value: &str) -> Result<Self, crate::error::CourierError> {
        let value = value.trim();

        if let Some(open) = value.find('<') {
            let close = value.rfind('>').ok_or_else(|| {
                crate::error::CourierError::Validation(format!(
                    "unable to parse address from '{value}'"
                ))
            })?;

            if close <= open + 1 {
                return Err(crate::error::CourierError::Validation(format!(
                    "unable to parse address from '{value}'"
                )));
            }

            let name = value[..open].trim();
            let email = value[open + 1..close].trim();

            let mut address = Self::new(email);
            if !name.is_empty() {
                address = address.with_name(name);
            }

            return Ok(address);
        }

        if value.is_empty() {
            return Err(crate::error::CourierError::Validation(
                "unable to parse address from an empty string".to_string(),
            ));
        }

        Ok(Self::new(value))
    }

    /// Render the address as an RFC 2822 mailbox, `Name <user@example.com>`
    /// when a display name is present.
    pub fn to_rfc2822(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }

    /// The local part of the address, before the `@`.
    pub fn local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or_default()
    }

    /// The domain of the address, after the `@`.
    pub fn domain(&self) -> &str {
        self.email.splitn(2, '@').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc2822())
    }
}

/// A custom message header. Fields are not required to be unique; couriers
/// that need a map collapse duplicates last-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub field: String,
    pub value: String,
}

impl Header {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// The body of an email: exactly one of the three variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// No body at all. Couriers that require one substitute a placeholder.
    Empty,
    /// A direct HTML and/or plain text body.
    Simple {
        html: Option<String>,
        text: Option<String>,
    },
    /// A provider-hosted template plus substitution data.
    Templated {
        template_id: String,
        template_data: Map<String, Value>,
    },
}

impl Content {
    /// An HTML-and-text body. Either part may be omitted.
    pub fn simple(html: Option<String>, text: Option<String>) -> Self {
        Self::Simple { html, text }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self::Simple {
            html: Some(html.into()),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Simple {
            html: None,
            text: Some(text.into()),
        }
    }

    pub fn templated(template_id: impl Into<String>, template_data: Map<String, Value>) -> Self {
        Self::Templated {
            template_id: template_id.into(),
            template_data,
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Empty => ContentKind::Empty,
            Self::Simple { .. } => ContentKind::Simple,
            Self::Templated { .. } => ContentKind::Templated,
        }
    }
}

/// Names a [`Content`] variant, for capability checks and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Empty,
    Simple,
    Templated,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Simple => "simple",
            Self::Templated => "templated",
        };
        write!(f, "{name}")
    }
}

/// An email message to be handed to a courier.
///
/// The `id` is assigned at construction and identifies this instance for
/// receipt lookups; two structurally identical emails built separately get
/// distinct ids. Insertion order of the recipient lists is preserved and
/// significant for display headers. Entries in `embedded` always carry a
/// content id, enforced by [`Email::embed`].
#[derive(Debug, Clone)]
pub struct Email {
    pub id: Uuid,
    pub subject: String,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub content: Content,
    pub attachments: Vec<Attachment>,
    pub embedded: Vec<Attachment>,
    pub headers: Vec<Header>,
}

impl Email {
    /// Create an email with an empty body.
    pub fn new(from: Address, subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            from,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            content: Content::Empty,
            attachments: Vec::new(),
            embedded: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn to(mut self, address: Address) -> Self {
        self.to.push(address);
        self
    }

    pub fn cc(mut self, address: Address) -> Self {
        self.cc.push(address);
        self
    }

    pub fn bcc(mut self, address: Address) -> Self {
        self.bcc.push(address);
        self
    }

    pub fn reply_to(mut self, address: Address) -> Self {
        self.reply_to.push(address);
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = content;
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Add an inline attachment referenced from the HTML body as
    /// `cid:{content_id}`.
    pub fn embed(mut self, attachment: Attachment, content_id: impl Into<String>) -> Self {
        self.embedded.push(attachment.with_content_id(content_id));
        self
    }

    pub fn header(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(field, value));
        self
    }
}
