//! Null courier
//!
//! Accepts any email and does nothing with it. A pure no-op test double.

use async_trait::async_trait;

use crate::error::CourierResult;
use crate::models::Email;
use crate::provider::Courier;

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCourier;

impl NullCourier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Courier for NullCourier {
    async fn deliver(&self, _email: &Email) -> CourierResult<()> {
        Ok(())
    }
}
