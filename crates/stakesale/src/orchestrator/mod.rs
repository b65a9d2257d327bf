//! Write flows as explicit state machines.
//!
//! Each flow has one `transition` function mapping a state to its successor.
//! Any failing step lands in the flow's `Failed` state and nothing is retried.
//! The `purchase`, `stake` and `withdraw` entry points run a flow to completion
//! and reload the read model once it confirms.

pub mod purchase;
pub mod stake;
pub mod withdraw;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::transaction::Receipt;
use crate::types::units::TokenAmount;

pub use purchase::{purchase, PurchaseFlow, PurchaseState};
pub use stake::{stake, stake_observed, StakeFlow, StakeState};
pub use withdraw::{withdraw, WithdrawFlow, WithdrawState};

/// Withdraw gas limit is this multiple of the node's estimate.
pub const GAS_SAFETY_MULTIPLIER: u64 = 2;

/// The amount a form asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountRequest {
    /// A user-entered decimal string.
    Exact(String),
    /// Everything available for the operation.
    Max,
}

impl AmountRequest {
    pub fn exact(input: impl Into<String>) -> Self {
        AmountRequest::Exact(input.into())
    }

    /// The entered amount in display form, `max` for the max variant.
    pub fn label(&self) -> String {
        match self {
            AmountRequest::Exact(input) => input.trim().to_string(),
            AmountRequest::Max => "max".to_string(),
        }
    }
}

/// Parse a strictly positive amount. Runs before any chain interaction.
pub(crate) fn parse_amount(input: &str, decimals: u8) -> Result<TokenAmount, Error> {
    let amount = TokenAmount::parse(input, decimals)?;
    if amount.is_zero() {
        return Err(Error::InvalidAmount("amount must be greater than zero".to_string()));
    }
    Ok(amount)
}

/// A confirmed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub amount: TokenAmount,
    pub receipt: Receipt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_rejects_zero() {
        assert!(matches!(parse_amount("0", 8), Err(Error::InvalidAmount(_))));
        assert!(matches!(parse_amount("0.000", 8), Err(Error::InvalidAmount(_))));
        assert!(matches!(parse_amount("abc", 8), Err(Error::InvalidAmount(_))));
        assert_eq!(parse_amount("1.5", 8).unwrap().to_string(), "1.5");
    }

    #[test]
    fn test_amount_request_label() {
        assert_eq!(AmountRequest::exact(" 12.5 ").label(), "12.5");
        assert_eq!(AmountRequest::Max.label(), "max");
    }
}
