use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::types::address::Address;

/// A transaction to be signed and sent by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
    /// Native currency attached to the call (payable functions only).
    pub value: BigUint,
    /// Explicit gas limit; `None` lets the wallet estimate.
    pub gas: Option<u64>,
}

impl TxRequest {
    pub fn new(from: Address, to: Address, data: Vec<u8>) -> Self {
        Self {
            from,
            to,
            data,
            value: BigUint::from(0u8),
            gas: None,
        }
    }

    pub fn with_value(mut self, value: BigUint) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }
}

/// Transaction hash as returned by the wallet (`0x`-prefixed hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hash: TxHash,
    pub success: bool,
    pub gas_used: u64,
    pub block_number: u64,
}

/// Which user operation a pending transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Purchase,
    Approve,
    Stake,
    Withdraw,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxKind::Purchase => "Purchase",
            TxKind::Approve => "Approve",
            TxKind::Stake => "Stake",
            TxKind::Withdraw => "Withdraw",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// A user-submitted operation tracked by the view until its receipt arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub kind: TxKind,
    pub amount: String,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<TxHash>,
}

impl PendingTransaction {
    pub fn submitted(kind: TxKind, amount: impl Into<String>) -> Self {
        Self {
            kind,
            amount: amount.into(),
            status: TxStatus::Submitted,
            hash: None,
        }
    }

    pub fn confirm(&mut self, hash: TxHash) {
        self.status = TxStatus::Confirmed;
        self.hash = Some(hash);
    }

    pub fn fail(&mut self) {
        self.status = TxStatus::Failed;
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == TxStatus::Submitted
    }
}
