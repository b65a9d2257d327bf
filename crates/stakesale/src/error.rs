use thiserror::Error;

use crate::types::units::TokenAmount;

/// Unified error type for wallet, binding, read and transaction failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no wallet available")]
    WalletUnavailable,

    #[error("request rejected by the user")]
    UserRejected,

    #[error("unsupported network {current}, expected one of {}", supported.join(", "))]
    UnsupportedNetwork {
        current: u64,
        supported: Vec<String>,
    },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: TokenAmount,
        available: TokenAmount,
    },

    #[error("approval mismatch: allowance {allowance} is below {required}")]
    ApprovalMismatch {
        allowance: TokenAmount,
        required: TokenAmount,
    },

    #[error("nothing to withdraw")]
    NothingToWithdraw,

    #[error("transaction {hash} reverted")]
    TransactionReverted { hash: String },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("another operation is in progress")]
    Busy,

    #[error("abi error: {0}")]
    Abi(#[from] AbiError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Single-line message suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            Error::WalletUnavailable => {
                "No wallet detected. Install or unlock a wallet and reload.".to_string()
            }
            Error::UserRejected => "The request was rejected in the wallet.".to_string(),
            Error::UnsupportedNetwork { current, supported } => format!(
                "Connected to network {current}, but this app runs on network {}. \
                 Switch networks in your wallet.",
                supported.join(" or ")
            ),
            Error::InsufficientBalance {
                requested,
                available,
            } => format!("Insufficient balance: you tried to use {requested} but only hold {available}."),
            Error::ApprovalMismatch {
                allowance,
                required,
            } => format!(
                "Approval did not cover the amount: allowance is {allowance}, needed {required}."
            ),
            Error::NothingToWithdraw => "There is nothing to withdraw.".to_string(),
            Error::TransactionReverted { hash } => {
                format!("Transaction {hash} was reverted by the contract.")
            }
            Error::NetworkError(msg) => format!("Network error: {msg}"),
            Error::InvalidAmount(msg) => format!("Invalid amount: {msg}"),
            Error::Busy => "Please wait for the current transaction to finish.".to_string(),
            Error::Abi(e) => format!("Contract interface error: {e}"),
            Error::Config(e) => format!("Configuration error: {e}"),
        }
    }
}

/// Errors during ABI parsing, call encoding and return-data decoding.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("invalid function signature: {0}")]
    InvalidSignature(String),

    #[error("return data too short: expected at least {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },

    #[error("invalid ABI encoding: {0}")]
    InvalidEncoding(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("function `{function}` not found in {contract} ABI")]
    MissingFunction { contract: String, function: String },

    #[error("argument mismatch for `{function}`: {reason}")]
    ArgumentMismatch { function: String, reason: String },

    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors while loading or validating network configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("invalid address for {role} on network {network}: {address}")]
    InvalidAddress {
        network: String,
        role: String,
        address: String,
    },

    #[error("network {network} has no {role} entry")]
    MissingRole { network: String, role: String },

    #[error("invalid network id: {0}")]
    InvalidNetworkId(String),

    #[error("invalid RPC URL: {0}")]
    InvalidUrl(String),
}
