use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::types::address::Address;
use crate::types::transaction::{Receipt, TxHash, TxRequest};

/// Wallet notifications that invalidate the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    ChainChanged(u64),
    AccountsChanged(Vec<Address>),
}

/// The wallet/provider the app talks to.
///
/// Every method crosses the wallet or chain boundary and may suspend.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Ask the wallet for account access. Declining yields `UserRejected`.
    async fn request_accounts(&self) -> Result<Vec<Address>, Error>;

    /// The network id the wallet is currently on.
    async fn chain_id(&self) -> Result<u64, Error>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, Error>;

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, Error>;

    /// Hand a transaction to the wallet for signing and broadcast.
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, Error>;

    /// Wait until the transaction is mined. No timeout is applied here.
    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, Error>;

    /// Subscribe to network and account change notifications.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Request access and return the first authorized account.
pub async fn request_access(connector: &dyn ChainConnector) -> Result<Address, Error> {
    let accounts = connector.request_accounts().await?;
    let account = accounts.first().copied().ok_or(Error::WalletUnavailable)?;
    debug!(account = %account, "wallet access granted");
    Ok(account)
}

/// An unlocked account able to submit transactions through the connector.
///
/// Contract write methods take a `&Signer`; read methods do not.
#[derive(Clone)]
pub struct Signer {
    connector: Arc<dyn ChainConnector>,
    account: Address,
}

impl Signer {
    pub fn new(connector: Arc<dyn ChainConnector>, account: Address) -> Self {
        Self { connector, account }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Build a transaction from this account.
    pub fn transaction(&self, to: Address, data: Vec<u8>, value: BigUint) -> TxRequest {
        TxRequest::new(self.account, to, data).with_value(value)
    }

    pub async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64, Error> {
        self.connector.estimate_gas(tx).await
    }

    pub async fn send(&self, tx: TxRequest) -> Result<TxHash, Error> {
        let to = tx.to;
        let hash = self.connector.send_transaction(tx).await?;
        info!(from = %self.account, to = %to, hash = %hash, "transaction submitted");
        Ok(hash)
    }

    /// Wait for the receipt; a mined-but-failed transaction is `TransactionReverted`.
    pub async fn confirm(&self, hash: &TxHash) -> Result<Receipt, Error> {
        let receipt = self.connector.wait_for_receipt(hash).await?;
        if !receipt.success {
            warn!(hash = %hash, "transaction reverted");
            return Err(Error::TransactionReverted {
                hash: hash.to_string(),
            });
        }
        info!(hash = %hash, block = receipt.block_number, gas_used = receipt.gas_used, "transaction confirmed");
        Ok(receipt)
    }

    /// Send and wait for confirmation.
    pub async fn send_and_confirm(&self, tx: TxRequest) -> Result<Receipt, Error> {
        let hash = self.send(tx).await?;
        self.confirm(&hash).await
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("account", &self.account).finish()
    }
}
