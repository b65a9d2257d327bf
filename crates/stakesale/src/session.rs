use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::connector::{request_access, ChainConnector, Signer, WalletEvent};
use crate::error::Error;
use crate::types::address::Address;

/// The wallet connection as one screen sees it.
///
/// Account and network change on wallet events; every change puts the
/// session back into `loading` so the owning screen rebinds and reloads
/// before enabling controls again.
pub struct Session {
    connector: Arc<dyn ChainConnector>,
    account: Option<Address>,
    chain_id: Option<u64>,
    loading: bool,
    events: broadcast::Receiver<WalletEvent>,
}

impl Session {
    pub fn new(connector: Arc<dyn ChainConnector>) -> Self {
        let events = connector.subscribe();
        Self {
            connector,
            account: None,
            chain_id: None,
            loading: true,
            events,
        }
    }

    /// Request account access and read the current network.
    pub async fn connect(&mut self) -> Result<Address, Error> {
        self.loading = true;
        self.account = None;
        let account = request_access(self.connector.as_ref()).await?;
        let chain_id = self.connector.chain_id().await?;
        info!(account = %account, chain_id, "wallet connected");

        self.account = Some(account);
        self.chain_id = Some(chain_id);
        Ok(account)
    }

    /// Read the current network without asking for account access.
    pub async fn read_chain(&mut self) -> Result<u64, Error> {
        let chain_id = self.connector.chain_id().await?;
        debug!(chain_id, "network read without account");
        self.chain_id = Some(chain_id);
        Ok(chain_id)
    }

    pub fn connector(&self) -> Arc<dyn ChainConnector> {
        self.connector.clone()
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn begin_loading(&mut self) {
        self.loading = true;
    }

    pub fn finish_loading(&mut self) {
        self.loading = false;
    }

    /// A signer for the connected account.
    pub fn signer(&self) -> Result<Signer, Error> {
        let account = self.account.ok_or(Error::WalletUnavailable)?;
        Ok(Signer::new(self.connector.clone(), account))
    }

    /// Fold one wallet event into the session.
    pub fn apply(&mut self, event: &WalletEvent) {
        match event {
            WalletEvent::ChainChanged(chain_id) => {
                info!(from = ?self.chain_id, to = chain_id, "network changed");
                self.chain_id = Some(*chain_id);
            }
            WalletEvent::AccountsChanged(accounts) => {
                let account = accounts.first().copied();
                info!(account = ?account.map(|a| a.short()), "account changed");
                self.account = account;
            }
        }
        self.loading = true;
    }

    /// Apply every event queued since the last drain. Returns how many were applied.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.apply(&event);
                    applied += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "wallet events dropped");
                    self.loading = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if applied > 0 {
            debug!(applied, "wallet events applied");
        }
        applied
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .field("loading", &self.loading)
            .finish()
    }
}
