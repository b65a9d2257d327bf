pub mod abi;
pub mod bindings;
pub mod connector;
pub mod error;
pub mod loader;
pub mod logging;
pub mod orchestrator;
#[cfg(feature = "http")]
pub mod rpc;
pub mod session;
pub mod types;
pub mod view;

#[cfg(test)]
mod sandbox;

use std::sync::Arc;

use error::Error;
use types::config::{SALE_ROLES, STAKE_ROLES};

// Re-exports for convenience
pub use bindings::{AbiSet, SaleBindings, StakeBindings};
pub use connector::{ChainConnector, Signer, WalletEvent};
pub use loader::{Figure, SaleReadModel, StakeReadModel};
pub use orchestrator::AmountRequest;
pub use types::address::Address;
pub use types::config::NetworkConfig;
pub use types::units::TokenAmount;
pub use view::{SaleForm, SaleView, Screen, StakeForm, StakeView};

/// Open the crowdsale screen: validate configuration, then connect and load.
///
/// A wallet or network problem does not fail this call; it is shown on the
/// screen as a notification. Only a configuration missing a crowdsale role is
/// an error.
pub async fn open_crowdsale(
    connector: Arc<dyn ChainConnector>,
    config: Arc<NetworkConfig>,
    abis: AbiSet,
) -> Result<SaleView, Error> {
    config.require_roles(SALE_ROLES)?;
    let mut view = SaleView::new(connector, config, abis);
    view.mount().await;
    Ok(view)
}

/// Open the staking dashboard. Same contract as [`open_crowdsale`].
pub async fn open_stake_dashboard(
    connector: Arc<dyn ChainConnector>,
    config: Arc<NetworkConfig>,
    abis: AbiSet,
) -> Result<StakeView, Error> {
    config.require_roles(STAKE_ROLES)?;
    let mut view = StakeView::new(connector, config, abis);
    view.mount().await;
    Ok(view)
}
