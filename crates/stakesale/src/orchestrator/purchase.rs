use tracing::{debug, info, warn};

use super::{parse_amount, Completed};
use crate::bindings::SaleBindings;
use crate::connector::Signer;
use crate::error::Error;
use crate::loader::SaleReadModel;
use crate::types::transaction::{Receipt, TxHash};
use crate::types::units::{unit, TokenAmount};

#[derive(Debug)]
pub enum PurchaseState {
    Idle,
    Submitted { amount: TokenAmount, tx: TxHash },
    Confirmed { amount: TokenAmount, receipt: Receipt },
    Failed(Error),
}

impl PurchaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseState::Confirmed { .. } | PurchaseState::Failed(_))
    }
}

/// Buy sale tokens at the current fixed price.
pub struct PurchaseFlow<'a> {
    bindings: &'a SaleBindings,
    signer: &'a Signer,
    amount: String,
}

impl<'a> PurchaseFlow<'a> {
    pub fn new(bindings: &'a SaleBindings, signer: &'a Signer, amount: impl Into<String>) -> Self {
        Self {
            bindings,
            signer,
            amount: amount.into(),
        }
    }

    pub async fn transition(&self, state: PurchaseState) -> PurchaseState {
        if state.is_terminal() {
            return state;
        }
        match self.step(state).await {
            Ok(next) => {
                debug!(state = ?next, "purchase flow advanced");
                next
            }
            Err(e) => {
                warn!(error = %e, "purchase flow failed");
                PurchaseState::Failed(e)
            }
        }
    }

    async fn step(&self, state: PurchaseState) -> Result<PurchaseState, Error> {
        let crowdsale = &self.bindings.crowdsale;

        match state {
            PurchaseState::Idle => {
                let decimals = crowdsale.token_decimals();
                let amount = parse_amount(&self.amount, decimals)?;
                // price may have changed since the page loaded
                let price = crowdsale.price().await?;
                let value = &amount.raw * &price.raw / unit(decimals);
                debug!(amount = %amount, price = %price, value = %value, "purchase priced");

                let tx = crowdsale.submit_purchase(self.signer, &amount, value).await?;
                Ok(PurchaseState::Submitted { amount, tx })
            }
            PurchaseState::Submitted { amount, tx } => {
                let receipt = self.signer.confirm(&tx).await?;
                Ok(PurchaseState::Confirmed { amount, receipt })
            }
            terminal => Ok(terminal),
        }
    }

    pub async fn run(&self) -> PurchaseState {
        let mut state = PurchaseState::Idle;
        while !state.is_terminal() {
            state = self.transition(state).await;
        }
        state
    }
}

/// Purchase, then reload the read model on confirmation.
pub async fn purchase(
    bindings: &SaleBindings,
    signer: &Signer,
    amount: &str,
    model: &mut SaleReadModel,
) -> Result<Completed, Error> {
    match PurchaseFlow::new(bindings, signer, amount).run().await {
        PurchaseState::Confirmed { amount, receipt } => {
            info!(amount = %amount, hash = %receipt.hash, "purchase confirmed");
            model.reload(bindings, Some(signer.account())).await;
            Ok(Completed { amount, receipt })
        }
        PurchaseState::Failed(e) => Err(e),
        other => Err(Error::NetworkError(format!("purchase ended in {other:?}"))),
    }
}
