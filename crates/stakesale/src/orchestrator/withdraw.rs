use tracing::{debug, info, warn};

use super::{parse_amount, AmountRequest, Completed, GAS_SAFETY_MULTIPLIER};
use crate::bindings::StakeBindings;
use crate::connector::Signer;
use crate::error::Error;
use crate::loader::StakeReadModel;
use crate::types::transaction::Receipt;
use crate::types::units::TokenAmount;

#[derive(Debug)]
pub enum WithdrawState {
    Idle,
    EstimatingGas { amount: TokenAmount },
    Withdrawing { amount: TokenAmount, gas_limit: u64 },
    Confirmed { amount: TokenAmount, receipt: Receipt },
    Failed(Error),
}

impl WithdrawState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawState::Confirmed { .. } | WithdrawState::Failed(_))
    }
}

/// Withdraw with a gas limit of `GAS_SAFETY_MULTIPLIER` times the estimate.
pub struct WithdrawFlow<'a> {
    bindings: &'a StakeBindings,
    signer: &'a Signer,
    request: AmountRequest,
}

impl<'a> WithdrawFlow<'a> {
    pub fn new(bindings: &'a StakeBindings, signer: &'a Signer, request: AmountRequest) -> Self {
        Self {
            bindings,
            signer,
            request,
        }
    }

    pub async fn transition(&self, state: WithdrawState) -> WithdrawState {
        if state.is_terminal() {
            return state;
        }
        match self.step(state).await {
            Ok(next) => {
                debug!(state = ?next, "withdraw flow advanced");
                next
            }
            Err(e) => {
                warn!(error = %e, "withdraw flow failed");
                WithdrawState::Failed(e)
            }
        }
    }

    async fn step(&self, state: WithdrawState) -> Result<WithdrawState, Error> {
        let staking = &self.bindings.staking;

        match state {
            WithdrawState::Idle => {
                let amount = match &self.request {
                    AmountRequest::Exact(input) => {
                        parse_amount(input, self.bindings.asset.decimals())?
                    }
                    AmountRequest::Max => {
                        let compound = staking.compound_balance_of(self.signer.account()).await?;
                        if compound.is_zero() {
                            return Err(Error::NothingToWithdraw);
                        }
                        compound
                    }
                };
                Ok(WithdrawState::EstimatingGas { amount })
            }
            WithdrawState::EstimatingGas { amount } => {
                let estimate = staking.estimate_withdraw(self.signer, &amount).await?;
                let gas_limit = estimate.saturating_mul(GAS_SAFETY_MULTIPLIER);
                debug!(estimate, gas_limit, "withdraw gas estimated");
                Ok(WithdrawState::Withdrawing { amount, gas_limit })
            }
            WithdrawState::Withdrawing { amount, gas_limit } => {
                let receipt = staking.withdraw(self.signer, &amount, gas_limit).await?;
                Ok(WithdrawState::Confirmed { amount, receipt })
            }
            terminal => Ok(terminal),
        }
    }

    pub async fn run(&self) -> WithdrawState {
        let mut state = WithdrawState::Idle;
        while !state.is_terminal() {
            state = self.transition(state).await;
        }
        state
    }
}

/// Withdraw, then reload the read model on confirmation.
pub async fn withdraw(
    bindings: &StakeBindings,
    signer: &Signer,
    request: AmountRequest,
    model: &mut StakeReadModel,
) -> Result<Completed, Error> {
    match WithdrawFlow::new(bindings, signer, request).run().await {
        WithdrawState::Confirmed { amount, receipt } => {
            info!(amount = %amount, hash = %receipt.hash, "withdraw confirmed");
            model.reload(bindings, Some(signer.account())).await;
            Ok(Completed { amount, receipt })
        }
        WithdrawState::Failed(e) => Err(e),
        other => Err(Error::NetworkError(format!("withdraw ended in {other:?}"))),
    }
}
