use tracing::{debug, info, warn};

use super::{parse_amount, AmountRequest, Completed};
use crate::bindings::{ContractHandle, StakeBindings};
use crate::connector::Signer;
use crate::error::Error;
use crate::loader::StakeReadModel;
use crate::types::transaction::Receipt;
use crate::types::units::TokenAmount;

#[derive(Debug)]
pub enum StakeState {
    Idle,
    /// `None` requests the whole wallet balance.
    ReadingBalance { requested: Option<TokenAmount> },
    Approving { amount: TokenAmount },
    Approved { amount: TokenAmount },
    Staking { amount: TokenAmount },
    Confirmed { amount: TokenAmount, receipt: Receipt },
    Failed(Error),
}

impl StakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StakeState::Confirmed { .. } | StakeState::Failed(_))
    }
}

/// Approve-then-stake.
///
/// The amount is fixed once in `ReadingBalance` and the approval and the stake
/// both use exactly that value.
pub struct StakeFlow<'a> {
    bindings: &'a StakeBindings,
    signer: &'a Signer,
    request: AmountRequest,
}

impl<'a> StakeFlow<'a> {
    pub fn new(bindings: &'a StakeBindings, signer: &'a Signer, request: AmountRequest) -> Self {
        Self {
            bindings,
            signer,
            request,
        }
    }

    pub async fn transition(&self, state: StakeState) -> StakeState {
        if state.is_terminal() {
            return state;
        }
        match self.step(state).await {
            Ok(next) => {
                debug!(state = ?next, "stake flow advanced");
                next
            }
            Err(e) => {
                warn!(error = %e, "stake flow failed");
                StakeState::Failed(e)
            }
        }
    }

    async fn step(&self, state: StakeState) -> Result<StakeState, Error> {
        let asset = &self.bindings.asset;
        let staking = &self.bindings.staking;

        match state {
            StakeState::Idle => {
                let requested = match &self.request {
                    AmountRequest::Exact(input) => Some(parse_amount(input, asset.decimals())?),
                    AmountRequest::Max => None,
                };
                Ok(StakeState::ReadingBalance { requested })
            }
            StakeState::ReadingBalance { requested } => {
                let balance = asset.balance_of(self.signer.account()).await?;
                let amount = match requested {
                    Some(amount) if amount.raw > balance.raw => {
                        return Err(Error::InsufficientBalance {
                            requested: amount,
                            available: balance,
                        });
                    }
                    Some(amount) => amount,
                    None if balance.is_zero() => {
                        return Err(Error::InvalidAmount("no balance to stake".to_string()));
                    }
                    None => balance,
                };
                Ok(StakeState::Approving { amount })
            }
            StakeState::Approving { amount } => {
                asset.approve(self.signer, staking.address(), &amount).await?;
                Ok(StakeState::Approved { amount })
            }
            StakeState::Approved { amount } => {
                let allowance = asset
                    .allowance(self.signer.account(), staking.address())
                    .await?;
                if allowance.raw < amount.raw {
                    return Err(Error::ApprovalMismatch {
                        allowance,
                        required: amount,
                    });
                }
                Ok(StakeState::Staking { amount })
            }
            StakeState::Staking { amount } => {
                let receipt = staking.stake(self.signer, &amount).await?;
                Ok(StakeState::Confirmed { amount, receipt })
            }
            terminal => Ok(terminal),
        }
    }

    /// Drive the flow from `Idle` to a terminal state.
    pub async fn run(&self) -> StakeState {
        self.run_observed(|_| {}).await
    }

    /// Like [`run`](Self::run), calling `observe` with every state entered.
    pub async fn run_observed(&self, mut observe: impl FnMut(&StakeState)) -> StakeState {
        let mut state = StakeState::Idle;
        while !state.is_terminal() {
            state = self.transition(state).await;
            observe(&state);
        }
        state
    }
}

/// Stake, then reload the read model on confirmation.
pub async fn stake(
    bindings: &StakeBindings,
    signer: &Signer,
    request: AmountRequest,
    model: &mut StakeReadModel,
) -> Result<Completed, Error> {
    stake_observed(bindings, signer, request, model, |_| {}).await
}

/// [`stake`] with a callback for every state the flow enters.
pub async fn stake_observed(
    bindings: &StakeBindings,
    signer: &Signer,
    request: AmountRequest,
    model: &mut StakeReadModel,
    observe: impl FnMut(&StakeState),
) -> Result<Completed, Error> {
    match StakeFlow::new(bindings, signer, request).run_observed(observe).await {
        StakeState::Confirmed { amount, receipt } => {
            info!(amount = %amount, hash = %receipt.hash, "stake confirmed");
            model.reload(bindings, Some(signer.account())).await;
            Ok(Completed { amount, receipt })
        }
        StakeState::Failed(e) => Err(e),
        other => Err(Error::NetworkError(format!("stake ended in {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connector::ChainConnector;
    use crate::sandbox::{self, Sandbox};

    fn setup() -> (Arc<Sandbox>, StakeBindings, Signer) {
        let sandbox = Arc::new(Sandbox::new());
        let connector: Arc<dyn ChainConnector> = sandbox.clone();
        let bindings = StakeBindings::bind(
            &sandbox::config(),
            &sandbox::abis(),
            sandbox::CHAIN_ID,
            connector.clone(),
        )
        .unwrap();
        let signer = Signer::new(connector, sandbox.user());
        (sandbox, bindings, signer)
    }

    #[tokio::test]
    async fn test_stake_exact_amount() {
        let (sandbox, bindings, signer) = setup();
        let mut model = StakeReadModel::default();
        model.reload(&bindings, Some(signer.account())).await;
        assert_eq!(model.account.staked.display(), "0.0");

        let done = stake(&bindings, &signer, AmountRequest::exact("50"), &mut model)
            .await
            .unwrap();

        assert_eq!(done.amount.raw, sandbox::asset(50));
        assert_eq!(sandbox.sent_functions(), vec!["approve", "stake"]);
        assert_eq!(sandbox.sent_amount(0), Some(sandbox::asset(50)));
        assert_eq!(sandbox.sent_amount(1), Some(sandbox::asset(50)));
        assert_eq!(model.account.staked.display(), "50");
        assert_eq!(model.account.balance.display(), "50");
        assert_eq!(model.public.total_staked.display(), "1050");
    }

    #[tokio::test]
    async fn test_insufficient_balance_sends_nothing() {
        let (sandbox, bindings, signer) = setup();
        let state = StakeFlow::new(&bindings, &signer, AmountRequest::exact("150"))
            .run()
            .await;

        match state {
            StakeState::Failed(Error::InsufficientBalance { requested, available }) => {
                assert_eq!(requested.raw, sandbox::asset(150));
                assert_eq!(available.raw, sandbox::asset(100));
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert!(sandbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_approval_mismatch_stops_before_stake() {
        let (sandbox, bindings, signer) = setup();
        sandbox.under_apply_approvals(sandbox::asset(1));

        let state = StakeFlow::new(&bindings, &signer, AmountRequest::exact("50"))
            .run()
            .await;

        assert!(matches!(state, StakeState::Failed(Error::ApprovalMismatch { .. })));
        assert_eq!(sandbox.sent_functions(), vec!["approve"]);
        assert_eq!(sandbox.stake_of(sandbox.user()), sandbox::asset(0));
    }

    #[tokio::test]
    async fn test_every_state_is_reachable() {
        let (_sandbox, bindings, signer) = setup();
        let flow = StakeFlow::new(&bindings, &signer, AmountRequest::exact("10"));

        let state = flow.transition(StakeState::Idle).await;
        assert!(matches!(state, StakeState::ReadingBalance { requested: Some(_) }));
        let state = flow.transition(state).await;
        assert!(matches!(state, StakeState::Approving { .. }));
        let state = flow.transition(state).await;
        assert!(matches!(state, StakeState::Approved { .. }));
        let state = flow.transition(state).await;
        assert!(matches!(state, StakeState::Staking { .. }));
        let state = flow.transition(state).await;
        assert!(matches!(state, StakeState::Confirmed { .. }));

        let state = flow.transition(state).await;
        assert!(matches!(state, StakeState::Confirmed { .. }));
    }

    #[tokio::test]
    async fn test_run_observed_reports_each_state() {
        let (_sandbox, bindings, signer) = setup();
        let mut seen = Vec::new();

        let state = StakeFlow::new(&bindings, &signer, AmountRequest::exact("10"))
            .run_observed(|state| seen.push(format!("{state:?}")))
            .await;
        assert!(matches!(state, StakeState::Confirmed { .. }));

        let names: Vec<&str> = seen
            .iter()
            .map(|s| s.split([' ', '(']).next().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec!["ReadingBalance", "Approving", "Approved", "Staking", "Confirmed"]
        );
    }

    #[tokio::test]
    async fn test_user_rejects_approval() {
        let (sandbox, bindings, signer) = setup();
        sandbox.reject_next_transaction();

        let state = StakeFlow::new(&bindings, &signer, AmountRequest::exact("10"))
            .run()
            .await;
        assert!(matches!(state, StakeState::Failed(Error::UserRejected)));
        assert!(sandbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_amount_before_any_call() {
        let (sandbox, bindings, signer) = setup();
        for input in ["", "0", "-5", "1.000000001"] {
            let state = StakeFlow::new(&bindings, &signer, AmountRequest::exact(input))
                .run()
                .await;
            assert!(matches!(state, StakeState::Failed(Error::InvalidAmount(_))), "{input}");
        }
        assert_eq!(sandbox.call_count(), 0);
    }

    #[tokio::test]
    async fn test_max_uses_wallet_balance_not_compounded() {
        let (sandbox, bindings, signer) = setup();
        let user = sandbox.user();
        sandbox.set_stake(user, sandbox::asset(30));
        sandbox.accrue_gains(user, sandbox::asset(5));
        sandbox.transfer_asset(user, sandbox.staking_address(), sandbox::asset(40));

        let mut model = StakeReadModel::default();
        let done = stake(&bindings, &signer, AmountRequest::Max, &mut model)
            .await
            .unwrap();

        assert_eq!(done.amount.raw, sandbox::asset(60));
        assert_eq!(sandbox.sent_amount(0), Some(sandbox::asset(60)));
        assert_eq!(sandbox.sent_amount(1), Some(sandbox::asset(60)));
        assert_eq!(model.account.balance.display(), "0.0");
        assert_eq!(model.account.compound_balance.display(), "95");
    }

    #[tokio::test]
    async fn test_max_amount_is_pinned_after_reading_balance() {
        let (sandbox, bindings, signer) = setup();
        let user = sandbox.user();
        let flow = StakeFlow::new(&bindings, &signer, AmountRequest::Max);

        let state = flow.transition(StakeState::Idle).await;
        let state = flow.transition(state).await;
        let StakeState::Approving { amount } = &state else {
            panic!("unexpected state {state:?}");
        };
        assert_eq!(amount.raw, sandbox::asset(100));

        // balance drops outside the app; the flow keeps the pinned amount
        sandbox.transfer_asset(user, sandbox.staking_address(), sandbox::asset(20));
        let mut state = state;
        while !state.is_terminal() {
            state = flow.transition(state).await;
        }

        assert!(matches!(state, StakeState::Failed(Error::TransactionReverted { .. })));
        assert_eq!(sandbox.sent_amount(0), Some(sandbox::asset(100)));
        assert_eq!(sandbox.sent_amount(1), Some(sandbox::asset(100)));
    }

    #[tokio::test]
    async fn test_max_with_empty_wallet() {
        let (sandbox, bindings, signer) = setup();
        sandbox.set_asset_balance(sandbox.user(), sandbox::asset(0));

        let state = StakeFlow::new(&bindings, &signer, AmountRequest::Max).run().await;
        assert!(matches!(state, StakeState::Failed(Error::InvalidAmount(_))));
        assert!(sandbox.sent().is_empty());
    }
}
