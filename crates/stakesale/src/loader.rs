use std::fmt;

use num_bigint::BigUint;
use serde::Serialize;
use tracing::{debug, warn};

use crate::bindings::{SaleBindings, StakeBindings};
use crate::error::Error;
use crate::types::address::Address;
use crate::types::units::{format_units, TokenAmount};

/// A single figure on screen. `Unknown` is never rendered as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Figure<T> {
    Unknown,
    Ready(T),
    Failed(String),
}

impl<T> Default for Figure<T> {
    fn default() -> Self {
        Figure::Unknown
    }
}

impl<T> Figure<T> {
    fn from_result(name: &str, result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Figure::Ready(value),
            Err(e) => {
                warn!(figure = name, error = %e, "read failed");
                Figure::Failed(e.to_string())
            }
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Figure::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Figure::Ready(_))
    }
}

impl<T: fmt::Display> Figure<T> {
    /// Rendered value: the figure itself, `-` while unknown, `unavailable` on error.
    pub fn display(&self) -> String {
        match self {
            Figure::Ready(v) => v.to_string(),
            Figure::Unknown => "-".to_string(),
            Figure::Failed(_) => "unavailable".to_string(),
        }
    }
}

/// Aggregate crowdsale figures; no account needed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SaleFigures {
    pub price: Figure<TokenAmount>,
    pub max_tokens: Figure<TokenAmount>,
    pub tokens_sold: Figure<TokenAmount>,
}

impl SaleFigures {
    /// Share of `max_tokens` already sold, in percent with two decimals.
    pub fn progress(&self) -> Figure<String> {
        match (self.tokens_sold.value(), self.max_tokens.value()) {
            (Some(sold), Some(max)) => {
                let basis_points = if max.is_zero() {
                    BigUint::from(0u8)
                } else {
                    &sold.raw * BigUint::from(10_000u32) / &max.raw
                };
                Figure::Ready(format_units(&basis_points, 2))
            }
            (None, _) | (_, None) => {
                if matches!(self.tokens_sold, Figure::Failed(_))
                    || matches!(self.max_tokens, Figure::Failed(_))
                {
                    Figure::Failed("progress unavailable".to_string())
                } else {
                    Figure::Unknown
                }
            }
        }
    }
}

/// The connected account's crowdsale figures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SaleAccountFigures {
    pub balance: Figure<TokenAmount>,
    pub contributed: Figure<TokenAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SaleReadModel {
    pub public: SaleFigures,
    pub account: SaleAccountFigures,
}

impl SaleReadModel {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub async fn load_public(&mut self, bindings: &SaleBindings) {
        let crowdsale = &bindings.crowdsale;
        let (price, max_tokens, tokens_sold) =
            tokio::join!(crowdsale.price(), crowdsale.max_tokens(), crowdsale.tokens_sold());

        self.public = SaleFigures {
            price: Figure::from_result("price", price),
            max_tokens: Figure::from_result("maxTokens", max_tokens),
            tokens_sold: Figure::from_result("tokensSold", tokens_sold),
        };
        debug!(chain_id = bindings.chain_id, "sale public pass loaded");
    }

    pub async fn load_account(&mut self, bindings: &SaleBindings, account: Option<Address>) {
        let Some(account) = account else {
            self.account = SaleAccountFigures::default();
            return;
        };
        let (balance, contributed) = tokio::join!(
            bindings.token.balance_of(account),
            bindings.crowdsale.contribution_of(account)
        );

        self.account = SaleAccountFigures {
            balance: Figure::from_result("balanceOf", balance),
            contributed: Figure::from_result("contributions", contributed),
        };
        debug!(account = %account, "sale account pass loaded");
    }

    pub async fn reload(&mut self, bindings: &SaleBindings, account: Option<Address>) {
        self.load_public(bindings).await;
        self.load_account(bindings, account).await;
    }
}

/// Aggregate staking figures; no account needed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StakeFigures {
    pub symbol: Figure<String>,
    pub total_supply: Figure<TokenAmount>,
    pub total_staked: Figure<TokenAmount>,
    pub total_stakers: Figure<BigUint>,
    pub treasury: Figure<TokenAmount>,
    /// Annual yield in whole percent.
    pub apy: Figure<BigUint>,
}

/// The connected account's staking figures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StakeAccountFigures {
    /// Staking asset held in the wallet.
    pub balance: Figure<TokenAmount>,
    pub staked: Figure<TokenAmount>,
    pub gains: Figure<TokenAmount>,
    /// Stake plus reinvested yield.
    pub compound_balance: Figure<TokenAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StakeReadModel {
    pub public: StakeFigures,
    pub account: StakeAccountFigures,
}

impl StakeReadModel {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub async fn load_public(&mut self, bindings: &StakeBindings) {
        let (asset, staking) = (&bindings.asset, &bindings.staking);
        let (symbol, total_supply, total_staked, total_stakers, treasury, apy) = tokio::join!(
            asset.symbol(),
            asset.total_supply(),
            staking.total_staked(),
            staking.total_stakers(),
            staking.treasury_balance(),
            staking.apy(),
        );

        self.public = StakeFigures {
            symbol: Figure::from_result("symbol", symbol),
            total_supply: Figure::from_result("totalSupply", total_supply),
            total_staked: Figure::from_result("totalStaked", total_staked),
            total_stakers: Figure::from_result("totalStakers", total_stakers),
            treasury: Figure::from_result("treasuryBalance", treasury),
            apy: Figure::from_result("apy", apy),
        };
        debug!(chain_id = bindings.chain_id, "staking public pass loaded");
    }

    pub async fn load_account(&mut self, bindings: &StakeBindings, account: Option<Address>) {
        let Some(account) = account else {
            self.account = StakeAccountFigures::default();
            return;
        };
        let (asset, staking) = (&bindings.asset, &bindings.staking);
        let (balance, staked, gains, compound_balance) = tokio::join!(
            asset.balance_of(account),
            staking.stake_of(account),
            staking.gains_of(account),
            staking.compound_balance_of(account),
        );

        self.account = StakeAccountFigures {
            balance: Figure::from_result("balanceOf", balance),
            staked: Figure::from_result("stakeOf", staked),
            gains: Figure::from_result("gainsOf", gains),
            compound_balance: Figure::from_result("compoundBalanceOf", compound_balance),
        };
        debug!(account = %account, "staking account pass loaded");
    }

    pub async fn reload(&mut self, bindings: &StakeBindings, account: Option<Address>) {
        self.load_public(bindings).await;
        self.load_account(bindings, account).await;
    }
}
