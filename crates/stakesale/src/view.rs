use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::bindings::{AbiSet, SaleBindings, StakeBindings};
use crate::connector::{ChainConnector, Signer, WalletEvent};
use crate::error::Error;
use crate::loader::{Figure, SaleReadModel, StakeReadModel};
use crate::orchestrator::{self, AmountRequest, Completed, StakeState};
use crate::session::Session;
use crate::types::config::NetworkConfig;
use crate::types::transaction::{PendingTransaction, TxKind};

/// What a screen shows at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Screen {
    pub title: String,
    pub network: Option<String>,
    pub loading: bool,
    pub account: Option<String>,
    pub items: Vec<DisplayItem>,
    pub controls_enabled: bool,
    pub pending: Option<PendingTransaction>,
    pub notification: Option<Notification>,
}

impl Screen {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Value of the item with `label`.
    pub fn value(&self, label: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.label == label)
            .map(|item| item.value.as_str())
    }
}

/// A single label+value pair for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayItem {
    pub label: String,
    pub value: String,
}

impl DisplayItem {
    fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// A figure with an optional unit suffix. The suffix is dropped unless
    /// the figure is ready.
    fn figure<T: fmt::Display>(label: impl Into<String>, figure: &Figure<T>, suffix: &str) -> Self {
        let value = match figure {
            Figure::Ready(v) if !suffix.is_empty() => format!("{v}{suffix}"),
            other => other.display(),
        };
        Self::new(label, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: String,
}

impl Notification {
    fn new(level: NotificationLevel, message: String) -> Self {
        let format = format_description!("[hour]:[minute]:[second] UTC");
        let timestamp = OffsetDateTime::now_utc().format(&format).unwrap_or_default();
        Self {
            level,
            message,
            timestamp,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message.into())
    }

    pub fn error(error: &Error) -> Self {
        Self::new(NotificationLevel::Error, error.user_message())
    }
}

fn network_name(chain_id: u64) -> String {
    match chain_id {
        1 => "Ethereum".to_string(),
        5 => "Goerli".to_string(),
        56 => "BNB Chain".to_string(),
        97 => "BNB Chain Testnet".to_string(),
        137 => "Polygon".to_string(),
        11155111 => "Sepolia".to_string(),
        31337 => "Localhost".to_string(),
        _ => format!("Chain {chain_id}"),
    }
}

/// Symbol of the currency gas and purchases are paid in.
fn native_symbol(chain_id: u64) -> &'static str {
    match chain_id {
        56 | 97 => "BNB",
        137 | 80001 => "MATIC",
        43114 | 43113 => "AVAX",
        250 => "FTM",
        _ => "ETH",
    }
}

/// Session, notification and pending-transaction handling shared by both screens.
struct ViewCore {
    session: Session,
    config: Arc<NetworkConfig>,
    abis: AbiSet,
    pending: Option<PendingTransaction>,
    notification: Option<Notification>,
}

impl ViewCore {
    fn new(connector: Arc<dyn ChainConnector>, config: Arc<NetworkConfig>, abis: AbiSet) -> Self {
        Self {
            session: Session::new(connector),
            config,
            abis,
            pending: None,
            notification: None,
        }
    }

    fn notify_error(&mut self, error: &Error) {
        warn!(error = %error, "operation failed");
        self.notification = Some(Notification::error(error));
    }

    /// Connect and bind; `None` leaves the screen unbound with an alert.
    ///
    /// Refused account access still binds so the public figures load; only
    /// the personal figures stay unknown.
    async fn connect_and_bind<B>(
        &mut self,
        bind: fn(&NetworkConfig, &AbiSet, u64, Arc<dyn ChainConnector>) -> Result<B, Error>,
    ) -> Option<B> {
        self.notification = None;
        self.abandon_pending();
        self.session.begin_loading();
        self.session.drain_events();

        let chain_id = match self.session.connect().await {
            Ok(_) => self.session.chain_id()?,
            Err(e) => {
                self.notify_error(&e);
                self.session.read_chain().await.ok()?
            }
        };
        match bind(&self.config, &self.abis, chain_id, self.session.connector()) {
            Ok(bindings) => Some(bindings),
            Err(e) => {
                self.notify_error(&e);
                None
            }
        }
    }

    /// A submit whose future was dropped never reports back.
    fn abandon_pending(&mut self) {
        if let Some(pending) = self.pending.as_mut().filter(|p| p.is_in_flight()) {
            warn!(
                kind = %pending.kind,
                amount = %pending.amount,
                "abandoning unfinished transaction"
            );
            pending.fail();
        }
    }

    fn idle(&self, bound: bool) -> bool {
        bound
            && !self.session.is_loading()
            && !self.pending.as_ref().is_some_and(PendingTransaction::is_in_flight)
    }

    fn interactive(&self, bound: bool) -> bool {
        self.idle(bound) && self.session.account().is_some()
    }

    /// Check the screen accepts input and record the pending transaction.
    fn begin_submit(&mut self, bound: bool, kind: TxKind, amount: String) -> Result<Signer, Error> {
        if !self.idle(bound) {
            return Err(Error::Busy);
        }
        let signer = self.session.signer()?;
        debug!(kind = %kind, amount = %amount, "submitting");
        self.pending = Some(PendingTransaction::submitted(kind, amount));
        Ok(signer)
    }

    fn finish_submit(
        &mut self,
        kind: TxKind,
        result: Result<Completed, Error>,
    ) -> Result<Completed, Error> {
        match &result {
            Ok(done) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.confirm(done.receipt.hash.clone());
                }
                info!(kind = %kind, amount = %done.amount, "operation confirmed");
                self.notification = Some(Notification::success(format!(
                    "{kind} of {} confirmed.",
                    done.amount
                )));
            }
            Err(e) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.fail();
                }
                self.notify_error(e);
            }
        }
        result
    }

    fn screen(&self, title: &str, items: Vec<DisplayItem>, bound: bool) -> Screen {
        Screen {
            title: title.to_string(),
            network: self.session.chain_id().map(network_name),
            loading: self.session.is_loading(),
            account: self.session.account().map(|a| a.to_checksum()),
            items,
            controls_enabled: self.interactive(bound),
            pending: self.pending.clone(),
            notification: self.notification.clone(),
        }
    }
}

/// Input of the crowdsale form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleForm {
    pub amount: String,
}

/// Crowdsale purchase screen.
pub struct SaleView {
    core: ViewCore,
    bindings: Option<SaleBindings>,
    model: SaleReadModel,
}

impl SaleView {
    pub fn new(connector: Arc<dyn ChainConnector>, config: Arc<NetworkConfig>, abis: AbiSet) -> Self {
        Self {
            core: ViewCore::new(connector, config, abis),
            bindings: None,
            model: SaleReadModel::default(),
        }
    }

    pub async fn mount(&mut self) {
        self.bindings = None;
        self.model.clear();
        self.bindings = self.core.connect_and_bind(SaleBindings::bind).await;
        if let Some(bindings) = &self.bindings {
            self.model.reload(bindings, self.core.session.account()).await;
        }
        self.core.session.finish_loading();
    }

    pub fn handle_event(&mut self, event: &WalletEvent) {
        self.core.session.apply(event);
        self.invalidate();
    }

    pub fn drain_events(&mut self) -> usize {
        let applied = self.core.session.drain_events();
        if applied > 0 {
            self.invalidate();
        }
        applied
    }

    fn invalidate(&mut self) {
        self.bindings = None;
        self.model.clear();
    }

    pub fn controls_enabled(&self) -> bool {
        self.core.interactive(self.bindings.is_some())
    }

    pub fn model(&self) -> &SaleReadModel {
        &self.model
    }

    pub async fn submit(&mut self, form: SaleForm) -> Result<Completed, Error> {
        let kind = TxKind::Purchase;
        let signer = match self.core.begin_submit(self.bindings.is_some(), kind, form.amount.clone()) {
            Ok(signer) => signer,
            Err(e) => {
                self.core.notify_error(&e);
                return Err(e);
            }
        };
        let result = match &self.bindings {
            Some(bindings) => {
                orchestrator::purchase(bindings, &signer, &form.amount, &mut self.model).await
            }
            None => Err(Error::Busy),
        };
        self.core.finish_submit(kind, result)
    }

    pub fn render(&self) -> Screen {
        let native = self
            .core
            .session
            .chain_id()
            .map(native_symbol)
            .unwrap_or("ETH");
        let public = &self.model.public;
        let account = &self.model.account;

        let items = vec![
            DisplayItem::figure("Price", &public.price, &format!(" {native}")),
            DisplayItem::figure("Tokens Sold", &public.tokens_sold, ""),
            DisplayItem::figure("Max Tokens", &public.max_tokens, ""),
            DisplayItem::figure("Progress", &public.progress(), "%"),
            DisplayItem::figure("Your Balance", &account.balance, ""),
            DisplayItem::figure("Your Contribution", &account.contributed, ""),
        ];
        self.core.screen("Crowdsale", items, self.bindings.is_some())
    }
}

/// Input of the staking dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakeForm {
    Stake(AmountRequest),
    Withdraw(AmountRequest),
}

/// Staking and withdraw dashboard.
pub struct StakeView {
    core: ViewCore,
    bindings: Option<StakeBindings>,
    model: StakeReadModel,
}

impl StakeView {
    pub fn new(connector: Arc<dyn ChainConnector>, config: Arc<NetworkConfig>, abis: AbiSet) -> Self {
        Self {
            core: ViewCore::new(connector, config, abis),
            bindings: None,
            model: StakeReadModel::default(),
        }
    }

    pub async fn mount(&mut self) {
        self.bindings = None;
        self.model.clear();
        self.bindings = self.core.connect_and_bind(StakeBindings::bind).await;
        if let Some(bindings) = &self.bindings {
            self.model.reload(bindings, self.core.session.account()).await;
        }
        self.core.session.finish_loading();
    }

    pub fn handle_event(&mut self, event: &WalletEvent) {
        self.core.session.apply(event);
        self.invalidate();
    }

    pub fn drain_events(&mut self) -> usize {
        let applied = self.core.session.drain_events();
        if applied > 0 {
            self.invalidate();
        }
        applied
    }

    fn invalidate(&mut self) {
        self.bindings = None;
        self.model.clear();
    }

    pub fn controls_enabled(&self) -> bool {
        self.core.interactive(self.bindings.is_some())
    }

    pub fn model(&self) -> &StakeReadModel {
        &self.model
    }

    pub async fn submit(&mut self, form: StakeForm) -> Result<Completed, Error> {
        let (kind, request) = match &form {
            StakeForm::Stake(request) => (TxKind::Stake, request),
            StakeForm::Withdraw(request) => (TxKind::Withdraw, request),
        };
        let signer = match self.core.begin_submit(self.bindings.is_some(), kind, request.label()) {
            Ok(signer) => signer,
            Err(e) => {
                self.core.notify_error(&e);
                return Err(e);
            }
        };
        let result = match (&self.bindings, form) {
            (Some(bindings), StakeForm::Stake(request)) => {
                let pending = &mut self.core.pending;
                let track = |state: &StakeState| {
                    let kind = match state {
                        StakeState::Approving { .. } | StakeState::Approved { .. } => {
                            TxKind::Approve
                        }
                        StakeState::Staking { .. } => TxKind::Stake,
                        _ => return,
                    };
                    if let Some(pending) = pending.as_mut() {
                        pending.kind = kind;
                    }
                };
                orchestrator::stake_observed(bindings, &signer, request, &mut self.model, track)
                    .await
            }
            (Some(bindings), StakeForm::Withdraw(request)) => {
                orchestrator::withdraw(bindings, &signer, request, &mut self.model).await
            }
            (None, _) => Err(Error::Busy),
        };
        self.core.finish_submit(kind, result)
    }

    pub fn render(&self) -> Screen {
        let public = &self.model.public;
        let account = &self.model.account;
        let staked_label = match public.symbol.value() {
            Some(symbol) => format!("{symbol} Staked"),
            None => "Staked".to_string(),
        };

        let items = vec![
            DisplayItem::figure("Total Staked", &public.total_staked, ""),
            DisplayItem::figure("Total Stakers", &public.total_stakers, ""),
            DisplayItem::figure("Treasury", &public.treasury, ""),
            DisplayItem::figure("APY", &public.apy, "%"),
            DisplayItem::figure("Total Supply", &public.total_supply, ""),
            DisplayItem::figure("Wallet Balance", &account.balance, ""),
            DisplayItem::figure(staked_label, &account.staked, ""),
            DisplayItem::figure("Gains", &account.gains, ""),
            DisplayItem::figure("Compounded Balance", &account.compound_balance, ""),
        ];
        self.core.screen("Staking", items, self.bindings.is_some())
    }
}
