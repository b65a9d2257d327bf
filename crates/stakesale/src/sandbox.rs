//! In-memory chain used by the unit tests.
//!
//! Interprets calldata for the token, crowdsale and staking contracts against
//! a small ledger, records every read and transaction, and can inject the
//! failures the orchestrator has to survive.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::broadcast;

use crate::abi::{decode_output, parse_signature, FunctionSignature, Token};
use crate::bindings::AbiSet;
use crate::connector::{ChainConnector, WalletEvent};
use crate::error::Error;
use crate::types::address::Address;
use crate::types::config::NetworkConfig;
use crate::types::transaction::{Receipt, TxHash, TxRequest};
use crate::types::units::unit;

pub(crate) const CHAIN_ID: u64 = 97;
pub(crate) const DEFAULT_GAS_ESTIMATE: u64 = 100_000;

const TOKEN: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
const CROWDSALE: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
const ASSET: &str = "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0";
const STAKING: &str = "0xCf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9";
const USER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const WHALE: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";

pub(crate) const TOKEN_ABI: &str = r#"[
    { "type": "function", "name": "balanceOf", "stateMutability": "view",
      "inputs": [{ "name": "account", "type": "address" }],
      "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "totalSupply", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "allowance", "stateMutability": "view",
      "inputs": [{ "name": "owner", "type": "address" }, { "name": "spender", "type": "address" }],
      "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "approve", "stateMutability": "nonpayable",
      "inputs": [{ "name": "spender", "type": "address" }, { "name": "value", "type": "uint256" }],
      "outputs": [{ "name": "", "type": "bool" }] },
    { "type": "function", "name": "symbol", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "string" }] },
    { "type": "event", "name": "Approval", "anonymous": false, "inputs": [] }
]"#;

pub(crate) const CROWDSALE_ABI: &str = r#"[
    { "type": "function", "name": "price", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "maxTokens", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "tokensSold", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "contributions", "stateMutability": "view",
      "inputs": [{ "name": "", "type": "address" }],
      "outputs": [{ "name": "ethAmount", "type": "uint256" }, { "name": "tokenAmount", "type": "uint256" }] },
    { "type": "function", "name": "buyTokens", "stateMutability": "payable",
      "inputs": [{ "name": "_amount", "type": "uint256" }], "outputs": [] }
]"#;

pub(crate) const STAKING_ABI: &str = r#"[
    { "type": "function", "name": "totalStaked", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "totalStakers", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "treasuryBalance", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "apy", "stateMutability": "view",
      "inputs": [], "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "stakeOf", "stateMutability": "view",
      "inputs": [{ "name": "account", "type": "address" }],
      "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "gainsOf", "stateMutability": "view",
      "inputs": [{ "name": "account", "type": "address" }],
      "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "compoundBalanceOf", "stateMutability": "view",
      "inputs": [{ "name": "account", "type": "address" }],
      "outputs": [{ "name": "", "type": "uint256" }] },
    { "type": "function", "name": "stake", "stateMutability": "nonpayable",
      "inputs": [{ "name": "amount", "type": "uint256" }], "outputs": [] },
    { "type": "function", "name": "withdraw", "stateMutability": "nonpayable",
      "inputs": [{ "name": "amount", "type": "uint256" }], "outputs": [] }
]"#;

const SIGNATURES: &[&str] = &[
    "balanceOf(address)",
    "totalSupply()",
    "allowance(address,address)",
    "approve(address,uint256)",
    "symbol()",
    "price()",
    "maxTokens()",
    "tokensSold()",
    "contributions(address)",
    "buyTokens(uint256)",
    "totalStaked()",
    "totalStakers()",
    "treasuryBalance()",
    "apy()",
    "stakeOf(address)",
    "gainsOf(address)",
    "compoundBalanceOf(address)",
    "stake(uint256)",
    "withdraw(uint256)",
];

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

/// `n` whole units of the 8-decimal staking asset.
pub(crate) fn asset(n: u64) -> BigUint {
    BigUint::from(n) * unit(8)
}

/// `n` whole units of the 18-decimal sale token.
pub(crate) fn tokens(n: u64) -> BigUint {
    BigUint::from(n) * unit(18)
}

pub(crate) fn config_json() -> String {
    format!(
        r#"{{ "{CHAIN_ID}": {{
            "token": {{ "address": "{TOKEN}" }},
            "crowdsale": {{ "address": "{CROWDSALE}" }},
            "stakingAsset": {{ "address": "{ASSET}", "decimals": 8 }},
            "staking": {{ "address": "{STAKING}" }}
        }} }}"#
    )
}

pub(crate) fn config() -> NetworkConfig {
    NetworkConfig::from_json(&config_json()).unwrap()
}

pub(crate) fn abis() -> AbiSet {
    AbiSet::from_json(TOKEN_ABI, CROWDSALE_ABI, STAKING_ABI).unwrap()
}

fn word(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    let mut out = vec![0u8; 32 - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

fn encode_string(s: &str) -> Vec<u8> {
    let mut out = word(&BigUint::from(32u8));
    out.extend(word(&BigUint::from(s.len())));
    let mut body = s.as_bytes().to_vec();
    body.resize(s.len().div_ceil(32) * 32, 0);
    out.extend(body);
    out
}

fn sub_or_zero(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b {
        a - b
    } else {
        BigUint::from(0u8)
    }
}

struct Ledger {
    chain_id: u64,
    accounts: Vec<Address>,
    wallet_present: bool,
    reject_access: bool,

    sale_balances: HashMap<Address, BigUint>,
    asset_balances: HashMap<Address, BigUint>,
    allowances: HashMap<(Address, Address, Address), BigUint>,
    stakes: HashMap<Address, BigUint>,
    gains: HashMap<Address, BigUint>,
    treasury: BigUint,
    apy: u64,
    price: BigUint,
    max_tokens: BigUint,
    tokens_sold: BigUint,
    contributions: HashMap<Address, (BigUint, BigUint)>,

    calls: Vec<String>,
    sent: Vec<TxRequest>,
    receipts: HashMap<TxHash, Receipt>,
    estimates: usize,
    block: u64,

    reject_next_tx: bool,
    stall_receipts: bool,
    revert_next_tx: bool,
    approval_shortfall: BigUint,
    failing_reads: HashSet<String>,
    gas_estimate: u64,
}

impl Ledger {
    fn balance(map: &HashMap<Address, BigUint>, who: &Address) -> BigUint {
        map.get(who).cloned().unwrap_or_default()
    }

    fn total_staked(&self) -> BigUint {
        self.stakes.values().sum()
    }

    fn compound(&self, who: &Address) -> BigUint {
        Self::balance(&self.stakes, who) + Self::balance(&self.gains, who)
    }

    fn read(&self, to: Address, sig: &FunctionSignature, args: &[Token]) -> Option<Vec<u8>> {
        let arg_addr = |i: usize| match args.get(i) {
            Some(Token::Address(a)) => Some(*a),
            _ => None,
        };
        let out = match (sig.name.as_str(), to) {
            ("balanceOf", t) if t == addr(TOKEN) => word(&Self::balance(&self.sale_balances, &arg_addr(0)?)),
            ("balanceOf", t) if t == addr(ASSET) => word(&Self::balance(&self.asset_balances, &arg_addr(0)?)),
            ("totalSupply", t) if t == addr(TOKEN) => word(&self.max_tokens),
            ("totalSupply", t) if t == addr(ASSET) => word(&asset(21_000_000)),
            ("allowance", t) => word(
                &self
                    .allowances
                    .get(&(t, arg_addr(0)?, arg_addr(1)?))
                    .cloned()
                    .unwrap_or_default(),
            ),
            ("symbol", t) if t == addr(TOKEN) => encode_string("OLLIE"),
            ("symbol", t) if t == addr(ASSET) => encode_string("WBNRY"),
            ("price", _) => word(&self.price),
            ("maxTokens", _) => word(&self.max_tokens),
            ("tokensSold", _) => word(&self.tokens_sold),
            ("contributions", _) => {
                let (eth, tokens) = self.contributions.get(&arg_addr(0)?).cloned().unwrap_or_default();
                let mut out = word(&eth);
                out.extend(word(&tokens));
                out
            }
            ("totalStaked", _) => word(&self.total_staked()),
            ("totalStakers", _) => word(&BigUint::from(
                self.stakes.values().filter(|s| **s > BigUint::from(0u8)).count(),
            )),
            ("treasuryBalance", _) => word(&self.treasury),
            ("apy", _) => word(&BigUint::from(self.apy)),
            ("stakeOf", _) => word(&Self::balance(&self.stakes, &arg_addr(0)?)),
            ("gainsOf", _) => word(&Self::balance(&self.gains, &arg_addr(0)?)),
            ("compoundBalanceOf", _) => word(&self.compound(&arg_addr(0)?)),
            _ => return None,
        };
        Some(out)
    }

    /// Apply a transaction; `false` means the contract reverted.
    fn apply(&mut self, tx: &TxRequest) -> bool {
        let Some((sig, args)) = lookup(&tx.data) else {
            return false;
        };
        let uint = |i: usize| match args.get(i) {
            Some(Token::Uint(n)) => Some(n.clone()),
            _ => None,
        };

        match sig.name.as_str() {
            "approve" => {
                let (Some(Token::Address(spender)), Some(amount)) = (args.first(), uint(1)) else {
                    return false;
                };
                let granted = sub_or_zero(&amount, &self.approval_shortfall);
                self.allowances.insert((tx.to, tx.from, *spender), granted);
                true
            }
            "stake" if tx.to == addr(STAKING) => {
                let Some(amount) = uint(0) else { return false };
                let key = (addr(ASSET), tx.from, addr(STAKING));
                let allowance = self.allowances.get(&key).cloned().unwrap_or_default();
                let balance = Self::balance(&self.asset_balances, &tx.from);
                if allowance < amount || balance < amount {
                    return false;
                }
                self.allowances.insert(key, allowance - &amount);
                self.asset_balances.insert(tx.from, balance - &amount);
                *self.stakes.entry(tx.from).or_default() += amount;
                true
            }
            "withdraw" if tx.to == addr(STAKING) => {
                let Some(amount) = uint(0) else { return false };
                if tx.gas.is_some_and(|gas| gas < self.gas_estimate) {
                    return false;
                }
                let compound = self.compound(&tx.from);
                if amount > compound {
                    return false;
                }
                self.stakes.insert(tx.from, compound - &amount);
                self.gains.insert(tx.from, BigUint::from(0u8));
                *self.asset_balances.entry(tx.from).or_default() += amount;
                true
            }
            "buyTokens" if tx.to == addr(CROWDSALE) => {
                let Some(amount) = uint(0) else { return false };
                let cost = &amount * &self.price / unit(18);
                if tx.value != cost || &self.tokens_sold + &amount > self.max_tokens {
                    return false;
                }
                self.tokens_sold += &amount;
                *self.sale_balances.entry(tx.from).or_default() += &amount;
                let entry = self.contributions.entry(tx.from).or_default();
                entry.0 += &tx.value;
                entry.1 += amount;
                true
            }
            _ => false,
        }
    }
}

fn lookup(data: &[u8]) -> Option<(FunctionSignature, Vec<Token>)> {
    if data.len() < 4 {
        return None;
    }
    SIGNATURES.iter().find_map(|s| {
        let sig = parse_signature(s).ok()?;
        if sig.selector[..] != data[..4] {
            return None;
        }
        let args = decode_output(&sig.params, &data[4..]).ok()?;
        Some((sig, args))
    })
}

pub(crate) struct Sandbox {
    ledger: Mutex<Ledger>,
    events: broadcast::Sender<WalletEvent>,
}

impl Sandbox {
    /// A chain where the user holds 100 WBNRY and a whale already staked 1000.
    pub(crate) fn new() -> Self {
        let user = addr(USER);
        let whale = addr(WHALE);
        let (events, _) = broadcast::channel(16);
        let ledger = Ledger {
            chain_id: CHAIN_ID,
            accounts: vec![user],
            wallet_present: true,
            reject_access: false,
            sale_balances: HashMap::new(),
            asset_balances: HashMap::from([(user, asset(100))]),
            allowances: HashMap::new(),
            stakes: HashMap::from([(whale, asset(1_000))]),
            gains: HashMap::new(),
            treasury: asset(500),
            apy: 12,
            price: BigUint::from(25_000_000_000_000_000u64),
            max_tokens: tokens(1_000_000),
            tokens_sold: BigUint::from(0u8),
            contributions: HashMap::new(),
            calls: Vec::new(),
            sent: Vec::new(),
            receipts: HashMap::new(),
            estimates: 0,
            block: 1,
            reject_next_tx: false,
            stall_receipts: false,
            revert_next_tx: false,
            approval_shortfall: BigUint::from(0u8),
            failing_reads: HashSet::new(),
            gas_estimate: DEFAULT_GAS_ESTIMATE,
        };
        Self {
            ledger: Mutex::new(ledger),
            events,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> R {
        f(&mut self.ledger.lock().unwrap())
    }

    pub(crate) fn user(&self) -> Address {
        addr(USER)
    }

    pub(crate) fn staking_address(&self) -> Address {
        addr(STAKING)
    }

    pub(crate) fn remove_wallet(&self) {
        self.with(|l| l.wallet_present = false);
    }

    pub(crate) fn reject_access(&self) {
        self.with(|l| l.reject_access = true);
    }

    pub(crate) fn reject_next_transaction(&self) {
        self.with(|l| l.reject_next_tx = true);
    }

    /// Receipts never arrive; every wait blocks forever.
    pub(crate) fn stall_receipts(&self) {
        self.with(|l| l.stall_receipts = true);
    }

    pub(crate) fn revert_next_transaction(&self) {
        self.with(|l| l.revert_next_tx = true);
    }

    /// Approvals grant `shortfall` less than requested.
    pub(crate) fn under_apply_approvals(&self, shortfall: BigUint) {
        self.with(|l| l.approval_shortfall = shortfall);
    }

    pub(crate) fn fail_read(&self, function: &str) {
        self.with(|l| l.failing_reads.insert(function.to_string()));
    }

    pub(crate) fn set_gas_estimate(&self, gas: u64) {
        self.with(|l| l.gas_estimate = gas);
    }

    pub(crate) fn set_asset_balance(&self, who: Address, raw: BigUint) {
        self.with(|l| l.asset_balances.insert(who, raw));
    }

    pub(crate) fn set_stake(&self, who: Address, raw: BigUint) {
        self.with(|l| l.stakes.insert(who, raw));
    }

    pub(crate) fn accrue_gains(&self, who: Address, raw: BigUint) {
        self.with(|l| *l.gains.entry(who).or_default() += raw);
    }

    /// Move staking asset between accounts outside the app.
    pub(crate) fn transfer_asset(&self, from: Address, to: Address, raw: BigUint) {
        self.with(|l| {
            let balance = Ledger::balance(&l.asset_balances, &from);
            l.asset_balances.insert(from, sub_or_zero(&balance, &raw));
            *l.asset_balances.entry(to).or_default() += raw;
        });
    }

    pub(crate) fn switch_chain(&self, chain_id: u64) {
        self.with(|l| l.chain_id = chain_id);
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
    }

    pub(crate) fn switch_account(&self, account: Address) {
        self.with(|l| l.accounts = vec![account]);
        let _ = self.events.send(WalletEvent::AccountsChanged(vec![account]));
    }

    pub(crate) fn asset_balance(&self, who: Address) -> BigUint {
        self.with(|l| Ledger::balance(&l.asset_balances, &who))
    }

    pub(crate) fn stake_of(&self, who: Address) -> BigUint {
        self.with(|l| Ledger::balance(&l.stakes, &who))
    }

    pub(crate) fn call_count(&self) -> usize {
        self.with(|l| l.calls.len())
    }

    pub(crate) fn estimate_count(&self) -> usize {
        self.with(|l| l.estimates)
    }

    pub(crate) fn sent(&self) -> Vec<TxRequest> {
        self.with(|l| l.sent.clone())
    }

    /// Function names of every submitted transaction, in order.
    pub(crate) fn sent_functions(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|tx| lookup(&tx.data).map(|(sig, _)| sig.name))
            .collect()
    }

    /// Uint arguments of the `index`th submitted transaction.
    pub(crate) fn sent_amount(&self, index: usize) -> Option<BigUint> {
        let tx = self.sent().into_iter().nth(index)?;
        let (_, args) = lookup(&tx.data)?;
        args.into_iter().find_map(Token::into_uint)
    }
}

#[async_trait]
impl ChainConnector for Sandbox {
    async fn request_accounts(&self) -> Result<Vec<Address>, Error> {
        self.with(|l| {
            if !l.wallet_present {
                return Err(Error::WalletUnavailable);
            }
            if l.reject_access {
                return Err(Error::UserRejected);
            }
            Ok(l.accounts.clone())
        })
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        self.with(|l| {
            if !l.wallet_present {
                return Err(Error::WalletUnavailable);
            }
            Ok(l.chain_id)
        })
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        self.with(|l| {
            let (sig, args) =
                lookup(&data).ok_or_else(|| Error::NetworkError("unknown selector".into()))?;
            l.calls.push(sig.name.clone());
            if l.failing_reads.contains(&sig.name) {
                return Err(Error::NetworkError(format!("{} reverted", sig.name)));
            }
            l.read(to, &sig, &args)
                .ok_or_else(|| Error::NetworkError(format!("{} reverted", sig.name)))
        })
    }

    async fn estimate_gas(&self, _tx: &TxRequest) -> Result<u64, Error> {
        self.with(|l| {
            l.estimates += 1;
            Ok(l.gas_estimate)
        })
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, Error> {
        self.with(|l| {
            if !l.wallet_present {
                return Err(Error::WalletUnavailable);
            }
            if l.reject_next_tx {
                l.reject_next_tx = false;
                return Err(Error::UserRejected);
            }

            let success = if l.revert_next_tx {
                l.revert_next_tx = false;
                false
            } else {
                l.apply(&tx)
            };
            let gas_used = l.gas_estimate.min(tx.gas.unwrap_or(u64::MAX));
            l.sent.push(tx);
            l.block += 1;

            let hash = TxHash(format!("0x{:064x}", l.sent.len()));
            l.receipts.insert(
                hash.clone(),
                Receipt {
                    hash: hash.clone(),
                    success,
                    gas_used,
                    block_number: l.block,
                },
            );
            Ok(hash)
        })
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<Receipt, Error> {
        if self.with(|l| l.stall_receipts) {
            std::future::pending::<()>().await;
        }
        self.with(|l| {
            l.receipts
                .get(hash)
                .cloned()
                .ok_or_else(|| Error::NetworkError(format!("unknown transaction {hash}")))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
