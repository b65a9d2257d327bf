use std::sync::Arc;

use num_bigint::BigUint;
use tracing::debug;

use crate::abi::{Abi, Token};
use crate::connector::{ChainConnector, Signer};
use crate::error::{AbiError, Error};
use crate::types::address::Address;
use crate::types::config::{ContractRole, NetworkConfig};
use crate::types::transaction::{Receipt, TxHash};
use crate::types::units::TokenAmount;

const TOKEN_FUNCTIONS: &[&str] = &["balanceOf", "totalSupply", "allowance", "approve", "symbol"];
const CROWDSALE_FUNCTIONS: &[&str] = &["price", "maxTokens", "tokensSold", "contributions", "buyTokens"];
const STAKING_FUNCTIONS: &[&str] = &[
    "totalStaked",
    "totalStakers",
    "treasuryBalance",
    "apy",
    "stakeOf",
    "gainsOf",
    "compoundBalanceOf",
    "stake",
    "withdraw",
];

/// Decimals of the native currency used to price the crowdsale.
pub const NATIVE_DECIMALS: u8 = 18;

/// The contract interface descriptions the app is built against.
#[derive(Debug, Clone)]
pub struct AbiSet {
    pub token: Arc<Abi>,
    pub crowdsale: Arc<Abi>,
    pub staking: Arc<Abi>,
}

impl AbiSet {
    pub fn from_json(token: &str, crowdsale: &str, staking: &str) -> Result<Self, AbiError> {
        Ok(Self {
            token: Arc::new(Abi::from_json("Token", token)?),
            crowdsale: Arc::new(Abi::from_json("Crowdsale", crowdsale)?),
            staking: Arc::new(Abi::from_json("Staking", staking)?),
        })
    }
}

/// A deployed contract bound to its ABI and the connector.
#[derive(Clone)]
pub struct Contract {
    role: ContractRole,
    address: Address,
    abi: Arc<Abi>,
    connector: Arc<dyn ChainConnector>,
}

impl Contract {
    pub fn new(
        role: ContractRole,
        address: Address,
        abi: Arc<Abi>,
        connector: Arc<dyn ChainConnector>,
    ) -> Self {
        Self {
            role,
            address,
            abi,
            connector,
        }
    }

    pub fn calldata(&self, function: &str, args: &[Token]) -> Result<Vec<u8>, Error> {
        Ok(self.abi.function(function)?.encode(args)?)
    }

    async fn raw_call(&self, function: &str, args: &[Token]) -> Result<Vec<u8>, Error> {
        let data = self.calldata(function, args)?;
        debug!(role = %self.role, function, "contract read");
        self.connector.call(self.address, data).await
    }

    /// Call a view function and decode its first output.
    pub async fn read(&self, function: &str, args: &[Token]) -> Result<Token, Error> {
        let out = self.raw_call(function, args).await?;
        Ok(self.abi.function(function)?.decode_single(&out)?)
    }

    /// Call a view function and decode the output called `output`.
    pub async fn read_named(
        &self,
        function: &str,
        args: &[Token],
        output: &str,
    ) -> Result<Token, Error> {
        let out = self.raw_call(function, args).await?;
        Ok(self.abi.function(function)?.decode_named(&out, output)?)
    }

    async fn read_uint(&self, function: &str, args: &[Token]) -> Result<BigUint, Error> {
        self.read(function, args).await?.into_uint().ok_or_else(|| {
            Error::Abi(AbiError::InvalidEncoding(format!("`{function}` did not return a uint")))
        })
    }

    /// Submit a write call from `signer` and wait for it to be mined.
    pub async fn transact(
        &self,
        signer: &Signer,
        function: &str,
        args: &[Token],
        value: BigUint,
        gas_limit: Option<u64>,
    ) -> Result<Receipt, Error> {
        let hash = self.submit(signer, function, args, value, gas_limit).await?;
        signer.confirm(&hash).await
    }

    /// Submit a write call without waiting for the receipt.
    pub async fn submit(
        &self,
        signer: &Signer,
        function: &str,
        args: &[Token],
        value: BigUint,
        gas_limit: Option<u64>,
    ) -> Result<TxHash, Error> {
        let data = self.calldata(function, args)?;
        let mut tx = signer.transaction(self.address, data, value);
        tx.gas = gas_limit;
        debug!(role = %self.role, function, gas_limit = ?gas_limit, "contract write");
        signer.send(tx).await
    }

    pub async fn estimate(
        &self,
        signer: &Signer,
        function: &str,
        args: &[Token],
    ) -> Result<u64, Error> {
        let data = self.calldata(function, args)?;
        let tx = signer.transaction(self.address, data, BigUint::from(0u8));
        signer.estimate_gas(&tx).await
    }
}

/// Shared surface of every bound contract handle.
pub trait ContractHandle {
    fn contract(&self) -> &Contract;

    fn address(&self) -> Address {
        self.contract().address
    }

    fn role(&self) -> ContractRole {
        self.contract().role
    }
}

/// An ERC-20 token (the sale token or the staking asset).
#[derive(Clone)]
pub struct TokenContract {
    contract: Contract,
    decimals: u8,
}

impl ContractHandle for TokenContract {
    fn contract(&self) -> &Contract {
        &self.contract
    }
}

impl TokenContract {
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    fn amount(&self, raw: BigUint) -> TokenAmount {
        TokenAmount::new(raw, self.decimals)
    }

    pub async fn balance_of(&self, owner: Address) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("balanceOf", &[Token::Address(owner)]).await?;
        Ok(self.amount(raw))
    }

    pub async fn total_supply(&self) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("totalSupply", &[]).await?;
        Ok(self.amount(raw))
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<TokenAmount, Error> {
        let raw = self
            .contract
            .read_uint("allowance", &[Token::Address(owner), Token::Address(spender)])
            .await?;
        Ok(self.amount(raw))
    }

    pub async fn symbol(&self) -> Result<String, Error> {
        self.contract.read("symbol", &[]).await?.into_string().ok_or_else(|| {
            Error::Abi(AbiError::InvalidEncoding("`symbol` did not return a string".into()))
        })
    }

    pub async fn approve(
        &self,
        signer: &Signer,
        spender: Address,
        amount: &TokenAmount,
    ) -> Result<Receipt, Error> {
        self.contract
            .transact(
                signer,
                "approve",
                &[Token::Address(spender), Token::Uint(amount.raw.clone())],
                BigUint::from(0u8),
                None,
            )
            .await
    }
}

/// The fixed-price token sale.
#[derive(Clone)]
pub struct CrowdsaleContract {
    contract: Contract,
    token_decimals: u8,
}

impl ContractHandle for CrowdsaleContract {
    fn contract(&self) -> &Contract {
        &self.contract
    }
}

impl CrowdsaleContract {
    pub fn token_decimals(&self) -> u8 {
        self.token_decimals
    }

    /// Price of one whole token in native currency.
    pub async fn price(&self) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("price", &[]).await?;
        Ok(TokenAmount::new(raw, NATIVE_DECIMALS))
    }

    pub async fn max_tokens(&self) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("maxTokens", &[]).await?;
        Ok(TokenAmount::new(raw, self.token_decimals))
    }

    pub async fn tokens_sold(&self) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("tokensSold", &[]).await?;
        Ok(TokenAmount::new(raw, self.token_decimals))
    }

    /// Tokens bought so far by `account`.
    pub async fn contribution_of(&self, account: Address) -> Result<TokenAmount, Error> {
        let raw = self
            .contract
            .read_named("contributions", &[Token::Address(account)], "tokenAmount")
            .await?
            .into_uint()
            .ok_or_else(|| {
                Error::Abi(AbiError::InvalidEncoding("`tokenAmount` is not a uint".into()))
            })?;
        Ok(TokenAmount::new(raw, self.token_decimals))
    }

    pub async fn submit_purchase(
        &self,
        signer: &Signer,
        amount: &TokenAmount,
        value: BigUint,
    ) -> Result<TxHash, Error> {
        self.contract
            .submit(signer, "buyTokens", &[Token::Uint(amount.raw.clone())], value, None)
            .await
    }
}

/// The staking pool for the staking asset.
#[derive(Clone)]
pub struct StakingContract {
    contract: Contract,
    asset_decimals: u8,
}

impl ContractHandle for StakingContract {
    fn contract(&self) -> &Contract {
        &self.contract
    }
}

impl StakingContract {
    fn amount(&self, raw: BigUint) -> TokenAmount {
        TokenAmount::new(raw, self.asset_decimals)
    }

    pub async fn total_staked(&self) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("totalStaked", &[]).await?;
        Ok(self.amount(raw))
    }

    pub async fn total_stakers(&self) -> Result<BigUint, Error> {
        self.contract.read_uint("totalStakers", &[]).await
    }

    pub async fn treasury_balance(&self) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("treasuryBalance", &[]).await?;
        Ok(self.amount(raw))
    }

    /// Annual yield in whole percent.
    pub async fn apy(&self) -> Result<BigUint, Error> {
        self.contract.read_uint("apy", &[]).await
    }

    pub async fn stake_of(&self, account: Address) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("stakeOf", &[Token::Address(account)]).await?;
        Ok(self.amount(raw))
    }

    pub async fn gains_of(&self, account: Address) -> Result<TokenAmount, Error> {
        let raw = self.contract.read_uint("gainsOf", &[Token::Address(account)]).await?;
        Ok(self.amount(raw))
    }

    /// Stake plus reinvested yield, as computed by the contract.
    pub async fn compound_balance_of(&self, account: Address) -> Result<TokenAmount, Error> {
        let raw = self
            .contract
            .read_uint("compoundBalanceOf", &[Token::Address(account)])
            .await?;
        Ok(self.amount(raw))
    }

    pub async fn stake(&self, signer: &Signer, amount: &TokenAmount) -> Result<Receipt, Error> {
        self.contract
            .transact(signer, "stake", &[Token::Uint(amount.raw.clone())], BigUint::from(0u8), None)
            .await
    }

    pub async fn estimate_withdraw(
        &self,
        signer: &Signer,
        amount: &TokenAmount,
    ) -> Result<u64, Error> {
        self.contract
            .estimate(signer, "withdraw", &[Token::Uint(amount.raw.clone())])
            .await
    }

    pub async fn withdraw(
        &self,
        signer: &Signer,
        amount: &TokenAmount,
        gas_limit: u64,
    ) -> Result<Receipt, Error> {
        self.contract
            .transact(
                signer,
                "withdraw",
                &[Token::Uint(amount.raw.clone())],
                BigUint::from(0u8),
                Some(gas_limit),
            )
            .await
    }
}

fn bind_token(
    config: &NetworkConfig,
    chain_id: u64,
    role: ContractRole,
    abi: &Arc<Abi>,
    connector: &Arc<dyn ChainConnector>,
) -> Result<TokenContract, Error> {
    let entry = config.lookup(chain_id)?.get(role)?;
    abi.require(TOKEN_FUNCTIONS)?;
    Ok(TokenContract {
        contract: Contract::new(role, entry.address, abi.clone(), connector.clone()),
        decimals: entry.decimals,
    })
}

/// Handles used by the crowdsale screen.
#[derive(Clone)]
pub struct SaleBindings {
    pub chain_id: u64,
    pub token: TokenContract,
    pub crowdsale: CrowdsaleContract,
}

impl SaleBindings {
    /// Construct handles for `chain_id`. Makes no contract calls.
    pub fn bind(
        config: &NetworkConfig,
        abis: &AbiSet,
        chain_id: u64,
        connector: Arc<dyn ChainConnector>,
    ) -> Result<Self, Error> {
        let network = config.lookup(chain_id)?;
        let token = bind_token(config, chain_id, ContractRole::Token, &abis.token, &connector)?;

        let entry = network.get(ContractRole::Crowdsale)?;
        abis.crowdsale.require(CROWDSALE_FUNCTIONS)?;
        let crowdsale = CrowdsaleContract {
            contract: Contract::new(
                ContractRole::Crowdsale,
                entry.address,
                abis.crowdsale.clone(),
                connector,
            ),
            token_decimals: token.decimals,
        };

        debug!(chain_id, token = %token.address(), crowdsale = %crowdsale.address(), "sale contracts bound");
        Ok(Self {
            chain_id,
            token,
            crowdsale,
        })
    }
}

/// Handles used by the staking dashboard.
#[derive(Clone)]
pub struct StakeBindings {
    pub chain_id: u64,
    pub asset: TokenContract,
    pub staking: StakingContract,
}

impl StakeBindings {
    /// Construct handles for `chain_id`. Makes no contract calls.
    pub fn bind(
        config: &NetworkConfig,
        abis: &AbiSet,
        chain_id: u64,
        connector: Arc<dyn ChainConnector>,
    ) -> Result<Self, Error> {
        let network = config.lookup(chain_id)?;
        let asset = bind_token(
            config,
            chain_id,
            ContractRole::StakingAsset,
            &abis.token,
            &connector,
        )?;

        let entry = network.get(ContractRole::Staking)?;
        abis.staking.require(STAKING_FUNCTIONS)?;
        let staking = StakingContract {
            contract: Contract::new(
                ContractRole::Staking,
                entry.address,
                abis.staking.clone(),
                connector,
            ),
            asset_decimals: asset.decimals,
        };

        debug!(chain_id, asset = %asset.address(), staking = %staking.address(), "staking contracts bound");
        Ok(Self {
            chain_id,
            asset,
            staking,
        })
    }
}
