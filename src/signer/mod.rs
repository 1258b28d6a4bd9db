//! Payment-capable signers and the registry the selector draws them from.
//!
//! A signer is bound to one network and holds an ordered set of tokens it can
//! pay with. The variant set is closed: [`PaymentSigner`] is either an EVM
//! ERC-3009 signer, a Solana SPL transfer signer, or a custodial signer that
//! delegates to an external signing platform.
//!
//! Every signer is built from a [`SignerConfig`], validated once at construction.

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use crate::chain::ChainFamily;
use crate::error::{AttemptedPair, X402Error};
use crate::proto::{ExactScheme, PaymentPayload, PaymentRequirements, TokenAmount};

pub mod custodial;
pub mod evm;
pub mod svm;

pub use custodial::{CustodialBackend, CustodialSigner};
pub use evm::{EvmSigner, SignerLike};
pub use svm::{SvmSigner, SvmTransferLayout};

/// A token a signer can pay with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Contract address (EVM) or mint (Solana). Compared case-insensitively.
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: u32,
}

impl TokenConfig {
    pub fn new<A: Into<String>, S: Into<String>>(address: A, symbol: S, decimals: u8) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            decimals,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, asset: &str) -> bool {
        self.address.eq_ignore_ascii_case(asset)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignerConfigError {
    #[error("Signer network must not be empty")]
    EmptyNetwork,
    #[error("Signer for {0} has no tokens")]
    NoTokens(String),
    #[error("Token {symbol:?} on {network} has an empty address")]
    EmptyTokenAddress { network: String, symbol: String },
    #[error("Network {network} is not a {expected} network")]
    FamilyMismatch {
        network: String,
        expected: ChainFamily,
    },
    #[error("Token {address:?} is not a valid {family} address")]
    InvalidTokenAddress {
        address: String,
        family: ChainFamily,
    },
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Settings shared by every signer variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerConfig {
    network: String,
    tokens: Vec<TokenConfig>,
    max_amount: Option<U256>,
    priority: u32,
}

impl SignerConfig {
    /// Validates and builds a signer configuration.
    ///
    /// `max_amount` of `None` means no per-payment ceiling. `priority` orders
    /// signers during selection, lower first.
    pub fn try_new<N: Into<String>>(
        network: N,
        tokens: Vec<TokenConfig>,
        max_amount: Option<U256>,
        priority: u32,
    ) -> Result<Self, SignerConfigError> {
        let network = network.into();
        if network.trim().is_empty() {
            return Err(SignerConfigError::EmptyNetwork);
        }
        if tokens.is_empty() {
            return Err(SignerConfigError::NoTokens(network));
        }
        if let Some(token) = tokens.iter().find(|t| t.address.trim().is_empty()) {
            return Err(SignerConfigError::EmptyTokenAddress {
                network,
                symbol: token.symbol.clone(),
            });
        }
        Ok(Self {
            network,
            tokens,
            max_amount,
            priority,
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn tokens(&self) -> &[TokenConfig] {
        &self.tokens
    }

    pub fn max_amount(&self) -> Option<U256> {
        self.max_amount
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// First held token matching the requirement's asset.
    pub fn matching_token(&self, requirements: &PaymentRequirements) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.matches(&requirements.asset))
    }

    pub fn can_sign(&self, requirements: &PaymentRequirements) -> bool {
        requirements.network == self.network
            && requirements.is_exact()
            && self.matching_token(requirements).is_some()
    }

    /// Rejects a network whose family is known and differs from `expected`.
    /// Unknown networks pass; they fail later if the chain cannot be resolved.
    pub(crate) fn ensure_family(&self, expected: ChainFamily) -> Result<(), SignerConfigError> {
        match ChainFamily::of_network(&self.network) {
            Some(family) if family != expected => Err(SignerConfigError::FamilyMismatch {
                network: self.network.clone(),
                expected,
            }),
            _ => Ok(()),
        }
    }

    /// Checks performed at the top of every `sign`: capability, amount syntax
    /// and ceiling. Returns the parsed amount and the matched token.
    pub(crate) fn admit<'a>(
        &'a self,
        requirements: &PaymentRequirements,
    ) -> Result<(TokenAmount, &'a TokenConfig), X402Error> {
        let token = match self.matching_token(requirements) {
            Some(token) if self.can_sign(requirements) => token,
            _ => {
                return Err(X402Error::NoValidSigner {
                    attempted: vec![AttemptedPair::new(
                        &requirements.network,
                        &requirements.asset,
                    )],
                });
            }
        };
        let amount = requirements
            .amount()
            .map_err(|_| X402Error::InvalidAmount {
                network: requirements.network.clone(),
                asset: requirements.asset.clone(),
                amount: requirements.max_amount_required.clone(),
            })?;
        if let Some(max) = self.max_amount {
            if amount.inner() > max {
                return Err(X402Error::AmountExceeded {
                    network: requirements.network.clone(),
                    asset: requirements.asset.clone(),
                    amount: amount.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok((amount, token))
    }
}

/// What the selector needs from a signer.
#[async_trait]
pub trait SignerCapability: Send + Sync {
    fn config(&self) -> &SignerConfig;

    fn network(&self) -> &str {
        self.config().network()
    }

    fn scheme(&self) -> &str {
        ExactScheme::VALUE
    }

    fn priority(&self) -> u32 {
        self.config().priority()
    }

    fn tokens(&self) -> &[TokenConfig] {
        self.config().tokens()
    }

    fn max_amount(&self) -> Option<U256> {
        self.config().max_amount()
    }

    /// Network equal (case-sensitive), scheme `exact`, asset held (case-insensitive).
    fn can_sign(&self, requirements: &PaymentRequirements) -> bool {
        self.config().can_sign(requirements)
    }

    /// Signs a payment for `requirements`. Re-checks [`Self::can_sign`] and
    /// fails with [`X402Error::NoValidSigner`] if it does not hold.
    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, X402Error>;
}

/// The closed set of signer kinds.
pub enum PaymentSigner {
    Evm(EvmSigner),
    Svm(SvmSigner),
    Custodial(CustodialSigner),
}

impl PaymentSigner {
    pub fn family(&self) -> Option<ChainFamily> {
        match self {
            PaymentSigner::Evm(_) => Some(ChainFamily::Eip155),
            PaymentSigner::Svm(_) => Some(ChainFamily::Solana),
            PaymentSigner::Custodial(signer) => ChainFamily::of_network(signer.network()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PaymentSigner::Evm(_) => "evm",
            PaymentSigner::Svm(_) => "svm",
            PaymentSigner::Custodial(_) => "custodial",
        }
    }
}

impl Debug for PaymentSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSigner")
            .field("kind", &self.kind())
            .field("network", &self.network())
            .field("priority", &self.priority())
            .finish()
    }
}

#[async_trait]
impl SignerCapability for PaymentSigner {
    fn config(&self) -> &SignerConfig {
        match self {
            PaymentSigner::Evm(signer) => signer.config(),
            PaymentSigner::Svm(signer) => signer.config(),
            PaymentSigner::Custodial(signer) => signer.config(),
        }
    }

    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, X402Error> {
        match self {
            PaymentSigner::Evm(signer) => signer.sign(requirements).await,
            PaymentSigner::Svm(signer) => signer.sign(requirements).await,
            PaymentSigner::Custodial(signer) => signer.sign(requirements).await,
        }
    }
}

impl From<EvmSigner> for PaymentSigner {
    fn from(value: EvmSigner) -> Self {
        PaymentSigner::Evm(value)
    }
}

impl From<SvmSigner> for PaymentSigner {
    fn from(value: SvmSigner) -> Self {
        PaymentSigner::Svm(value)
    }
}

impl From<CustodialSigner> for PaymentSigner {
    fn from(value: CustodialSigner) -> Self {
        PaymentSigner::Custodial(value)
    }
}

/// Signers in caller order, indexed by network string at registration time.
#[derive(Debug, Default)]
pub struct SignerRegistry {
    signers: Vec<PaymentSigner>,
    by_network: HashMap<String, Vec<usize>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Into<PaymentSigner>>(&mut self, signer: S) -> &mut Self {
        let signer = signer.into();
        let index = self.signers.len();
        self.by_network
            .entry(signer.network().to_string())
            .or_default()
            .push(index);
        tracing::debug!(
            network = signer.network(),
            kind = signer.kind(),
            priority = signer.priority(),
            "registered signer"
        );
        self.signers.push(signer);
        self
    }

    pub fn signers(&self) -> &[PaymentSigner] {
        &self.signers
    }

    /// Signers bound to exactly `network`, with their registration index,
    /// in registration order.
    pub fn for_network<'a>(
        &'a self,
        network: &str,
    ) -> impl Iterator<Item = (usize, &'a PaymentSigner)> + 'a {
        self.by_network
            .get(network)
            .map(|indices| indices.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&index| (index, &self.signers[index]))
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

impl FromIterator<PaymentSigner> for SignerRegistry {
    fn from_iter<T: IntoIterator<Item = PaymentSigner>>(iter: T) -> Self {
        let mut registry = SignerRegistry::new();
        for signer in iter {
            registry.register(signer);
        }
        registry
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use alloy_signer_local::PrivateKeySigner;

    use super::*;
    use crate::proto::Extra;

    pub const BASE_SEPOLIA_USDC: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
    pub const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    pub fn evm_requirements(network: &str, asset: &str, amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: network.to_string(),
            max_amount_required: amount.to_string(),
            resource: "https://api.example.com/premium".to_string(),
            description: "Premium content".to_string(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: PAY_TO.to_string(),
            max_timeout_seconds: 60,
            asset: asset.to_string(),
            extra: Some(Extra::new().with("name", "USDC").with("version", "2")),
        }
    }

    pub fn evm_signer(
        network: &str,
        asset: &str,
        max: Option<u64>,
        priority: u32,
    ) -> PaymentSigner {
        let config = SignerConfig::try_new(
            network,
            vec![TokenConfig::new(asset, "USDC", 6)],
            max.map(U256::from),
            priority,
        )
        .unwrap();
        EvmSigner::try_new(config, PrivateKeySigner::random())
            .unwrap()
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_config_rejects_incomplete_settings() {
        let token = TokenConfig::new(BASE_SEPOLIA_USDC, "USDC", 6);
        assert!(matches!(
            SignerConfig::try_new("", vec![token.clone()], None, 0),
            Err(SignerConfigError::EmptyNetwork)
        ));
        assert!(matches!(
            SignerConfig::try_new("base-sepolia", vec![], None, 0),
            Err(SignerConfigError::NoTokens(_))
        ));
        assert!(matches!(
            SignerConfig::try_new("base-sepolia", vec![TokenConfig::new(" ", "X", 6)], None, 0),
            Err(SignerConfigError::EmptyTokenAddress { .. })
        ));
    }

    #[test]
    fn test_can_sign_case_rules() {
        let signer = evm_signer("base-sepolia", BASE_SEPOLIA_USDC, None, 0);
        let lower_asset = BASE_SEPOLIA_USDC.to_lowercase();
        assert!(signer.can_sign(&evm_requirements("base-sepolia", &lower_asset, "1")));
        assert!(!signer.can_sign(&evm_requirements("Base-Sepolia", BASE_SEPOLIA_USDC, "1")));

        let mut upto = evm_requirements("base-sepolia", BASE_SEPOLIA_USDC, "1");
        upto.scheme = "upto".to_string();
        assert!(!signer.can_sign(&upto));
    }

    #[test]
    fn test_admit_enforces_ceiling_inclusively() {
        let config = SignerConfig::try_new(
            "base-sepolia",
            vec![TokenConfig::new(BASE_SEPOLIA_USDC, "USDC", 6)],
            Some(U256::from(500_000u64)),
            0,
        )
        .unwrap();
        let at_ceiling = evm_requirements("base-sepolia", BASE_SEPOLIA_USDC, "500000");
        assert!(config.admit(&at_ceiling).is_ok());
        let above = evm_requirements("base-sepolia", BASE_SEPOLIA_USDC, "500001");
        assert!(matches!(
            config.admit(&above),
            Err(X402Error::AmountExceeded { .. })
        ));
        let garbage = evm_requirements("base-sepolia", BASE_SEPOLIA_USDC, "lots");
        assert!(matches!(
            config.admit(&garbage),
            Err(X402Error::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_registry_indexes_by_network_in_order() {
        let registry: SignerRegistry = vec![
            evm_signer("base-sepolia", BASE_SEPOLIA_USDC, None, 3),
            evm_signer("base", BASE_SEPOLIA_USDC, None, 0),
            evm_signer("base-sepolia", BASE_SEPOLIA_USDC, None, 1),
        ]
        .into_iter()
        .collect();
        let indices: Vec<usize> = registry.for_network("base-sepolia").map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(registry.for_network("polygon").count(), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_family_mismatch_is_rejected() {
        let config = SignerConfig::try_new(
            "solana",
            vec![TokenConfig::new(BASE_SEPOLIA_USDC, "USDC", 6)],
            None,
            0,
        )
        .unwrap();
        assert!(matches!(
            config.ensure_family(ChainFamily::Eip155),
            Err(SignerConfigError::FamilyMismatch { .. })
        ));
        assert!(config.ensure_family(ChainFamily::Solana).is_ok());
    }
}
