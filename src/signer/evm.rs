//! ERC-3009 `transferWithAuthorization` signing over EIP-712.
//!
//! The client never sends a transaction. It signs an authorization that lets
//! the facilitator move `value` tokens from the client to `payTo` inside a
//! bounded time window, identified by a random 32-byte nonce.

use alloy_primitives::{Address, B256, FixedBytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolStruct, eip712_domain, sol};
use async_trait::async_trait;
use rand::{Rng, rng};
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::{ChainFamily, ChainId, Eip155ChainReference};
use crate::error::X402Error;
use crate::proto::{
    ExactEvmPayload, ExactEvmPayloadAuthorization, ExactPayload, ExactScheme, PaymentPayload,
    PaymentRequirements, TokenAmount, X402Version1,
};
use crate::signer::{SignerCapability, SignerConfig, SignerConfigError};
use crate::timestamp::UnixTimestamp;

/// Seconds `validAfter` is pushed into the past to absorb clock drift.
pub const VALID_AFTER_SKEW_SECS: u64 = 10;

sol!(
    /// EIP-712 message type of ERC-3009 `transferWithAuthorization`.
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

/// A trait that abstracts signing operations, allowing both owned signers and Arc-wrapped signers.
///
/// Alloy's `Signer` trait is not implemented for `Arc<T>`, and `PrivateKeySigner`
/// does not implement `Clone`, so signers are shared through this trait instead.
#[async_trait]
pub trait SignerLike {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error>;
}

#[async_trait]
impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[async_trait]
impl SignerLike for Arc<PrivateKeySigner> {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self.as_ref())
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self.as_ref(), hash).await
    }
}

/// EIP-712 signing parameters for an ERC-3009 authorization.
#[derive(Debug, Clone)]
pub struct Eip3009SigningParams {
    /// The EIP-155 chain ID (numeric)
    pub chain_id: u64,
    /// The token contract, also the EIP-712 verifying contract
    pub asset_address: Address,
    pub pay_to: Address,
    pub amount: U256,
    pub max_timeout_seconds: u64,
    /// EIP-712 domain name of the token
    pub name: String,
    /// EIP-712 domain version of the token
    pub version: String,
}

impl Eip3009SigningParams {
    pub fn signing_hash(&self, authorization: &ExactEvmPayloadAuthorization) -> B256 {
        let domain = eip712_domain! {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.asset_address,
        };
        // Must mirror the authorization exactly: the facilitator rebuilds this
        // struct from the payload to recover the signer.
        let transfer_with_authorization = TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value.inner(),
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
        };
        transfer_with_authorization.eip712_signing_hash(&domain)
    }
}

/// Builds and signs an ERC-3009 authorization valid from `now - 10s` to
/// `now + max_timeout_seconds`.
#[cfg_attr(
    feature = "telemetry",
    tracing::instrument(name = "x402.evm.sign_authorization", skip_all, err)
)]
pub async fn sign_erc3009_authorization<S: SignerLike + Sync + ?Sized>(
    signer: &S,
    params: &Eip3009SigningParams,
    now: UnixTimestamp,
) -> Result<ExactEvmPayload, alloy_signer::Error> {
    let nonce: [u8; 32] = rng().random();
    let authorization = ExactEvmPayloadAuthorization {
        from: signer.address(),
        to: params.pay_to,
        value: TokenAmount(params.amount),
        valid_after: now - VALID_AFTER_SKEW_SECS,
        valid_before: now + params.max_timeout_seconds,
        nonce: FixedBytes(nonce),
    };
    let eip712_hash = params.signing_hash(&authorization);
    let signature = signer.sign_hash(&eip712_hash).await?;
    Ok(ExactEvmPayload {
        // `as_bytes` encodes `v` as 27/28.
        signature: signature.as_bytes().into(),
        authorization,
    })
}

/// Pays with ERC-3009 tokens on one EVM network.
pub struct EvmSigner {
    config: SignerConfig,
    signer: Arc<dyn SignerLike + Send + Sync>,
}

impl EvmSigner {
    pub fn try_new<S>(config: SignerConfig, signer: S) -> Result<Self, SignerConfigError>
    where
        S: SignerLike + Send + Sync + 'static,
    {
        config.ensure_family(ChainFamily::Eip155)?;
        if let Some(token) = config
            .tokens()
            .iter()
            .find(|t| Address::from_str(&t.address).is_err())
        {
            return Err(SignerConfigError::InvalidTokenAddress {
                address: token.address.clone(),
                family: ChainFamily::Eip155,
            });
        }
        Ok(Self {
            config,
            signer: Arc::new(signer),
        })
    }

    /// Builds a signer from a hex-encoded secp256k1 private key.
    pub fn from_private_key(
        config: SignerConfig,
        private_key: &str,
    ) -> Result<Self, SignerConfigError> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| SignerConfigError::InvalidKey(e.to_string()))?;
        Self::try_new(config, signer)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn signing_params(
        &self,
        requirements: &PaymentRequirements,
        amount: TokenAmount,
    ) -> Result<Eip3009SigningParams, X402Error> {
        let fail = |reason: &dyn std::fmt::Display| {
            X402Error::signing_failed(&requirements.network, &requirements.asset, reason)
        };
        let chain_id = ChainId::resolve(self.config.network())
            .ok_or_else(|| fail(&format!("unknown network {}", self.config.network())))?;
        let chain_reference = Eip155ChainReference::try_from(chain_id).map_err(|e| fail(&e))?;
        let asset_address = Address::from_str(&requirements.asset)
            .map_err(|e| fail(&format!("invalid asset address: {e}")))?;
        let pay_to = Address::from_str(&requirements.pay_to)
            .map_err(|e| fail(&format!("invalid payTo address: {e}")))?;
        let extra = requirements.extra.as_ref();
        let name = extra
            .and_then(|extra| extra.name())
            .ok_or_else(|| fail(&"missing EIP-712 domain name in extra.name"))?;
        let version = extra
            .and_then(|extra| extra.version())
            .ok_or_else(|| fail(&"missing EIP-712 domain version in extra.version"))?;
        Ok(Eip3009SigningParams {
            chain_id: chain_reference.inner(),
            asset_address,
            pay_to,
            amount: amount.inner(),
            max_timeout_seconds: requirements.max_timeout_seconds,
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl Debug for EvmSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmSigner")
            .field("config", &self.config)
            .field("address", &self.address())
            .finish()
    }
}

#[async_trait]
impl SignerCapability for EvmSigner {
    fn config(&self) -> &SignerConfig {
        &self.config
    }

    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(
            name = "x402.evm.sign",
            skip_all,
            fields(network = %requirements.network, asset = %requirements.asset)
        )
    )]
    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, X402Error> {
        let (amount, _) = self.config.admit(requirements)?;
        let params = self.signing_params(requirements, amount)?;
        let now = UnixTimestamp::try_now().map_err(|e| {
            X402Error::signing_failed(&requirements.network, &requirements.asset, e)
        })?;
        let payload = sign_erc3009_authorization(self.signer.as_ref(), &params, now)
            .await
            .map_err(|e| {
                X402Error::signing_failed(&requirements.network, &requirements.asset, e)
            })?;
        tracing::debug!(
            network = %requirements.network,
            from = %payload.authorization.from,
            to = %payload.authorization.to,
            value = %payload.authorization.value,
            "signed ERC-3009 authorization"
        );
        Ok(PaymentPayload {
            x402_version: X402Version1,
            scheme: ExactScheme,
            network: requirements.network.clone(),
            payload: ExactPayload::Evm(payload),
        })
    }
}
