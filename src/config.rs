//! Client configuration: facilitator endpoints, deadlines, retry policy and signers.
//!
//! Configuration is a JSON file. Any string value that holds a secret or an
//! endpoint can reference an environment variable instead of a literal, see
//! [`LiteralOrEnv`]. A `.env` file next to the process is loaded first.
//!
//! ```json
//! {
//!   "facilitator": {
//!     "url": "$FACILITATOR_URL",
//!     "fallbackUrl": "https://facilitator.x402.rs",
//!     "verifyTimeoutMs": 5000,
//!     "settleTimeoutMs": 30000,
//!     "headers": { "Authorization": "${FACILITATOR_AUTH}" }
//!   },
//!   "retry": { "maxAttempts": 3, "initialDelayMs": 100, "maxDelayMs": 5000, "multiplier": 2.0 },
//!   "signers": [
//!     {
//!       "kind": "evm",
//!       "network": "base-sepolia",
//!       "privateKey": "$EVM_PRIVATE_KEY",
//!       "tokens": [{ "address": "0x036CbD53842c5426634e7929541eC2318f3dCF7e", "symbol": "USDC", "decimals": 6 }],
//!       "maxAmount": "1000000"
//!     }
//!   ]
//! }
//! ```

use alloy_signer_local::PrivateKeySigner;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use solana_keypair::Keypair;
use solana_signer::Signer;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::facilitator::FacilitatorPair;
use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::proto::TokenAmount;
use crate::retry::RetryPolicy;
use crate::signer::{
    EvmSigner, PaymentSigner, SignerConfig, SignerConfigError, SignerRegistry, SvmSigner,
    SvmTransferLayout, TokenConfig,
};

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"https://facilitator.x402.rs"`
/// - Simple env var: `"$FACILITATOR_URL"`
/// - Braced env var: `"${FACILITATOR_URL}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(braced)
        } else if let Some(var_name) = s.strip_prefix('$') {
            let valid = !var_name.is_empty()
                && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
            valid.then_some(var_name)
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?
        } else {
            s
        };

        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// A Solana keypair in the standard 64-byte layout (secret seed, then public
/// key), written as base58 the way the Solana CLI and wallets export it.
#[derive(Clone, PartialEq, Eq)]
pub struct SolanaPrivateKey([u8; 64]);

impl SolanaPrivateKey {
    pub fn from_base58(s: &str) -> Result<Self, String> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| format!("Invalid base58: {}", e))?;

        if bytes.len() != 64 {
            return Err(format!(
                "Private key must be 64 bytes (standard Solana format), got {} bytes",
                bytes.len()
            ));
        }

        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Rebuilds the keypair from its seed, rejecting a public half that does not match.
    pub fn keypair(&self) -> Result<Keypair, String> {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&self.0[..32]);
        let keypair = Keypair::new_from_array(secret);
        if keypair.pubkey().to_bytes()[..] != self.0[32..] {
            return Err("public key does not match the secret key".to_string());
        }
        Ok(keypair)
    }
}

impl FromStr for SolanaPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Debug for SolanaPrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SolanaPrivateKey(..)")
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorConfig {
    pub url: LiteralOrEnv<Url>,
    #[serde(default)]
    pub fallback_url: Option<LiteralOrEnv<Url>>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        default = "config_defaults::verify_timeout",
        rename = "verifyTimeoutMs"
    )]
    pub verify_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(
        default = "config_defaults::settle_timeout",
        rename = "settleTimeoutMs"
    )]
    pub settle_timeout: Duration,
    /// Per-request `reqwest` timeout, under the hard verify/settle deadlines.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "requestTimeoutMs")]
    pub request_timeout: Option<Duration>,
    /// Extra headers sent on every facilitator request, e.g. an API key.
    #[serde(default)]
    pub headers: BTreeMap<String, LiteralOrEnv<String>>,
}

impl FacilitatorConfig {
    fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::InvalidHeader(name.clone(), e.to_string()))?;
            let header_value = HeaderValue::from_str(value.inner())
                .map_err(|e| ConfigError::InvalidHeader(name.clone(), e.to_string()))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    fn client(&self, url: &Url, headers: &HeaderMap) -> Result<FacilitatorClient, ConfigError> {
        let mut client = FacilitatorClient::try_from(url.as_str())?
            .with_headers(headers.clone())
            .with_verify_timeout(self.verify_timeout)
            .with_settle_timeout(self.settle_timeout);
        if let Some(timeout) = self.request_timeout {
            client = client.with_timeout(timeout);
        }
        Ok(client)
    }

    /// Builds the primary client and, when configured, its fallback.
    pub fn facilitator_pair(&self) -> Result<FacilitatorPair, ConfigError> {
        let headers = self.header_map()?;
        let mut pair = FacilitatorPair::new(self.client(self.url.inner(), &headers)?);
        if let Some(fallback) = &self.fallback_url {
            pair = pair.with_fallback(self.client(fallback.inner(), &headers)?);
        }
        Ok(pair)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmSignerEntry {
    pub network: String,
    /// Hex-encoded secp256k1 private key.
    pub private_key: LiteralOrEnv<PrivateKeySigner>,
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub max_amount: Option<TokenAmount>,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvmSignerEntry {
    pub network: String,
    pub private_key: LiteralOrEnv<SolanaPrivateKey>,
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub max_amount: Option<TokenAmount>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub layout: SvmTransferLayout,
    #[serde(default = "config_defaults::compute_unit_limit")]
    pub compute_unit_limit: u32,
    /// Micro-lamports per compute unit.
    #[serde(default = "config_defaults::compute_unit_price")]
    pub compute_unit_price: u64,
}

/// One locally held key, tagged by chain family.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignerEntry {
    Evm(EvmSignerEntry),
    Svm(SvmSignerEntry),
}

impl SignerEntry {
    pub fn network(&self) -> &str {
        match self {
            SignerEntry::Evm(entry) => &entry.network,
            SignerEntry::Svm(entry) => &entry.network,
        }
    }

    pub fn build(&self) -> Result<PaymentSigner, SignerConfigError> {
        match self {
            SignerEntry::Evm(entry) => {
                let config = SignerConfig::try_new(
                    entry.network.clone(),
                    entry.tokens.clone(),
                    entry.max_amount.map(|amount| amount.inner()),
                    entry.priority,
                )?;
                let signer = EvmSigner::try_new(config, entry.private_key.inner().clone())?;
                Ok(signer.into())
            }
            SignerEntry::Svm(entry) => {
                let config = SignerConfig::try_new(
                    entry.network.clone(),
                    entry.tokens.clone(),
                    entry.max_amount.map(|amount| amount.inner()),
                    entry.priority,
                )?;
                let keypair = entry
                    .private_key
                    .keypair()
                    .map_err(SignerConfigError::InvalidKey)?;
                let signer = SvmSigner::try_new(config, keypair)?
                    .with_layout(entry.layout)
                    .with_compute_budget(entry.compute_unit_limit, entry.compute_unit_price);
                Ok(signer.into())
            }
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    facilitator: FacilitatorConfig,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(default)]
    signers: Vec<SignerEntry>,
}

pub mod config_defaults {
    use std::time::Duration;

    use crate::facilitator_client::FacilitatorClient;
    use crate::signer::svm::{DEFAULT_COMPUTE_UNIT_LIMIT, DEFAULT_COMPUTE_UNIT_PRICE};

    pub const CONFIG_PATH_ENV: &str = "CONFIG";
    pub const DEFAULT_CONFIG_PATH: &str = "config.json";

    pub fn verify_timeout() -> Duration {
        FacilitatorClient::DEFAULT_VERIFY_TIMEOUT
    }

    pub fn settle_timeout() -> Duration {
        FacilitatorClient::DEFAULT_SETTLE_TIMEOUT
    }

    pub fn compute_unit_limit() -> u32 {
        DEFAULT_COMPUTE_UNIT_LIMIT
    }

    pub fn compute_unit_price() -> u64 {
        DEFAULT_COMPUTE_UNIT_PRICE
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid retry policy: {0}")]
    Retry(String),
    #[error("Invalid facilitator header {0:?}: {1}")]
    InvalidHeader(String, String),
    #[error("Invalid facilitator endpoint: {0}")]
    Facilitator(#[from] FacilitatorClientError),
    #[error("Invalid signer #{index} on {network}: {source}")]
    Signer {
        index: usize,
        network: String,
        #[source]
        source: SignerConfigError,
    },
}

impl ClientConfig {
    pub fn facilitator(&self) -> &FacilitatorConfig {
        &self.facilitator
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn signers(&self) -> &[SignerEntry] {
        &self.signers
    }

    /// Loads `.env`, then the JSON file named by `$CONFIG` (default `./config.json`).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var(config_defaults::CONFIG_PATH_ENV)
            .unwrap_or_else(|_| config_defaults::DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Loads `.env`, then the JSON file at `path`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    /// Parses and validates a configuration document. Environment references
    /// are resolved against the current process environment.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(content)?;
        config.retry.validate().map_err(ConfigError::Retry)?;
        Ok(config)
    }

    /// Builds every configured signer, in file order.
    pub fn signer_registry(&self) -> Result<SignerRegistry, ConfigError> {
        let mut registry = SignerRegistry::new();
        for (index, entry) in self.signers.iter().enumerate() {
            let signer = entry.build().map_err(|source| ConfigError::Signer {
                index,
                network: entry.network().to_string(),
                source,
            })?;
            registry.register(signer);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::SignerCapability;
    use serde_json::json;

    const EVM_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const BASE_SEPOLIA_USDC: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
    const DEVNET_USDC: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

    #[test]
    fn test_env_var_syntax() {
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$FOO_1"), Some("FOO_1"));
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("${FOO-BAR}"), Some("FOO-BAR"));
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$"), None);
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("$FOO/bar"), None);
        assert_eq!(LiteralOrEnv::<String>::parse_env_var_syntax("https://x"), None);
    }

    #[test]
    fn test_literal_or_env_resolves_variables() {
        unsafe { std::env::set_var("X402_CLIENT_TEST_FACILITATOR", "https://env.example/") };
        let braced: LiteralOrEnv<Url> =
            serde_json::from_value(json!("${X402_CLIENT_TEST_FACILITATOR}")).unwrap();
        let simple: LiteralOrEnv<Url> =
            serde_json::from_value(json!("$X402_CLIENT_TEST_FACILITATOR")).unwrap();
        let literal: LiteralOrEnv<Url> =
            serde_json::from_value(json!("https://literal.example/")).unwrap();
        assert_eq!(braced.as_str(), "https://env.example/");
        assert_eq!(simple, braced);
        assert_eq!(literal.host_str(), Some("literal.example"));

        let missing =
            serde_json::from_value::<LiteralOrEnv<Url>>(json!("$X402_CLIENT_TEST_UNSET_VARIABLE"));
        assert!(missing.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_defaults_apply() {
        let config = ClientConfig::from_json(
            &json!({ "facilitator": { "url": "https://facilitator.example" } }).to_string(),
        )
        .unwrap();
        assert_eq!(config.facilitator().verify_timeout, Duration::from_secs(5));
        assert_eq!(config.facilitator().settle_timeout, Duration::from_secs(30));
        assert_eq!(config.facilitator().request_timeout, None);
        assert_eq!(config.retry(), &RetryPolicy::default());
        assert!(config.signers().is_empty());

        let pair = config.facilitator().facilitator_pair().unwrap();
        assert_eq!(pair.primary().verify_url().as_str(), "https://facilitator.example/verify");
        assert!(pair.fallback().is_none());
    }

    #[test]
    fn test_full_document_builds_pair_and_signers() {
        let keypair = Keypair::new();
        let document = json!({
            "facilitator": {
                "url": "https://primary.example/x402/",
                "fallbackUrl": "https://fallback.example",
                "verifyTimeoutMs": 2500,
                "settleTimeoutMs": 45000,
                "requestTimeoutMs": 2000,
                "headers": { "x-api-key": "secret" }
            },
            "retry": { "maxAttempts": 5, "initialDelayMs": 50, "maxDelayMs": 800, "multiplier": 3.0 },
            "signers": [
                {
                    "kind": "evm",
                    "network": "base-sepolia",
                    "privateKey": EVM_KEY,
                    "tokens": [{ "address": BASE_SEPOLIA_USDC, "symbol": "USDC", "decimals": 6 }],
                    "maxAmount": "1000000",
                    "priority": 1
                },
                {
                    "kind": "svm",
                    "network": "solana-devnet",
                    "privateKey": keypair.to_base58_string(),
                    "tokens": [{ "address": DEVNET_USDC, "symbol": "USDC", "decimals": 6, "priority": 2 }],
                    "layout": "transfer"
                }
            ]
        });
        let config = ClientConfig::from_json(&document.to_string()).unwrap();

        let pair = config.facilitator().facilitator_pair().unwrap();
        assert_eq!(pair.primary().settle_url().as_str(), "https://primary.example/x402/settle");
        assert_eq!(pair.primary().verify_timeout(), Duration::from_millis(2500));
        assert_eq!(pair.primary().settle_timeout(), Duration::from_secs(45));
        assert_eq!(pair.primary().timeout(), &Some(Duration::from_secs(2)));
        assert_eq!(pair.primary().headers()["x-api-key"], "secret");
        let fallback = pair.fallback().unwrap();
        assert_eq!(fallback.verify_url().as_str(), "https://fallback.example/verify");
        assert_eq!(config.retry().max_attempts, 5);

        let registry = config.signer_registry().unwrap();
        assert_eq!(registry.len(), 2);
        let evm = &registry.signers()[0];
        assert_eq!(evm.network(), "base-sepolia");
        assert_eq!(evm.priority(), 1);
        assert_eq!(evm.max_amount(), Some(alloy_primitives::U256::from(1_000_000u64)));
        match &registry.signers()[1] {
            PaymentSigner::Svm(svm) => {
                assert_eq!(svm.pubkey(), keypair.pubkey());
                assert_eq!(svm.layout(), SvmTransferLayout::Transfer);
                assert_eq!(svm.tokens()[0].priority, 2);
            }
            other => panic!("unexpected signer {other:?}"),
        }
    }

    #[test]
    fn test_invalid_retry_policy_is_rejected() {
        let document = json!({
            "facilitator": { "url": "https://facilitator.example" },
            "retry": { "maxAttempts": 0, "initialDelayMs": 10, "maxDelayMs": 10, "multiplier": 1.0 }
        });
        assert!(matches!(
            ClientConfig::from_json(&document.to_string()),
            Err(ConfigError::Retry(_))
        ));
    }

    #[test]
    fn test_signer_errors_name_the_entry() {
        let document = json!({
            "facilitator": { "url": "https://facilitator.example" },
            "signers": [{
                "kind": "evm",
                "network": "solana",
                "privateKey": EVM_KEY,
                "tokens": [{ "address": BASE_SEPOLIA_USDC, "symbol": "USDC", "decimals": 6 }]
            }]
        });
        let config = ClientConfig::from_json(&document.to_string()).unwrap();
        match config.signer_registry() {
            Err(ConfigError::Signer { index, network, source }) => {
                assert_eq!(index, 0);
                assert_eq!(network, "solana");
                assert!(matches!(source, SignerConfigError::FamilyMismatch { .. }));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_solana_key_rejects_mismatched_halves() {
        let a = Keypair::new();
        let b = Keypair::new();
        let mut bytes = a.to_bytes();
        bytes[32..].copy_from_slice(&b.pubkey().to_bytes());
        let key = SolanaPrivateKey::from_base58(&bs58::encode(bytes).into_string()).unwrap();
        assert!(key.keypair().is_err());
        assert!(SolanaPrivateKey::from_base58("abc").is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let result = ClientConfig::load_from_path("/nonexistent/x402-client.json");
        assert!(matches!(result, Err(ConfigError::FileRead(_, _))));
    }
}
