//! Utility types for protocol serialization.

use alloy_primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static DECIMAL_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+$").expect("decimal digits regex is valid"));

/// A token amount in the asset's smallest unit.
///
/// On the wire it is always a decimal string (`"1000000"`), never a JSON number
/// and never hex. Signs, whitespace, hex prefixes and values wider than 256 bits
/// are rejected.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TokenAmount(pub U256);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenAmountError {
    #[error("not a non-negative decimal integer: {0:?}")]
    Format(String),
    #[error("does not fit in 256 bits: {0}")]
    Overflow(String),
}

impl TokenAmount {
    pub fn inner(&self) -> U256 {
        self.0
    }

    /// Narrows to `u64`, as SPL token instructions require.
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }
}

impl FromStr for TokenAmount {
    type Err = TokenAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !DECIMAL_DIGITS.is_match(s) {
            return Err(TokenAmountError::Format(s.to_string()));
        }
        U256::from_str_radix(s, 10)
            .map(TokenAmount)
            .map_err(|_| TokenAmountError::Overflow(s.to_string()))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
