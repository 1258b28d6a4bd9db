//! Error kinds surfaced by payment selection, signing and the facilitator exchange.
//!
//! Every variant carries enough context (network, asset, amount, endpoint) for a
//! caller to log or display a diagnosis without re-deriving it from the inputs.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// A `network:asset` pair that was considered during selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptedPair {
    pub network: String,
    pub asset: String,
}

impl AttemptedPair {
    pub fn new<N: Into<String>, A: Into<String>>(network: N, asset: A) -> Self {
        Self {
            network: network.into(),
            asset: asset.into(),
        }
    }
}

impl Display for AttemptedPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.asset)
    }
}

/// Which half of the two-phase facilitator exchange an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilitatorPhase {
    Verify,
    Settle,
    Supported,
}

impl Display for FacilitatorPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FacilitatorPhase::Verify => write!(f, "verify"),
            FacilitatorPhase::Settle => write!(f, "settle"),
            FacilitatorPhase::Supported => write!(f, "supported"),
        }
    }
}

fn join_pairs(pairs: &[AttemptedPair]) -> String {
    pairs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn outcome_suffix(outcome_unknown: &bool) -> &'static str {
    if *outcome_unknown {
        " (settlement outcome unknown)"
    } else {
        ""
    }
}

#[derive(Debug, thiserror::Error)]
pub enum X402Error {
    #[error("No signer can pay any of the offered requirements (attempted: [{}])", join_pairs(.attempted))]
    NoValidSigner { attempted: Vec<AttemptedPair> },

    #[error("Amount {amount} exceeds signer maximum {max} on {network} for asset {asset}")]
    AmountExceeded {
        network: String,
        asset: String,
        amount: String,
        max: String,
    },

    #[error("Invalid payment requirements: {reason}")]
    InvalidRequirements { reason: String },

    #[error("Signing failed on {network} for asset {asset}: {reason}")]
    SigningFailed {
        network: String,
        asset: String,
        reason: String,
    },

    #[error("Network error talking to {endpoint}: {reason}")]
    NetworkError { endpoint: String, reason: String },

    #[error("Invalid amount {amount:?} on {network} for asset {asset}")]
    InvalidAmount {
        network: String,
        asset: String,
        amount: String,
    },

    #[error("Facilitator rejected payment on {network}: {reason}")]
    VerificationFailed {
        network: String,
        reason: String,
        payer: Option<String>,
    },

    #[error("Settlement failed on {network}: {reason}")]
    SettlementFailed {
        network: String,
        reason: String,
        transaction: Option<String>,
    },

    /// `outcome_unknown` is set when a settlement may already have been broadcast.
    #[error("Facilitator {phase} timed out after {after:?}{}", outcome_suffix(.outcome_unknown))]
    Timeout {
        phase: FacilitatorPhase,
        after: Duration,
        outcome_unknown: bool,
    },

    #[error("Unsupported payment scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Payment cancelled before facilitator {phase}")]
    Cancelled { phase: FacilitatorPhase },
}

impl X402Error {
    pub fn signing_failed<N, A, R>(network: N, asset: A, reason: R) -> Self
    where
        N: Into<String>,
        A: Into<String>,
        R: Display,
    {
        X402Error::SigningFailed {
            network: network.into(),
            asset: asset.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error came from the transport rather than from a decision.
    pub fn is_transport(&self) -> bool {
        matches!(self, X402Error::NetworkError { .. } | X402Error::Timeout { .. })
    }
}
