//! Signers whose keys live in a managed signing platform.
//!
//! The platform integration itself is supplied by the caller as a
//! [`CustodialBackend`]. This module only validates the requirement before
//! handing it over and checks that the returned body fits the network.

use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::chain::ChainFamily;
use crate::error::X402Error;
use crate::proto::{
    ExactPayload, ExactScheme, PaymentPayload, PaymentRequirements, TokenAmount, X402Version1,
};
use crate::signer::{SignerCapability, SignerConfig};

pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Boundary to an external signing service.
#[async_trait]
pub trait CustodialBackend: Send + Sync {
    /// Produces the chain-specific body for an already validated requirement.
    async fn sign_exact(
        &self,
        requirements: &PaymentRequirements,
        amount: TokenAmount,
    ) -> Result<ExactPayload, BackendError>;
}

pub struct CustodialSigner {
    config: SignerConfig,
    backend: Arc<dyn CustodialBackend>,
}

impl CustodialSigner {
    pub fn new(config: SignerConfig, backend: Arc<dyn CustodialBackend>) -> Self {
        Self { config, backend }
    }
}

impl Debug for CustodialSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialSigner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn body_family(body: &ExactPayload) -> ChainFamily {
    match body {
        ExactPayload::Evm(_) => ChainFamily::Eip155,
        ExactPayload::Solana(_) => ChainFamily::Solana,
    }
}

#[async_trait]
impl SignerCapability for CustodialSigner {
    fn config(&self) -> &SignerConfig {
        &self.config
    }

    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(
            name = "x402.custodial.sign",
            skip_all,
            fields(network = %requirements.network, asset = %requirements.asset)
        )
    )]
    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, X402Error> {
        let (amount, _) = self.config.admit(requirements)?;
        let body = self
            .backend
            .sign_exact(requirements, amount)
            .await
            .map_err(|e| {
                X402Error::signing_failed(&requirements.network, &requirements.asset, e)
            })?;
        if let Some(expected) = ChainFamily::of_network(&requirements.network) {
            let actual = body_family(&body);
            if actual != expected {
                return Err(X402Error::signing_failed(
                    &requirements.network,
                    &requirements.asset,
                    format!("backend returned a {actual} payload for a {expected} network"),
                ));
            }
        }
        Ok(PaymentPayload {
            x402_version: X402Version1,
            scheme: ExactScheme,
            network: requirements.network.clone(),
            payload: body,
        })
    }
}
