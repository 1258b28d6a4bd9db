//! End-to-end payment flow for a 402 response: select and sign, verify, settle.

use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConfigError};
use crate::error::{FacilitatorPhase, X402Error};
use crate::facilitator::{Facilitator, FacilitatorPair};
use crate::proto::{
    PaymentHeaderError, PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse,
    VerifyRequest, VerifyResponse,
};
use crate::retry::{RetryError, RetryPolicy, retry};
use crate::selector;
use crate::signer::SignerRegistry;

/// What a successful [`PaymentClient::pay`] produced.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub payload: PaymentPayload,
    /// The offered requirement that was paid.
    pub requirements: PaymentRequirements,
    pub verification: VerifyResponse,
    /// `None` for a verify-only run.
    pub settlement: Option<SettleResponse>,
}

impl PaymentOutcome {
    /// The payload encoded for the `X-PAYMENT` request header.
    pub fn header(&self) -> Result<String, PaymentHeaderError> {
        self.payload.to_header()
    }

    pub fn transaction(&self) -> Option<&str> {
        self.settlement
            .as_ref()
            .and_then(|settlement| settlement.transaction.as_deref())
    }
}

/// Pays 402 requirements with a set of local signers through a facilitator.
#[derive(Debug)]
pub struct PaymentClient<F = FacilitatorPair> {
    signers: SignerRegistry,
    facilitator: F,
    verify_retry: RetryPolicy,
}

impl PaymentClient<FacilitatorPair> {
    /// Builds signers, facilitator endpoints and the verify retry policy from configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let signers = config.signer_registry()?;
        let facilitator = config.facilitator().facilitator_pair()?;
        PaymentClient::new(signers, facilitator).with_verify_retry(*config.retry())
    }
}

impl<F> PaymentClient<F>
where
    F: Facilitator<Error = X402Error> + Sync,
{
    /// A client that calls verify once, without retries.
    pub fn new(signers: SignerRegistry, facilitator: F) -> Self {
        Self {
            signers,
            facilitator,
            verify_retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        }
    }

    /// Retries verify on transport failures. Settle is never retried.
    pub fn with_verify_retry(mut self, policy: RetryPolicy) -> Result<Self, ConfigError> {
        policy.validate().map_err(ConfigError::Retry)?;
        self.verify_retry = policy;
        Ok(self)
    }

    pub fn signers(&self) -> &SignerRegistry {
        &self.signers
    }

    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }

    /// Pays the `accepts` list of a parsed 402 body.
    pub async fn pay_required(
        &self,
        required: &PaymentRequired,
        verify_only: bool,
    ) -> Result<PaymentOutcome, X402Error> {
        self.pay(&required.accepts, verify_only).await
    }

    pub async fn pay(
        &self,
        requirements: &[PaymentRequirements],
        verify_only: bool,
    ) -> Result<PaymentOutcome, X402Error> {
        self.pay_with_cancel(requirements, verify_only, &CancellationToken::new())
            .await
    }

    /// Selects and signs, verifies, then settles unless `verify_only`.
    ///
    /// Once `cancel` fires no further facilitator call is started. A settle
    /// already in flight is not interrupted.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "x402.pay", skip_all, fields(verify_only = verify_only), err)
    )]
    pub async fn pay_with_cancel(
        &self,
        requirements: &[PaymentRequirements],
        verify_only: bool,
        cancel: &CancellationToken,
    ) -> Result<PaymentOutcome, X402Error> {
        let selection = selector::select_requirement(requirements, &self.signers).await?;
        let request = VerifyRequest::new(selection.payload, selection.requirements.clone());
        let network = request.payment_payload.network.clone();

        let verification = self.verify(&request, cancel).await?;
        if !verification.is_valid {
            return Err(X402Error::VerificationFailed {
                network,
                reason: verification
                    .invalid_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
                payer: verification.payer,
            });
        }
        tracing::debug!(%network, payer = ?verification.payer, "payment verified");

        if verify_only {
            return Ok(PaymentOutcome {
                payload: request.payment_payload,
                requirements: request.payment_requirements,
                verification,
                settlement: None,
            });
        }

        if cancel.is_cancelled() {
            return Err(X402Error::Cancelled {
                phase: FacilitatorPhase::Settle,
            });
        }
        let settlement = self.facilitator.settle(&request).await?;
        if !settlement.success {
            return Err(X402Error::SettlementFailed {
                network,
                reason: settlement
                    .error_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
                transaction: settlement.transaction,
            });
        }
        tracing::info!(
            %network,
            transaction = ?settlement.transaction,
            payer = ?settlement.payer,
            "payment settled"
        );

        Ok(PaymentOutcome {
            payload: request.payment_payload,
            requirements: request.payment_requirements,
            verification,
            settlement: Some(settlement),
        })
    }

    async fn verify(
        &self,
        request: &VerifyRequest,
        cancel: &CancellationToken,
    ) -> Result<VerifyResponse, X402Error> {
        let facilitator = &self.facilitator;
        let result = retry(&self.verify_retry, cancel, X402Error::is_transport, || {
            facilitator.verify(request)
        })
        .await;
        match result {
            Ok(response) => Ok(response),
            Err(RetryError::Cancelled) => Err(X402Error::Cancelled {
                phase: FacilitatorPhase::Verify,
            }),
            Err(RetryError::MaxAttemptsExceeded { last, .. }) => Err(last),
            Err(RetryError::NotRetryable(err)) => Err(err),
            // Policies are validated in `with_verify_retry`.
            Err(RetryError::InvalidConfig(reason)) => Err(X402Error::NetworkError {
                endpoint: "verify".to_string(),
                reason,
            }),
        }
    }
}
