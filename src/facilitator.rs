//! The verify/settle interface a paying client drives, and the primary/fallback
//! pair that applies deadlines and a single failover on top of it.
//!
//! Semantic outcomes (`isValid=false`, `success=false`) come back as ordinary
//! responses; only the exchange itself failing is an error here.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FacilitatorPhase, X402Error};
use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::proto;

/// Asynchronous interface of an x402 facilitator as seen by a paying client.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Asks the facilitator whether the signed payload satisfies the requirements.
    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Asks the facilitator to execute the transfer on chain.
    ///
    /// Not idempotent from the caller's point of view: a failed call may
    /// still have been broadcast.
    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send;

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator + Sync> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}

/// A primary facilitator with an optional fallback.
///
/// The fallback is tried exactly once, without backoff, when the primary
/// fails at the transport level, deadlines included. A 4xx or a well-formed
/// negative answer is final.
///
/// A settle that timed out on the primary may already be on chain. Replaying
/// it on the fallback cannot pay twice, since the signed authorization is
/// single-use, but a fallback failure after such a timeout says nothing about
/// the first attempt. That case surfaces as the primary's
/// `Timeout { outcome_unknown: true }`.
#[derive(Clone, Debug)]
pub struct FacilitatorPair {
    primary: FacilitatorClient,
    fallback: Option<FacilitatorClient>,
}

impl FacilitatorPair {
    pub fn new(primary: FacilitatorClient) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: FacilitatorClient) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn primary(&self) -> &FacilitatorClient {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&FacilitatorClient> {
        self.fallback.as_ref()
    }

    /// Whether a failure on the primary should be replayed against the fallback.
    fn should_fail_over(err: &FacilitatorClientError) -> bool {
        err.is_transport()
    }

    async fn call<'a, R, F, Fut>(
        &'a self,
        phase: FacilitatorPhase,
        network: &str,
        operation: F,
    ) -> Result<R, X402Error>
    where
        F: Fn(&'a FacilitatorClient) -> Fut,
        Fut: Future<Output = Result<R, FacilitatorClientError>>,
    {
        let err = match operation(&self.primary).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        let Some(fallback) = self.fallback.as_ref() else {
            return Err(map_client_error(err, phase, &self.primary, network));
        };
        if !Self::should_fail_over(&err) {
            return Err(map_client_error(err, phase, &self.primary, network));
        }
        tracing::warn!(
            %phase,
            primary = %self.primary.base_url(),
            fallback = %fallback.base_url(),
            error = %err,
            "Primary facilitator failed, trying fallback"
        );
        let settle_in_doubt = phase == FacilitatorPhase::Settle && err.is_timeout();
        match operation(fallback).await {
            Ok(response) => Ok(response),
            Err(fallback_err) if settle_in_doubt => {
                tracing::warn!(
                    fallback = %fallback.base_url(),
                    error = %fallback_err,
                    "Fallback settle failed after primary timeout, outcome unknown"
                );
                Err(map_client_error(err, phase, &self.primary, network))
            }
            Err(fallback_err) => Err(map_client_error(fallback_err, phase, fallback, network)),
        }
    }
}

impl Facilitator for FacilitatorPair {
    type Error = X402Error;

    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let network = request.payment_payload.network.as_str();
        self.call(FacilitatorPhase::Verify, network, |client| client.verify(request))
            .await
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        let network = request.payment_payload.network.as_str();
        self.call(FacilitatorPhase::Settle, network, |client| client.settle(request))
            .await
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        self.call(FacilitatorPhase::Supported, "", |client| client.supported())
            .await
    }
}

/// Maps a transport-level failure of `client` into the crate error.
///
/// A 4xx is the facilitator refusing the request, so it surfaces as the
/// rejection of the phase it belongs to.
fn map_client_error(
    err: FacilitatorClientError,
    phase: FacilitatorPhase,
    client: &FacilitatorClient,
    network: &str,
) -> X402Error {
    let (endpoint, deadline) = match phase {
        FacilitatorPhase::Verify => (client.verify_url(), Some(client.verify_timeout())),
        FacilitatorPhase::Settle => (client.settle_url(), Some(client.settle_timeout())),
        FacilitatorPhase::Supported => (client.supported_url(), None),
    };
    if err.is_timeout() {
        let after = match (&err, deadline) {
            (FacilitatorClientError::Timeout { after, .. }, _) => *after,
            (_, Some(hard)) => client.effective_timeout(hard),
            (_, None) => client.timeout().unwrap_or(Duration::ZERO),
        };
        return X402Error::Timeout {
            phase,
            after,
            outcome_unknown: phase == FacilitatorPhase::Settle,
        };
    }
    match err {
        FacilitatorClientError::HttpStatus { status, body, .. } if status.is_client_error() => {
            let reason = if body.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {body}")
            };
            match phase {
                FacilitatorPhase::Verify => X402Error::VerificationFailed {
                    network: network.to_string(),
                    reason,
                    payer: None,
                },
                FacilitatorPhase::Settle => X402Error::SettlementFailed {
                    network: network.to_string(),
                    reason,
                    transaction: None,
                },
                FacilitatorPhase::Supported => X402Error::NetworkError {
                    endpoint: endpoint.to_string(),
                    reason,
                },
            }
        }
        other => X402Error::NetworkError {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{
        ExactPayload, ExactScheme, ExactSolanaPayload, PaymentPayload, VerifyRequest,
        X402Version1,
    };
    use crate::signer::test_support::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> VerifyRequest {
        let payload = PaymentPayload {
            x402_version: X402Version1,
            scheme: ExactScheme,
            network: "base-sepolia".to_string(),
            payload: ExactPayload::Solana(ExactSolanaPayload {
                transaction: "AQID".to_string(),
            }),
        };
        VerifyRequest::new(
            payload,
            evm_requirements("base-sepolia", BASE_SEPOLIA_USDC, "1000"),
        )
    }

    fn client(server: &MockServer) -> FacilitatorClient {
        FacilitatorClient::try_from(server.uri()).unwrap()
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate, calls: u64) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(response)
            .expect(calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_verify_falls_back_on_server_error() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(&primary, "/verify", ResponseTemplate::new(503), 1).await;
        mount(
            &fallback,
            "/verify",
            ResponseTemplate::new(200).set_body_json(json!({ "isValid": true, "payer": "0xabc" })),
            1,
        )
        .await;

        let pair = FacilitatorPair::new(client(&primary)).with_fallback(client(&fallback));
        let response = pair.verify(&request()).await.unwrap();
        assert!(response.is_valid);
        assert_eq!(response.payer.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn test_verify_rejection_is_not_retried() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(
            &primary,
            "/verify",
            ResponseTemplate::new(200)
                .set_body_json(json!({ "isValid": false, "invalidReason": "insufficient_funds" })),
            1,
        )
        .await;
        mount(&fallback, "/verify", ResponseTemplate::new(200), 0).await;

        let pair = FacilitatorPair::new(client(&primary)).with_fallback(client(&fallback));
        let response = pair.verify(&request()).await.unwrap();
        assert!(!response.is_valid);
        assert_eq!(response.invalid_reason.as_deref(), Some("insufficient_funds"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(
            &primary,
            "/verify",
            ResponseTemplate::new(400).set_body_string("bad payload"),
            1,
        )
        .await;
        mount(&fallback, "/verify", ResponseTemplate::new(200), 0).await;

        let pair = FacilitatorPair::new(client(&primary)).with_fallback(client(&fallback));
        match pair.verify(&request()).await.unwrap_err() {
            X402Error::VerificationFailed { network, reason, .. } => {
                assert_eq!(network, "base-sepolia");
                assert!(reason.contains("bad payload"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn slow_settle() -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(json!({ "success": true, "network": "base-sepolia" }))
            .set_delay(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_settle_timeout_uses_fallback() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(&primary, "/settle", slow_settle(), 1).await;
        mount(
            &fallback,
            "/settle",
            ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "transaction": "0xbeef",
                "network": "base-sepolia"
            })),
            1,
        )
        .await;

        let primary_client = client(&primary).with_settle_timeout(Duration::from_millis(100));
        let pair = FacilitatorPair::new(primary_client).with_fallback(client(&fallback));
        let response = pair.settle(&request()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.transaction.as_deref(), Some("0xbeef"));
    }

    #[tokio::test]
    async fn test_settle_timeout_then_fallback_failure_has_unknown_outcome() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(&primary, "/settle", slow_settle(), 1).await;
        mount(
            &fallback,
            "/settle",
            ResponseTemplate::new(400).set_body_string("authorization already used"),
            1,
        )
        .await;

        let primary_client = client(&primary).with_settle_timeout(Duration::from_millis(100));
        let pair = FacilitatorPair::new(primary_client).with_fallback(client(&fallback));
        match pair.settle(&request()).await.unwrap_err() {
            X402Error::Timeout {
                phase,
                after,
                outcome_unknown,
            } => {
                assert_eq!(phase, FacilitatorPhase::Settle);
                assert_eq!(after, Duration::from_millis(100));
                assert!(outcome_unknown);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_settle_timeout_on_both_has_unknown_outcome() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(&primary, "/settle", slow_settle(), 1).await;
        mount(&fallback, "/settle", slow_settle(), 1).await;

        let primary_client = client(&primary).with_settle_timeout(Duration::from_millis(100));
        let fallback_client = client(&fallback).with_settle_timeout(Duration::from_millis(100));
        let pair = FacilitatorPair::new(primary_client).with_fallback(fallback_client);
        assert!(matches!(
            pair.settle(&request()).await.unwrap_err(),
            X402Error::Timeout {
                phase: FacilitatorPhase::Settle,
                outcome_unknown: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_verify_falls_back_when_primary_is_unreachable() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let unreachable_uri = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);
        let fallback = MockServer::start().await;
        mount(
            &fallback,
            "/verify",
            ResponseTemplate::new(200).set_body_json(json!({ "isValid": true })),
            1,
        )
        .await;

        let primary = FacilitatorClient::try_from(unreachable_uri.as_str()).unwrap();
        let pair = FacilitatorPair::new(primary).with_fallback(client(&fallback));
        let response = pair.verify(&request()).await.unwrap();
        assert!(response.is_valid);
    }

    #[tokio::test]
    async fn test_settle_server_error_uses_fallback() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(&primary, "/settle", ResponseTemplate::new(502), 1).await;
        mount(
            &fallback,
            "/settle",
            ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "transaction": "0xfeed",
                "network": "base-sepolia"
            })),
            1,
        )
        .await;

        let pair = FacilitatorPair::new(client(&primary)).with_fallback(client(&fallback));
        let response = pair.settle(&request()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.transaction.as_deref(), Some("0xfeed"));
    }

    #[tokio::test]
    async fn test_fallback_failure_reports_fallback_endpoint() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;
        mount(&primary, "/verify", ResponseTemplate::new(500), 1).await;
        mount(&fallback, "/verify", ResponseTemplate::new(500), 1).await;

        let pair = FacilitatorPair::new(client(&primary)).with_fallback(client(&fallback));
        match pair.verify(&request()).await.unwrap_err() {
            X402Error::NetworkError { endpoint, .. } => {
                assert!(endpoint.starts_with(&fallback.uri()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verify_timeout_without_fallback() {
        let primary = MockServer::start().await;
        mount(
            &primary,
            "/verify",
            ResponseTemplate::new(200)
                .set_body_json(json!({ "isValid": true }))
                .set_delay(Duration::from_secs(5)),
            1,
        )
        .await;

        let pair =
            FacilitatorPair::new(client(&primary).with_verify_timeout(Duration::from_millis(50)));
        let err = pair.verify(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            X402Error::Timeout {
                phase: FacilitatorPhase::Verify,
                outcome_unknown: false,
                ..
            }
        ));
    }
}
