//! Wire types of the x402 v1 protocol, as seen from the paying client.
//!
//! - [`PaymentRequired`]: body of a `402 Payment Required` response
//! - [`PaymentRequirements`]: one entry of its `accepts` list
//! - [`PaymentPayload`]: what the client signs and sends back in `X-PAYMENT`
//! - [`VerifyRequest`], [`VerifyResponse`], [`SettleResponse`]: facilitator exchange

use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;
use crate::util::Base64Bytes;
use crate::lit_str;

pub mod extra;
pub mod util;
pub mod v1;

pub use extra::*;
pub use util::{TokenAmount, TokenAmountError};
pub use v1::X402Version1;

lit_str!(ExactScheme, "exact");

/// Body of a `402 Payment Required` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: X402Version1,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One acceptable way to pay for a resource.
///
/// `max_amount_required` stays the raw wire string. A server offering one
/// malformed amount among several options should not make the whole list
/// unreadable; [`PaymentRequirements::amount`] parses it on demand.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Extra>,
}

impl PaymentRequirements {
    pub fn amount(&self) -> Result<TokenAmount, TokenAmountError> {
        self.max_amount_required.parse()
    }

    pub fn is_exact(&self) -> bool {
        self.scheme == ExactScheme::VALUE
    }
}

/// A signed payment, ready for the `X-PAYMENT` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version1,
    pub scheme: ExactScheme,
    pub network: String,
    pub payload: ExactPayload,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentHeaderError {
    #[error("X-PAYMENT header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("X-PAYMENT header is not a valid payment payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentPayload {
    pub const HEADER_NAME: &'static str = "X-PAYMENT";

    /// Base64 of the JSON encoding, the value of the `X-PAYMENT` header.
    pub fn to_header(&self) -> Result<String, PaymentHeaderError> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json).into_string())
    }

    pub fn from_header(header: &str) -> Result<Self, PaymentHeaderError> {
        let json = Base64Bytes::from_encoded(header).decode()?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Chain-specific body of an `exact` payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExactPayload {
    Evm(ExactEvmPayload),
    Solana(ExactSolanaPayload),
}

/// ERC-3009 authorization plus its 65-byte `r || s || v` signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: Bytes,
    pub authorization: ExactEvmPayloadAuthorization,
}

/// Fields of `TransferWithAuthorization`, with integers as decimal strings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: B256,
}

/// Base64 of a bincode-serialized, partially signed versioned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSolanaPayload {
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub x402_version: X402Version1,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

pub type SettleRequest = VerifyRequest;

impl VerifyRequest {
    pub fn new(payment_payload: PaymentPayload, payment_requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402Version1,
            payment_payload,
            payment_requirements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

/// Outcome of a settlement. Some facilitators spell the error field
/// `error_reason`; both spellings are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, alias = "error_reason", skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Body of `GET /supported`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use serde_json::json;

    fn sample_requirements() -> serde_json::Value {
        json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "1000000",
            "resource": "https://api.example.com/weather",
            "description": "Weather report",
            "mimeType": "application/json",
            "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "maxTimeoutSeconds": 60,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "extra": { "name": "USDC", "version": "2" }
        })
    }

    #[test]
    fn payment_required_keeps_unparsable_amounts() {
        let mut broken = sample_requirements();
        broken["maxAmountRequired"] = json!("1.5");
        let body = json!({
            "x402Version": 1,
            "accepts": [broken, sample_requirements()],
            "error": "X-PAYMENT header is required"
        });
        let required: PaymentRequired = serde_json::from_value(body).unwrap();
        assert_eq!(required.accepts.len(), 2);
        assert!(required.accepts[0].amount().is_err());
        assert_eq!(required.accepts[1].amount().unwrap().to_u64(), Some(1_000_000));
        assert_eq!(required.error.as_deref(), Some("X-PAYMENT header is required"));
    }

    #[test]
    fn evm_payload_wire_shape() {
        let payload = PaymentPayload {
            x402_version: X402Version1,
            scheme: ExactScheme,
            network: "base".to_string(),
            payload: ExactPayload::Evm(ExactEvmPayload {
                signature: Bytes::from(vec![0xab; 65]),
                authorization: ExactEvmPayloadAuthorization {
                    from: address!("0x857b06519E91e3A54538791bDbb0E22373e36b66"),
                    to: address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
                    value: TokenAmount(U256::from(10_000u64)),
                    valid_after: UnixTimestamp::from_secs(1740672089),
                    valid_before: UnixTimestamp::from_secs(1740672154),
                    nonce: B256::repeat_byte(0x11),
                },
            }),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["x402Version"], json!(1));
        assert_eq!(value["scheme"], json!("exact"));
        let authorization = &value["payload"]["authorization"];
        assert_eq!(authorization["value"], json!("10000"));
        assert_eq!(authorization["validAfter"], json!("1740672089"));
        assert_eq!(authorization["validBefore"], json!("1740672154"));
        assert_eq!(
            authorization["nonce"],
            json!(format!("0x{}", "11".repeat(32)))
        );
        assert!(value["payload"]["signature"].as_str().unwrap().starts_with("0xabab"));
    }

    #[test]
    fn header_round_trip_preserves_solana_payload() {
        let payload = PaymentPayload {
            x402_version: X402Version1,
            scheme: ExactScheme,
            network: "solana-devnet".to_string(),
            payload: ExactPayload::Solana(ExactSolanaPayload {
                transaction: "AQID".to_string(),
            }),
        };
        let header = payload.to_header().unwrap();
        assert_eq!(PaymentPayload::from_header(&header).unwrap(), payload);
        assert!(PaymentPayload::from_header("%%%").is_err());
    }

    #[test]
    fn settle_response_reads_both_error_spellings() {
        let camel: SettleResponse = serde_json::from_value(json!({
            "success": false,
            "errorReason": "insufficient_funds",
            "network": "base"
        }))
        .unwrap();
        let snake: SettleResponse = serde_json::from_value(json!({
            "success": false,
            "error_reason": "insufficient_funds",
            "network": "base"
        }))
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.error_reason.as_deref(), Some("insufficient_funds"));
    }

    #[test]
    fn wrong_scheme_payload_is_rejected() {
        let body = json!({
            "x402Version": 1,
            "scheme": "upto",
            "network": "base",
            "payload": { "transaction": "AQID" }
        });
        assert!(serde_json::from_value::<PaymentPayload>(body).is_err());
    }
}
