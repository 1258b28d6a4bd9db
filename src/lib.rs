//! Client-side engine of the [x402 protocol](https://www.x402.org).
//!
//! A server answers `402 Payment Required` with a list of payment requirements.
//! This crate picks the requirement the caller's signers can pay best, produces
//! the signed `exact` payload for it, and drives the two-phase facilitator
//! exchange (`verify`, then `settle`) with deadlines and a single failover.
//!
//! # Modules
//!
//! - [`selector`] - Ranks (requirement, signer) pairs and signs the winner.
//! - [`signer`] - The [`SignerCapability`](signer::SignerCapability) seam and the EVM,
//!   Solana and custodial signers.
//! - [`facilitator`] - The [`Facilitator`](facilitator::Facilitator) trait and the
//!   primary/fallback [`FacilitatorPair`](facilitator::FacilitatorPair).
//! - [`facilitator_client`] - HTTP client for a remote facilitator.
//! - [`client`] - [`PaymentClient`](client::PaymentClient): select, verify, settle in one call.
//! - [`retry`] - Bounded exponential backoff with cancellation.
//! - [`config`] - JSON configuration with environment variable references.
//! - [`proto`] - x402 v1 wire types.
//! - [`chain`], [`networks`] - CAIP-2 chain identifiers and the known network table.
//! - [`timestamp`] - Unix timestamps for authorization windows.
//! - [`util`] - Base64, literal string types and tracing setup.
//!
//! # Example
//!
//! ```no_run
//! use x402_client::client::PaymentClient;
//! use x402_client::config::ClientConfig;
//! use x402_client::proto::PaymentRequired;
//!
//! # async fn run(body: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::load()?;
//! let client = PaymentClient::from_config(&config)?;
//! let required: PaymentRequired = serde_json::from_str(body)?;
//! let outcome = client.pay_required(&required, false).await?;
//! println!("X-PAYMENT: {}", outcome.header()?);
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod facilitator;
pub mod facilitator_client;
pub mod networks;
pub mod proto;
pub mod retry;
pub mod selector;
pub mod signer;
pub mod timestamp;
pub mod util;

pub use client::{PaymentClient, PaymentOutcome};
pub use error::X402Error;
pub use selector::{rank, select};
