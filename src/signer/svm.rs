//! Partially signed SPL token transfers for Solana.
//!
//! The client builds a versioned transaction that moves tokens between the
//! associated token accounts of the payer and of `payTo`, with the
//! facilitator's `feePayer` as fee payer. Only the client's signature slot is
//! filled. The facilitator swaps in a live blockhash, co-signs as fee payer and
//! broadcasts.
//!
//! Two instruction layouts are supported, see [`SvmTransferLayout`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_message::v0::Message as MessageV0;
use solana_message::{Hash, VersionedMessage};
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::ChainFamily;
use crate::error::X402Error;
use crate::proto::{
    ExactPayload, ExactScheme, ExactSolanaPayload, PaymentPayload, PaymentRequirements,
    X402Version1,
};
use crate::signer::{SignerCapability, SignerConfig, SignerConfigError};
use crate::util::Base64Bytes;

pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 100_000;
/// Micro-lamports per compute unit.
pub const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 1;

/// Instruction layout of the transfer transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SvmTransferLayout {
    /// `SetComputeUnitLimit`, `SetComputeUnitPrice`, then `TransferChecked`
    /// (discriminator 12, amount, decimals). What facilitators verify today.
    #[default]
    TransferChecked,
    /// A single `Transfer` (discriminator 3, amount).
    Transfer,
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionBuildError {
    #[error("Invalid {field} address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("Failed to build token instruction: {0}")]
    Instruction(String),
    #[error("Failed to compile message: {0}")]
    Compile(String),
    #[error("Failed to sign transaction: {0}")]
    Sign(String),
    #[error("Signer not found in required signers")]
    SignerNotRequired,
    #[error("Failed to serialize transaction: {0}")]
    Serialize(#[from] bincode::Error),
}

/// Inputs of one transfer transaction.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub fee_payer: Pubkey,
    pub owner: Pubkey,
    pub pay_to: Pubkey,
    pub mint: Pubkey,
    pub amount: u64,
    pub decimals: u8,
    pub layout: SvmTransferLayout,
    pub compute_unit_limit: u32,
    pub compute_unit_price: u64,
}

/// Associated token account of `owner` for `mint` under `token_program`.
pub fn associated_token_address(owner: &Pubkey, token_program: &Pubkey, mint: &Pubkey) -> Pubkey {
    let (ata, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    );
    ata
}

fn transfer_instructions(
    params: &TransferParams,
) -> Result<Vec<Instruction>, TransactionBuildError> {
    let token_program = spl_token::id();
    let source = associated_token_address(&params.owner, &token_program, &params.mint);
    let destination = associated_token_address(&params.pay_to, &token_program, &params.mint);
    let instructions = match params.layout {
        SvmTransferLayout::TransferChecked => {
            let transfer = spl_token::instruction::transfer_checked(
                &token_program,
                &source,
                &params.mint,
                &destination,
                &params.owner,
                &[],
                params.amount,
                params.decimals,
            )
            .map_err(|e| TransactionBuildError::Instruction(format!("{e}")))?;
            vec![
                ComputeBudgetInstruction::set_compute_unit_limit(params.compute_unit_limit),
                ComputeBudgetInstruction::set_compute_unit_price(params.compute_unit_price),
                transfer,
            ]
        }
        SvmTransferLayout::Transfer => {
            let transfer = spl_token::instruction::transfer(
                &token_program,
                &source,
                &destination,
                &params.owner,
                &[],
                params.amount,
            )
            .map_err(|e| TransactionBuildError::Instruction(format!("{e}")))?;
            vec![transfer]
        }
    };
    Ok(instructions)
}

/// Builds the unsigned transaction with an all-zero placeholder blockhash.
pub fn build_transfer_transaction(
    params: &TransferParams,
) -> Result<VersionedTransaction, TransactionBuildError> {
    let instructions = transfer_instructions(params)?;
    let message = MessageV0::try_compile(&params.fee_payer, &instructions, &[], Hash::default())
        .map_err(|e| TransactionBuildError::Compile(format!("{e:?}")))?;
    Ok(VersionedTransaction {
        signatures: vec![],
        message: VersionedMessage::V0(message),
    })
}

/// Fills `signer`'s slot among the required signatures, leaving the others default.
pub fn sign_partially<S: Signer + ?Sized>(
    mut tx: VersionedTransaction,
    signer: &S,
) -> Result<VersionedTransaction, TransactionBuildError> {
    let msg_bytes = tx.message.serialize();
    let signature = signer
        .try_sign_message(msg_bytes.as_slice())
        .map_err(|e| TransactionBuildError::Sign(format!("{e}")))?;

    // Required signatures are the first N account keys
    let num_required = tx.message.header().num_required_signatures as usize;
    let static_keys = tx.message.static_account_keys();
    let pos = static_keys
        .iter()
        .take(num_required)
        .position(|k| *k == signer.pubkey())
        .ok_or(TransactionBuildError::SignerNotRequired)?;

    if tx.signatures.len() < num_required {
        tx.signatures.resize(num_required, Signature::default());
    }
    tx.signatures[pos] = signature;
    Ok(tx)
}

pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, TransactionBuildError> {
    let bytes = bincode::serialize(tx)?;
    Ok(Base64Bytes::encode(bytes).into_string())
}

/// Pays with SPL tokens on one Solana cluster.
pub struct SvmSigner {
    config: SignerConfig,
    signer: Arc<dyn Signer + Send + Sync>,
    layout: SvmTransferLayout,
    compute_unit_limit: u32,
    compute_unit_price: u64,
}

impl SvmSigner {
    pub fn try_new<S>(config: SignerConfig, signer: S) -> Result<Self, SignerConfigError>
    where
        S: Signer + Send + Sync + 'static,
    {
        config.ensure_family(ChainFamily::Solana)?;
        if let Some(token) = config
            .tokens()
            .iter()
            .find(|t| Pubkey::from_str(&t.address).is_err())
        {
            return Err(SignerConfigError::InvalidTokenAddress {
                address: token.address.clone(),
                family: ChainFamily::Solana,
            });
        }
        signer
            .try_pubkey()
            .map_err(|e| SignerConfigError::InvalidKey(e.to_string()))?;
        Ok(Self {
            config,
            signer: Arc::new(signer),
            layout: SvmTransferLayout::default(),
            compute_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            compute_unit_price: DEFAULT_COMPUTE_UNIT_PRICE,
        })
    }

    pub fn with_layout(mut self, layout: SvmTransferLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Compute budget for the `TransferChecked` layout.
    pub fn with_compute_budget(mut self, unit_limit: u32, unit_price_micro_lamports: u64) -> Self {
        self.compute_unit_limit = unit_limit;
        self.compute_unit_price = unit_price_micro_lamports;
        self
    }

    pub fn pubkey(&self) -> Pubkey {
        self.signer.pubkey()
    }

    pub fn layout(&self) -> SvmTransferLayout {
        self.layout
    }
}

impl Debug for SvmSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvmSigner")
            .field("config", &self.config)
            .field("pubkey", &self.pubkey())
            .field("layout", &self.layout)
            .finish()
    }
}

fn parse_pubkey(field: &'static str, value: &str) -> Result<Pubkey, TransactionBuildError> {
    Pubkey::from_str(value).map_err(|_| TransactionBuildError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

#[async_trait]
impl SignerCapability for SvmSigner {
    fn config(&self) -> &SignerConfig {
        &self.config
    }

    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(
            name = "x402.svm.sign",
            skip_all,
            fields(network = %requirements.network, asset = %requirements.asset)
        )
    )]
    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, X402Error> {
        let (amount, token) = self.config.admit(requirements)?;
        let amount = amount.to_u64().ok_or_else(|| X402Error::InvalidAmount {
            network: requirements.network.clone(),
            asset: requirements.asset.clone(),
            amount: requirements.max_amount_required.clone(),
        })?;
        let fail = |e: TransactionBuildError| {
            X402Error::signing_failed(&requirements.network, &requirements.asset, e)
        };
        let fee_payer = requirements
            .extra
            .as_ref()
            .and_then(|extra| extra.fee_payer())
            .ok_or_else(|| {
                X402Error::signing_failed(
                    &requirements.network,
                    &requirements.asset,
                    "missing feePayer in extra",
                )
            })?;

        let params = TransferParams {
            fee_payer: parse_pubkey("feePayer", fee_payer).map_err(fail)?,
            owner: self.signer.pubkey(),
            pay_to: parse_pubkey("payTo", &requirements.pay_to).map_err(fail)?,
            mint: parse_pubkey("asset", &requirements.asset).map_err(fail)?,
            amount,
            decimals: token.decimals,
            layout: self.layout,
            compute_unit_limit: self.compute_unit_limit,
            compute_unit_price: self.compute_unit_price,
        };
        let tx = build_transfer_transaction(&params).map_err(fail)?;
        let tx = sign_partially(tx, self.signer.as_ref()).map_err(fail)?;
        let transaction = encode_transaction(&tx).map_err(fail)?;
        tracing::debug!(
            network = %requirements.network,
            owner = %params.owner,
            fee_payer = %params.fee_payer,
            amount,
            layout = ?self.layout,
            "signed SPL transfer transaction"
        );

        Ok(PaymentPayload {
            x402_version: X402Version1,
            scheme: ExactScheme,
            network: requirements.network.clone(),
            payload: ExactPayload::Solana(ExactSolanaPayload { transaction }),
        })
    }
}
