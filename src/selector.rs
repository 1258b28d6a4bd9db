//! Choosing which offered requirement to pay, and with which signer.
//!
//! Every (requirement, signer) pair the signer can serve, and whose amount is
//! within the signer's ceiling, becomes a [`Candidate`]. Candidates are ordered
//! by signer priority, then token priority, lower first. Ties keep encounter
//! order: the server's `accepts` order, then registration order. Only the first
//! candidate is signed; a signing failure is returned as is and the next
//! candidate is not tried.

use crate::error::{AttemptedPair, X402Error};
use crate::proto::{PaymentPayload, PaymentRequirements, TokenAmount};
use crate::signer::{PaymentSigner, SignerCapability, SignerRegistry};

/// An admissible pairing, alive for one selection.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub requirements: &'a PaymentRequirements,
    pub signer: &'a PaymentSigner,
    /// Registration index of the signer.
    pub signer_index: usize,
    pub signer_priority: u32,
    pub token_priority: u32,
    pub amount: TokenAmount,
}

impl Candidate<'_> {
    fn rank_key(&self) -> (u32, u32) {
        (self.signer_priority, self.token_priority)
    }
}

/// Admissible candidates in preference order.
///
/// Fails with [`X402Error::InvalidRequirements`] when no requirement carries a
/// parsable amount, and with [`X402Error::NoValidSigner`] when nothing
/// survives, including when every requirement uses a scheme other than `exact`.
pub fn rank<'a>(
    requirements: &'a [PaymentRequirements],
    signers: &'a SignerRegistry,
) -> Result<Vec<Candidate<'a>>, X402Error> {
    let mut candidates = Vec::new();
    let mut attempted = Vec::new();
    let mut parsed = 0usize;

    for requirement in requirements {
        let amount = match requirement.amount() {
            Ok(amount) => amount,
            Err(e) => {
                tracing::debug!(
                    network = %requirement.network,
                    asset = %requirement.asset,
                    amount = %requirement.max_amount_required,
                    error = %e,
                    "skipping requirement with unparsable amount"
                );
                continue;
            }
        };
        parsed += 1;
        attempted.push(AttemptedPair::new(&requirement.network, &requirement.asset));
        if !requirement.is_exact() {
            tracing::debug!(
                network = %requirement.network,
                asset = %requirement.asset,
                scheme = %requirement.scheme,
                "skipping requirement with unsupported scheme"
            );
            continue;
        }

        for (signer_index, signer) in signers.for_network(&requirement.network) {
            if !signer.can_sign(requirement) {
                continue;
            }
            if let Some(max) = signer.max_amount() {
                if amount.inner() > max {
                    tracing::debug!(
                        network = %requirement.network,
                        asset = %requirement.asset,
                        %amount,
                        %max,
                        "signer ceiling below required amount"
                    );
                    continue;
                }
            }
            let token_priority = signer
                .config()
                .matching_token(requirement)
                .map(|token| token.priority)
                .unwrap_or_default();
            candidates.push(Candidate {
                requirements: requirement,
                signer,
                signer_index,
                signer_priority: signer.priority(),
                token_priority,
                amount,
            });
        }
    }

    if parsed == 0 {
        return Err(X402Error::InvalidRequirements {
            reason: if requirements.is_empty() {
                "no payment requirements offered".to_string()
            } else {
                "no payment requirement has a parsable maxAmountRequired".to_string()
            },
        });
    }
    if candidates.is_empty() {
        return Err(X402Error::NoValidSigner { attempted });
    }

    // `sort_by_key` is stable, which keeps encounter order among equal keys.
    candidates.sort_by_key(|candidate| candidate.rank_key());
    Ok(candidates)
}

/// A signed payment together with the requirement it pays.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub requirements: &'a PaymentRequirements,
    pub payload: PaymentPayload,
}

/// Picks the best candidate and signs it.
pub async fn select(
    requirements: &[PaymentRequirements],
    signers: &SignerRegistry,
) -> Result<PaymentPayload, X402Error> {
    select_requirement(requirements, signers)
        .await
        .map(|selection| selection.payload)
}

/// Like [`select`], but also hands back the requirement that was paid, which
/// the facilitator needs alongside the payload.
#[cfg_attr(feature = "telemetry", tracing::instrument(name = "x402.select", skip_all, err))]
pub async fn select_requirement<'a>(
    requirements: &'a [PaymentRequirements],
    signers: &'a SignerRegistry,
) -> Result<Selection<'a>, X402Error> {
    let candidates = rank(requirements, signers)?;
    let Some(winner) = candidates.first() else {
        return Err(X402Error::NoValidSigner { attempted: vec![] });
    };
    tracing::debug!(
        network = %winner.requirements.network,
        asset = %winner.requirements.asset,
        amount = %winner.amount,
        signer_index = winner.signer_index,
        signer_priority = winner.signer_priority,
        token_priority = winner.token_priority,
        candidates = candidates.len(),
        "selected payment candidate"
    );
    let payload = winner
        .signer
        .sign(winner.requirements)
        .await
        .map_err(|e| match e {
            e @ X402Error::SigningFailed { .. } => e,
            other => X402Error::signing_failed(
                &winner.requirements.network,
                &winner.requirements.asset,
                other,
            ),
        })?;
    Ok(Selection {
        requirements: winner.requirements,
        payload,
    })
}
