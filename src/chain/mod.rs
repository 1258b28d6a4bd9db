//! Chain identification: CAIP-2 ids and the chain families signers belong to.

mod chain_id;

pub use chain_id::*;

use std::fmt;

/// Chain family a signer variant can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// Account-model EVM chains (CAIP-2 namespace `eip155`).
    Eip155,
    /// Solana clusters (CAIP-2 namespace `solana`).
    Solana,
}

impl ChainFamily {
    pub fn of(chain_id: &ChainId) -> Option<Self> {
        match chain_id.namespace() {
            "eip155" => Some(ChainFamily::Eip155),
            "solana" => Some(ChainFamily::Solana),
            _ => None,
        }
    }

    /// Family of a network string, known name or CAIP-2.
    pub fn of_network(network: &str) -> Option<Self> {
        ChainId::resolve(network).as_ref().and_then(Self::of)
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFamily::Eip155 => write!(f, "eip155"),
            ChainFamily::Solana => write!(f, "solana"),
        }
    }
}

/// Numeric EIP-155 chain id, the `chainId` of an EIP-712 domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eip155ChainReference(u64);

impl Eip155ChainReference {
    pub const fn new(chain_id: u64) -> Self {
        Self(chain_id)
    }

    pub fn inner(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0} is not an EVM chain")]
pub struct NotEip155Chain(pub ChainId);

impl TryFrom<ChainId> for Eip155ChainReference {
    type Error = NotEip155Chain;

    fn try_from(chain_id: ChainId) -> Result<Self, Self::Error> {
        if chain_id.namespace() != "eip155" {
            return Err(NotEip155Chain(chain_id));
        }
        chain_id
            .reference()
            .parse::<u64>()
            .map(Eip155ChainReference)
            .map_err(|_| NotEip155Chain(chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_of_known_and_caip2_networks() {
        assert_eq!(ChainFamily::of_network("base"), Some(ChainFamily::Eip155));
        assert_eq!(ChainFamily::of_network("solana-devnet"), Some(ChainFamily::Solana));
        assert_eq!(ChainFamily::of_network("eip155:1"), Some(ChainFamily::Eip155));
        assert_eq!(ChainFamily::of_network("cosmos:hub"), None);
        assert_eq!(ChainFamily::of_network("nowhere"), None);
    }

    #[test]
    fn eip155_reference_parses_numeric_ids_only() {
        let base = Eip155ChainReference::try_from(ChainId::new("eip155", "8453")).unwrap();
        assert_eq!(base.inner(), 8453);
        assert!(Eip155ChainReference::try_from(ChainId::new("eip155", "abc")).is_err());
        assert!(Eip155ChainReference::try_from(ChainId::new("solana", "1")).is_err());
    }
}
