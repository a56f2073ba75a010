//! Client-side address derivation
//!
//! Addresses are computed before anything exists on chain. The first two bytes carry
//! the owning shard, the remaining eighteen are the tail of a keccak digest over the
//! chain id, the salt and the init code hash.

use crate::{types::ShardId, DeployerError, Result};
use alloy_primitives::{keccak256, Address, U256};
use rand::Rng;

/// Domain tag for ephemeral deployer accounts
const DEPLOYER_TAG: &[u8] = b"ephemeral-deployer";

/// Number of address bytes holding the shard id
const SHARD_PREFIX_LEN: usize = 2;

/// Derives contract and deployer addresses
#[derive(Debug, Clone, Copy)]
pub struct AddressDeriver {
    max_salt: u64,
}

impl AddressDeriver {
    pub fn new(max_salt: u64) -> Self {
        Self { max_salt }
    }

    pub fn max_salt(&self) -> u64 {
        self.max_salt
    }

    pub fn validate_salt(&self, salt: u64) -> Result<()> {
        if salt > self.max_salt {
            return Err(DeployerError::InvalidSalt {
                salt,
                max: self.max_salt,
            });
        }
        Ok(())
    }

    /// Derive the address a contract with `init_code` will occupy
    pub fn derive(
        &self,
        salt: u64,
        init_code: &[u8],
        shard: ShardId,
        chain_id: u64,
    ) -> Result<Address> {
        self.validate_salt(salt)?;
        if init_code.is_empty() {
            return Err(DeployerError::EmptyBytecode);
        }

        let code_hash = keccak256(init_code);

        let mut preimage = Vec::with_capacity(8 + 32 + 32);
        preimage.extend_from_slice(&chain_id.to_be_bytes());
        preimage.extend_from_slice(&U256::from(salt).to_be_bytes::<32>());
        preimage.extend_from_slice(code_hash.as_slice());

        Ok(with_shard_prefix(shard, &keccak256(&preimage)[..]))
    }

    /// Derive the ephemeral account used by the internal strategy
    pub fn derive_deployer(&self, salt: u64, shard: ShardId, chain_id: u64) -> Result<Address> {
        self.validate_salt(salt)?;

        let mut preimage = Vec::with_capacity(DEPLOYER_TAG.len() + 8 + 32);
        preimage.extend_from_slice(DEPLOYER_TAG);
        preimage.extend_from_slice(&chain_id.to_be_bytes());
        preimage.extend_from_slice(&U256::from(salt).to_be_bytes::<32>());

        Ok(with_shard_prefix(shard, &keccak256(&preimage)[..]))
    }

    /// Draw a salt uniformly from the accepted range
    pub fn random_salt<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(0..=self.max_salt)
    }
}

/// Shard that owns an address
pub fn shard_of(address: &Address) -> ShardId {
    ShardId::new(u16::from_be_bytes([address[0], address[1]]))
}

fn with_shard_prefix(shard: ShardId, digest: &[u8]) -> Address {
    let mut bytes = [0u8; 20];
    bytes[..SHARD_PREFIX_LEN].copy_from_slice(&shard.to_be_bytes());
    bytes[SHARD_PREFIX_LEN..].copy_from_slice(&digest[32 - (20 - SHARD_PREFIX_LEN)..]);
    Address::from(bytes)
}
