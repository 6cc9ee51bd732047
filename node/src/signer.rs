// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::errors::PaychError;
use ed25519_dalek::{Signer as _, SigningKey};
use ferry_kernel::paych::voucher::{Signature, SIG_ED25519};
use ferry_kernel::types::address::Address;

/// Signs vouchers and chain messages for one wallet address.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, bytes: &[u8]) -> Result<Signature, PaychError>;
}

pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_hex(seed: &str) -> Result<Self, PaychError> {
        let raw = hex::decode(seed.trim()).map_err(|e| PaychError::Signer(e.to_string()))?;
        let seed: [u8; 32] = raw
            .try_into()
            .map_err(|_| PaychError::Signer("seed must be 32 bytes".into()))?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }
}

impl Signer for Ed25519Signer {
    fn address(&self) -> Address {
        Address::new(format!("f3{}", hex::encode(self.key.verifying_key().as_bytes())))
    }

    fn sign(&self, bytes: &[u8]) -> Result<Signature, PaychError> {
        Ok(Signature {
            kind: SIG_ED25519,
            data: self.key.sign(bytes).to_bytes().to_vec(),
        })
    }
}
