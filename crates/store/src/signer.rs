// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

pub use ed25519_dalek::VerifyingKey;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use sha2::{Digest, Sha256};

/// The signing primitive backing a signature subgroup. Each signed log
/// entry carries `sign(delta || previous signature)`, chaining entries
/// so that a verifier can walk the log back to genesis.
pub struct ShardSigner {
	key: SigningKey,
}

impl ShardSigner {
	pub fn generate() -> Self {
		Self {
			key: SigningKey::generate(&mut rand::rngs::OsRng),
		}
	}

	pub fn from_seed(seed: [u8; 32]) -> Self {
		Self {
			key: SigningKey::from_bytes(&seed),
		}
	}

	pub fn verifying_key(&self) -> VerifyingKey {
		self.key.verifying_key()
	}

	/// Signs a log entry's delta chained onto the previous signature
	/// (empty for the first signed entry).
	pub fn sign(&self, delta: &[u8], previous_signature: &[u8]) -> Vec<u8> {
		let mut message = Vec::with_capacity(delta.len() + previous_signature.len());
		message.extend_from_slice(delta);
		message.extend_from_slice(previous_signature);
		self.key.sign(&message).to_bytes().to_vec()
	}

	/// Verifies a chained signature produced by [`Self::sign`].
	pub fn verify(
		verifying_key: &VerifyingKey,
		delta: &[u8],
		previous_signature: &[u8],
		signature: &[u8],
	) -> bool {
		let Ok(signature) = Signature::from_slice(signature) else {
			return false;
		};
		let mut message = Vec::with_capacity(delta.len() + previous_signature.len());
		message.extend_from_slice(delta);
		message.extend_from_slice(previous_signature);
		verifying_key.verify(&message, &signature).is_ok()
	}
}

/// The hash a signature subgroup stores for a data object's payload.
pub fn hash_blob(bytes: &[u8]) -> Vec<u8> {
	Sha256::digest(bytes).to_vec()
}
