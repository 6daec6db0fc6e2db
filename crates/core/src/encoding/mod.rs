// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

// This file includes portions of code from https://github.com/erikgrinaker/toydb (Apache 2 License).
// Original Apache 2 License Copyright (c) erikgrinaker 2024.

pub use error::Error;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

pub mod bincode;
mod error;

pub type Result<T> = std::result::Result<T, Error>;

/// Adds automatic Bincode encode/decode methods to value types. This is
/// the serialized form of deltas in the shard log as well as of objects
/// crossing the runtime boundary.
pub trait Value: Serialize + DeserializeOwned {
	/// Decodes a value from a byte slice using Bincode.
	fn decode(bytes: &[u8]) -> Result<Self> {
		bincode::deserialize(bytes)
	}

	/// Decodes a value from a reader using Bincode.
	fn decode_from<R: Read>(reader: R) -> Result<Self> {
		bincode::deserialize_from(reader)
	}

	/// Decodes a value from a reader using Bincode, or returns None if
	/// the reader is closed.
	fn maybe_decode_from<R: Read>(reader: R) -> Result<Option<Self>> {
		bincode::maybe_deserialize_from(reader)
	}

	/// Encodes a value to a byte vector using Bincode.
	fn encode(&self) -> Vec<u8> {
		bincode::serialize(self)
	}

	/// Encodes a value into a writer using Bincode.
	fn encode_into<W: Write>(&self, writer: W) -> Result<()> {
		bincode::serialize_into(writer, self)
	}

	/// The number of bytes `encode` would produce, used to size delta
	/// buffers.
	fn encoded_size(&self) -> usize {
		self.encode().len()
	}
}

/// Blanket implementations for types wrapping a value type.
impl<V: Value> Value for Option<V> {}
impl<V: Value> Value for Vec<V> {}
impl<V1: Value, V2: Value> Value for (V1, V2) {}
