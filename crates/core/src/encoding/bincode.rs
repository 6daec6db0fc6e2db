// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

// This file includes portions of code from https://github.com/erikgrinaker/toydb (Apache 2 License).
// Original Apache 2 License Copyright (c) erikgrinaker 2024.

//! Bincode is used to encode values, both for deltas in the shard log
//! and for objects crossing the runtime boundary. It is a simple,
//! terse, self-describing-enough binary format.
//!
//! Fixed-width integer encoding is used so that an object's encoded
//! size does not depend on the magnitude of its version counters.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

use super::{Error, Result};

fn config() -> impl bincode::config::Config {
	bincode::config::legacy()
}

/// Serializes a value using Bincode. Serialization of in-memory values
/// does not fail.
pub fn serialize<V: Serialize>(value: &V) -> Vec<u8> {
	bincode::serde::encode_to_vec(value, config()).expect("value must be serializable")
}

/// Serializes a value into a writer using Bincode.
pub fn serialize_into<W: Write, V: Serialize>(mut writer: W, value: &V) -> Result<()> {
	bincode::serde::encode_into_std_write(value, &mut writer, config())?;
	Ok(())
}

/// Deserializes a value from a byte slice using Bincode, rejecting
/// trailing garbage.
pub fn deserialize<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
	let (value, read) = bincode::serde::decode_from_slice(bytes, config())?;
	if read != bytes.len() {
		return Err(Error(format!("trailing bytes after value: {} of {}", bytes.len() - read, bytes.len())));
	}
	Ok(value)
}

/// Deserializes a value from a reader using Bincode.
pub fn deserialize_from<R: Read, V: DeserializeOwned>(mut reader: R) -> Result<V> {
	Ok(bincode::serde::decode_from_std_read(&mut reader, config())?)
}

/// Deserializes a value from a reader using Bincode, or returns None if
/// the reader is closed.
pub fn maybe_deserialize_from<R: Read, V: DeserializeOwned>(mut reader: R) -> Result<Option<V>> {
	match bincode::serde::decode_from_std_read(&mut reader, config()) {
		Ok(value) => Ok(Some(value)),
		Err(bincode::error::DecodeError::Io {
			inner,
			..
		}) if inner.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
		Err(err) => Err(err.into()),
	}
}
