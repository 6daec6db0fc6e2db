// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use bincode::error::{DecodeError, EncodeError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// An encoding or decoding failure: malformed binary input, an
/// unsupported format, or an internal encoding bug.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Error(pub String);

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(&self.0, f)
	}
}

impl std::error::Error for Error {}

impl From<EncodeError> for Error {
	fn from(value: EncodeError) -> Self {
		Self(value.to_string())
	}
}

impl From<DecodeError> for Error {
	fn from(value: DecodeError) -> Self {
		Self(value.to_string())
	}
}
