// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

//! Test-only helpers shared across the workspace. This crate must only
//! ever appear in `[dev-dependencies]`.

pub use tempfile::TempDir;

/// A temporary directory removed on drop, for file-backed log tests.
pub fn tempdir() -> TempDir {
	tempfile::tempdir().expect("cannot create temporary directory")
}
