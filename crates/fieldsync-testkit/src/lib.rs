//! # fieldsync testkit
//!
//! Testing utilities for fieldsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Decision vectors**: Known conflict cases with expected winners, shared
//!   with other client implementations
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A wired-up in-memory store, remote and local table
//!
//! ## Decision Vectors
//!
//! ```rust
//! use fieldsync_testkit::vectors::verify_all_vectors;
//!
//! for (name, ok) in verify_all_vectors() {
//!     assert!(ok, "{name}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fieldsync_testkit::generators::{case_from_params, ConflictParams};
//!
//! proptest! {
//!     #[test]
//!     fn resolution_is_pure(params: ConflictParams) {
//!         let case = case_from_params(&params);
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use fieldsync_sync::SyncConfig;
//! use fieldsync_testkit::fixtures::{asset, TestFixture};
//!
//! # async fn example() {
//! let fixture = TestFixture::new();
//! let orchestrator = fixture.orchestrator(SyncConfig::default());
//! fixture.remote_update(asset(42), r#"{"brand":"Trane"}"#).await;
//! # let _ = orchestrator;
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{interleaved_edits, TestFixture};
pub use generators::{case_from_params, ConflictParams};
pub use vectors::{all_vectors, verify_all_vectors, Expected, ResolutionVector};
