//! Pipeline stages shared by all three operations.
//!
//! Each submodule implements exactly one transformation step, independently
//! testable without an engine or a network.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ validate ──▶ fingerprint ──▶ cache/dispatch ──▶ [structure]
//! (data-URI/bytes)  (ImageAsset)   (engine)          (doc fallback only)
//! ```
//!
//! 1. [`validate`]  — decode and check the raw input against the configured
//!    format allow-list and size cap
//! 2. [`structure`] — heuristic document-structure recovery, used when the
//!    selected backend has no native document analysis

pub mod structure;
pub mod validate;
