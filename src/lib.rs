//! mercury-core: native performance-instrumentation core for a server-side
//! web-framework test harness.
//!
//! # Overview
//!
//! mercury-core tracks per-test session metrics (elapsed time, memory,
//! query and cache counters), clusters and classifies SQL text to surface
//! N+1 query patterns, runs a 256-slot test-context pool that finalizes
//! into an append-only memory-mapped history journal, and persists a small
//! binary configuration blob. None of this is exposed as idiomatic Rust to
//! its consumer directly: the host is a non-Rust test harness, so every
//! operation is also exported as a flat `extern "C"` function in [`abi`].
//!
//! # Module Structure
//!
//! - [`session`]: Per-test timing and counter sessions (C2)
//! - [`analyzer`]: Query normalization and N+1 cluster detection (C3)
//! - [`orchestrator`]: Test-context pool and history journal (C4)
//! - [`config`]: Binary configuration blob persistence (C5)
//! - [`primitives`]: Low-level building blocks shared across modules
//! - [`error`]: The crate's error type and thread-local last-error slot
//! - [`abi`]: The flat C ABI surface
//!
//! # API Stability
//!
//! This crate is consumed exclusively through [`abi`]'s `extern "C"`
//! functions; the safe Rust modules underneath are not part of any
//! stability contract.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_arguments)]

pub mod abi;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod primitives;
pub mod session;
