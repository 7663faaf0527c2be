//! Claim fingerprinting and fraud-risk scoring.
//!
//! A submitted claim is embedded, reduced to a privacy-preserving
//! fingerprint, matched against the stored corpus and scored. See
//! `orchestrator` for the per-claim state machine.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod media;
pub mod narrative;
pub mod orchestrator;
pub mod report;
pub mod repository;
pub mod rng;
pub mod scoring;
pub mod similarity;
pub mod store;
pub mod types;
