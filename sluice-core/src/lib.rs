//! Sluice Core
//!
//! Core types and abstractions for the Sluice CI orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (Event, Repository, Run, etc.)
//! - Error taxonomy: The shared error enum for one event's processing
//!
//! Note: Provider implementations live in sluice-providers, orchestration
//! logic in sluice-orchestrator.

pub mod domain;
pub mod error;
