//! Core domain types
//!
//! This module contains the core domain structures used across Sluice
//! services. These types represent the fundamental business entities and
//! are shared between the provider layer (which populates Events) and the
//! orchestrator (which matches, resolves, and supervises Runs).

pub mod event;
pub mod pipeline;
pub mod repository;
pub mod run;
pub mod status;
