//! Application layer containing the lifecycle orchestration.
//!
//! [`engine::EngagementEngine`] is the single entry point for every actor
//! operation. Each operation loads one document, lets the domain validate and
//! apply the transition, and writes it back with compare-and-swap; the
//! operations are split by concern across the sibling modules.

pub mod arbitration;
pub mod commitments;
pub mod engine;
pub mod negotiation;
pub mod requests;
pub mod sessions;
pub mod sweeper;
