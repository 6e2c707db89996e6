//!
//! Utility helpers shared across the engine.

/// Identifier generation
pub mod ids;

pub use ids::random_id;
