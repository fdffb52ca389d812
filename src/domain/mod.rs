//! Domain layer for Layer Guard
//!
//! CDD Principle: Domain Model - Pure logic for layering enforcement
//! - Contains the dependency snapshot, its units and references
//! - Holds violations and the check report aggregate
//! - Independent of file systems, parsers and output formats

pub mod units;
pub mod violations;

// Re-export main domain types for convenience
pub use units::*;
pub use violations::*;
