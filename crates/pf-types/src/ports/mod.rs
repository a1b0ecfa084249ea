//! Ports (traits) for the external collaborators.
//!
//! pf-core depends ONLY on these traits; the binary provides the implementations.

pub mod fetch;
pub mod nodes;
pub mod runner;

pub use fetch::*;
pub use nodes::*;
pub use runner::*;
