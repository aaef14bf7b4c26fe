//! Core data types and lifecycle enums.

pub mod enums;
pub mod tick;

pub use enums::*;
pub use tick::*;
