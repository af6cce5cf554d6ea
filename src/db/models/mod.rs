//! Database models split into domain-specific modules.

pub mod exam;
pub mod patient;
pub mod stats;
pub mod user;

pub use exam::*;
pub use patient::*;
pub use stats::*;
pub use user::*;
