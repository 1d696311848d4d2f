//! The Contract data model as carried on the wire, and the Pre-Sim Gate
//! validator that checks it.

pub mod model;
pub mod validate;

pub use model::*;
pub use validate::{assert, validate_contract, ErrorCode, Severity, ValidationReport};
