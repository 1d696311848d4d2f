//! physics-contract-core: a deterministic rigid-body simulator paired with
//! the two validation gates that bracket it.
//!
//! ```text
//! Contract -> [Pre-Sim Gate] -> Simulator -> Event Detector -> Trace -> [Post-Sim Gate]
//! ```
//!
//! The Contract is the only input; the Trace is the only output. Three
//! entry points cover the whole pipeline:
//!
//! - [`validate_contract`] / [`contract::assert`] — the Pre-Sim Gate.
//! - [`simulate`] — the integrator and its event/stage machinery.
//! - [`validate_result`] — the Post-Sim Gate.
//!
//! A small set of re-exported entry points sit over a module tree that
//! otherwise stays private, with `log` for runtime tracing and
//! `miette`/`thiserror` for diagnostic-rich errors throughout.

pub mod contract;
pub mod error;
pub mod math;
pub mod result;
pub mod sim;
pub mod units;

pub use contract::model::Contract;
pub use contract::validate::{validate_contract, ValidationReport};
pub use error::{PostSimGateError, PreSimGateError, SimulationError};
pub use result::{validate_result, AcceptanceReport};
pub use sim::{simulate, Trace};
