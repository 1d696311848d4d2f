//! Error types for the three external interfaces.
//!
//! `PreSimGateError` carries the full `ValidationReport` so a caller that
//! only checks `Err`/`Ok` can still recover per-check detail without a
//! second call. Built on `miette`/`thiserror` so every variant carries a
//! stable diagnostic code alongside its message.

use miette::Diagnostic;
use thiserror::Error;

use crate::contract::validate::ValidationReport;

/// Returned by `validate_contract` when the Pre-Sim Gate rejects a contract.
#[derive(Debug, Error, Diagnostic)]
#[error("pre-sim gate rejected the contract (score {:.2})", self.report.score)]
#[diagnostic(code(physics_contract_core::pre_sim_gate_failure))]
pub struct PreSimGateError {
    pub report: ValidationReport,
}

/// Failures raised during `simulate`, once the contract has already cleared
/// the Pre-Sim Gate.
#[derive(Debug, Error, Diagnostic)]
pub enum SimulationError {
    #[error("simulation diverged at t={t:.6}: {reason}")]
    #[diagnostic(code(physics_contract_core::divergence))]
    Divergence { t: f64, reason: String },

    #[error("step budget of {budget} exhausted before reaching end condition")]
    #[diagnostic(code(physics_contract_core::budget_exhausted))]
    BudgetExhausted { budget: u64 },

    #[error("unresolved reference `{reference}` in {location}")]
    #[diagnostic(code(physics_contract_core::missing_reference))]
    MissingReference { reference: String, location: String },

    #[error("internal invariant violated: {0}")]
    #[diagnostic(code(physics_contract_core::validation_exception))]
    ValidationException(String),
}

/// Failures raised during `validate_result`, the Post-Sim Gate.
#[derive(Debug, Error, Diagnostic)]
pub enum PostSimGateError {
    #[error("trace is malformed: {0}")]
    #[diagnostic(code(physics_contract_core::malformed_trace))]
    MalformedTrace(String),
}
