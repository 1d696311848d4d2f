//! Contract Validator, the Pre-Sim Gate.
//!
//! Five ordered checks, each contributing errors (fatal) and/or warnings
//! (recorded, non-fatal) to a `ValidationReport`. Every check runs and
//! aggregates into the one report rather than failing on the first
//! mismatch, over a stable error-code space callers can match on.

use serde::{Deserialize, Serialize};

use crate::contract::model::{Contract, SchemaVersion};
use crate::units::Dimension;

/// The stable error code space exposed across the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ErrorCode {
    SCHEMA_VIOLATION,
    GRAVITY_OUT_OF_RANGE,
    INVALID_MASS,
    INVALID_SIZE,
    NORMAL_NOT_UNIT,
    NORMAL_PARALLEL_GRAVITY,
    FRICTION_INCONSISTENT,
    NEGATIVE_FRICTION,
    INVALID_RESTITUTION,
    INVALID_TIME_WINDOW,
    MISSING_BODY_REFERENCE,
    MISSING_SURFACE_REFERENCE,
    VALIDATION_EXCEPTION,
    PRE_SIM_GATE_FAILURE,
    DIVERGENCE,
    BUDGET_EXHAUSTED,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub location: String,
    pub suggestion: Option<String>,
}

impl ReportError {
    fn fatal(code: ErrorCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            location: location.into(),
            suggestion: None,
        }
    }

    fn warn(code: ErrorCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
            location: location.into(),
            suggestion: None,
        }
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckDetails {
    pub error_count: usize,
    pub warning_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportDetails {
    pub units: CheckDetails,
    pub geometry: CheckDetails,
    pub physics: CheckDetails,
    pub feasibility: CheckDetails,
}

/// Per-check weight subtracted from the aggregate score whenever that check
/// raises at least one fatal error.
const WEIGHT_SCHEMA: f64 = 0.4;
const WEIGHT_UNITS: f64 = 0.2;
const WEIGHT_GEOMETRY: f64 = 0.2;
const WEIGHT_PHYSICS: f64 = 0.1;
const WEIGHT_FEASIBILITY: f64 = 0.1;

/// Bounds on gravity magnitude the units check enforces.
const GRAVITY_MIN: f64 = 1.0;
const GRAVITY_MAX: f64 = 20.0;
const GRAVITY_EARTHLIKE_MIN: f64 = 9.0;
const GRAVITY_EARTHLIKE_MAX: f64 = 10.0;

/// Maximum allowed deviation of a surface normal from unit length.
const NORMAL_UNIT_TOLERANCE: f64 = 1e-6;
/// Maximum allowed cosine between a surface normal and gravity direction.
const NORMAL_PARALLEL_LIMIT: f64 = 0.99;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub success: bool,
    pub score: f64,
    pub errors: Vec<ReportError>,
    pub warnings: Vec<String>,
    pub details: ReportDetails,
}

impl ValidationReport {
    fn has_fatal(&self, predicate: impl Fn(&ReportError) -> bool) -> bool {
        self.errors
            .iter()
            .any(|e| e.severity == Severity::Error && predicate(e))
    }
}

/// Run all five checks and produce the report. Does not raise: callers that
/// need a fail-closed gate should use [`assert`].
pub fn validate_contract(contract: &Contract) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut score = 1.0;

    let schema_errors = check_schema(contract);
    if !schema_errors.is_empty() {
        score -= WEIGHT_SCHEMA;
    }
    errors.extend(schema_errors);

    let (units_errors, units_warnings) = check_units(contract);
    let units_details = CheckDetails {
        error_count: units_errors.len(),
        warning_count: units_warnings.len(),
    };
    if !units_errors.is_empty() {
        score -= WEIGHT_UNITS;
    }
    errors.extend(units_errors);
    warnings.extend(units_warnings);

    let geometry_errors = check_geometry(contract);
    let geometry_details = CheckDetails {
        error_count: geometry_errors.len(),
        warning_count: 0,
    };
    if !geometry_errors.is_empty() {
        score -= WEIGHT_GEOMETRY;
    }
    errors.extend(geometry_errors);

    let physics_errors = check_physics_ranges(contract);
    let physics_details = CheckDetails {
        error_count: physics_errors.len(),
        warning_count: 0,
    };
    if !physics_errors.is_empty() {
        score -= WEIGHT_PHYSICS;
    }
    errors.extend(physics_errors);

    let feasibility_errors = check_feasibility(contract);
    let feasibility_details = CheckDetails {
        error_count: feasibility_errors.len(),
        warning_count: 0,
    };
    if !feasibility_errors.is_empty() {
        score -= WEIGHT_FEASIBILITY;
    }
    errors.extend(feasibility_errors);

    let score = score.clamp(0.0, 1.0);
    let success = !errors.iter().any(|e| e.severity == Severity::Error);

    if !success {
        log::warn!(
            "pre-sim gate failed with {} fatal error(s), score {:.2}",
            errors.iter().filter(|e| e.severity == Severity::Error).count(),
            score
        );
    }

    ValidationReport {
        success,
        score,
        errors,
        warnings,
        details: ReportDetails {
            units: units_details,
            geometry: geometry_details,
            physics: physics_details,
            feasibility: feasibility_details,
        },
    }
}

/// Fail-closed entry point: raises [`crate::error::PreSimGateError`] carrying
/// the full report on any fatal error, otherwise returns the report for
/// logging.
pub fn assert(contract: &Contract) -> Result<ValidationReport, crate::error::PreSimGateError> {
    let report = validate_contract(contract);

    if report.success {
        Ok(report)
    } else {
        Err(crate::error::PreSimGateError { report })
    }
}

fn check_schema(contract: &Contract) -> Vec<ReportError> {
    let mut errors = Vec::new();

    match contract.schema_version() {
        None => errors.push(ReportError::fatal(
            ErrorCode::SCHEMA_VIOLATION,
            "schema_version",
            format!("malformed schema_version `{}`", contract.schema_version),
        )),
        Some(version) if !version.is_supported() => errors.push(
            ReportError::fatal(
                ErrorCode::SCHEMA_VIOLATION,
                "schema_version",
                format!(
                    "unsupported major version {} (supported: {})",
                    version.major,
                    SchemaVersion::SUPPORTED_MAJOR
                ),
            )
            .with_suggestion("migrate the contract to a supported major version"),
        ),
        _ => {}
    }

    if contract.bodies.is_empty() {
        errors.push(ReportError::fatal(
            ErrorCode::SCHEMA_VIOLATION,
            "bodies",
            "contract declares no bodies",
        ));
    }

    let mut seen_ids = std::collections::HashSet::new();
    for body in &contract.bodies {
        if body.id.is_empty() {
            errors.push(ReportError::fatal(
                ErrorCode::SCHEMA_VIOLATION,
                "bodies[].id",
                "body id must not be empty",
            ));
        } else if !seen_ids.insert(body.id.clone()) {
            errors.push(ReportError::fatal(
                ErrorCode::SCHEMA_VIOLATION,
                format!("bodies[{}]", body.id),
                "duplicate body id",
            ));
        }
    }

    let mut seen_surface_ids = std::collections::HashSet::new();
    for surface in &contract.surfaces {
        if surface.id.is_empty() || !seen_surface_ids.insert(surface.id.clone()) {
            errors.push(ReportError::fatal(
                ErrorCode::SCHEMA_VIOLATION,
                "surfaces[].id",
                "surface id must be unique and non-empty",
            ));
        }
    }

    if contract.end_condition.t_end.is_none() && contract.end_condition.terminal_event.is_none() {
        errors.push(ReportError::fatal(
            ErrorCode::SCHEMA_VIOLATION,
            "end_condition",
            "end_condition must declare t_end and/or terminal_event",
        ));
    }

    errors
}

fn check_units(contract: &Contract) -> (Vec<ReportError>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match contract
        .world
        .gravity
        .x
        .hypot(contract.world.gravity.y)
        .abs()
    {
        magnitude if magnitude < GRAVITY_MIN || magnitude > GRAVITY_MAX => {
            errors.push(ReportError::fatal(
                ErrorCode::GRAVITY_OUT_OF_RANGE,
                "world.gravity",
                format!(
                    "gravity magnitude {:.3} m/s^2 outside [{GRAVITY_MIN}, {GRAVITY_MAX}]",
                    magnitude
                ),
            ));
        }
        magnitude if !(GRAVITY_EARTHLIKE_MIN..=GRAVITY_EARTHLIKE_MAX).contains(&magnitude) => {
            warnings.push(format!(
                "gravity magnitude {:.3} m/s^2 is outside Earth-like [{GRAVITY_EARTHLIKE_MIN}, {GRAVITY_EARTHLIKE_MAX}]",
                magnitude
            ));
        }
        _ => {}
    }

    for body in &contract.bodies {
        match body.mass.to_si_expect(Dimension::MASS) {
            Ok(mass) if mass <= 0.0 => errors.push(ReportError::fatal(
                ErrorCode::INVALID_MASS,
                format!("bodies[{}].mass", body.id),
                format!("mass {mass} must be positive"),
            )),
            Ok(_) => {}
            Err(err) => errors.push(ReportError::fatal(
                ErrorCode::INVALID_MASS,
                format!("bodies[{}].mass", body.id),
                err.to_string(),
            )),
        }

        if let Some(size) = body.size {
            if size.x <= 0.0 || size.y <= 0.0 {
                errors.push(ReportError::fatal(
                    ErrorCode::INVALID_SIZE,
                    format!("bodies[{}].size", body.id),
                    "size components must be positive",
                ));
            }
        }

        if let Some(radius) = body.radius {
            match radius.to_si() {
                Ok(r) if r <= 0.0 => errors.push(ReportError::fatal(
                    ErrorCode::INVALID_SIZE,
                    format!("bodies[{}].radius", body.id),
                    "radius must be positive",
                )),
                Err(err) => errors.push(ReportError::fatal(
                    ErrorCode::INVALID_SIZE,
                    format!("bodies[{}].radius", body.id),
                    err.to_string(),
                )),
                Ok(_) => {}
            }
        }
    }

    (errors, warnings)
}

fn check_geometry(contract: &Contract) -> Vec<ReportError> {
    let mut errors = Vec::new();

    let gravity = vek::Vec2::new(contract.world.gravity.x, contract.world.gravity.y);
    let gravity_norm = gravity.magnitude();
    let gravity_dir = if gravity_norm > 0.0 {
        Some(gravity / gravity_norm)
    } else {
        None
    };

    for surface in &contract.surfaces {
        let n = vek::Vec2::new(surface.normal.x, surface.normal.y);
        let len = n.magnitude();

        if (len - 1.0).abs() > NORMAL_UNIT_TOLERANCE {
            errors.push(ReportError::fatal(
                ErrorCode::NORMAL_NOT_UNIT,
                format!("surfaces[{}].normal", surface.id),
                format!("normal has length {len:.9}, expected 1.0 within {NORMAL_UNIT_TOLERANCE}"),
            ));
            continue;
        }

        if let Some(gravity_dir) = gravity_dir {
            let cos = n.dot(gravity_dir).abs();
            if cos > NORMAL_PARALLEL_LIMIT {
                errors.push(ReportError::fatal(
                    ErrorCode::NORMAL_PARALLEL_GRAVITY,
                    format!("surfaces[{}].normal", surface.id),
                    format!(
                        "|n . g_hat| = {cos:.4} exceeds limit {NORMAL_PARALLEL_LIMIT}"
                    ),
                ));
            }
        }
    }

    for stage in &contract.stages {
        for pair in &stage.active_interactions {
            if contract.body(&pair.a).is_none() && contract.surface(&pair.a).is_none() {
                errors.push(ReportError::fatal(
                    ErrorCode::MISSING_BODY_REFERENCE,
                    format!("stages[{}].active_interactions", stage.id),
                    format!("entity `{}` does not exist", pair.a),
                ));
            }
            if contract.body(&pair.b).is_none() && contract.surface(&pair.b).is_none() {
                errors.push(ReportError::fatal(
                    ErrorCode::MISSING_BODY_REFERENCE,
                    format!("stages[{}].active_interactions", stage.id),
                    format!("entity `{}` does not exist", pair.b),
                ));
            }
        }
    }

    errors
}

fn check_physics_ranges(contract: &Contract) -> Vec<ReportError> {
    let mut errors = Vec::new();

    for surface in &contract.surfaces {
        let mu_s = surface.static_friction.to_si().unwrap_or(f64::NAN);
        let mu_k = surface.kinetic_friction.to_si().unwrap_or(f64::NAN);
        let e = surface.restitution.to_si().unwrap_or(f64::NAN);

        if mu_s < 0.0 || mu_k < 0.0 {
            errors.push(ReportError::fatal(
                ErrorCode::NEGATIVE_FRICTION,
                format!("surfaces[{}]", surface.id),
                "friction coefficients must be non-negative",
            ));
        } else if mu_k > mu_s {
            errors.push(ReportError::fatal(
                ErrorCode::FRICTION_INCONSISTENT,
                format!("surfaces[{}]", surface.id),
                format!("kinetic friction {mu_k} exceeds static friction {mu_s}"),
            ));
        }

        if !(0.0..=1.0).contains(&e) {
            errors.push(ReportError::fatal(
                ErrorCode::INVALID_RESTITUTION,
                format!("surfaces[{}].restitution", surface.id),
                format!("restitution {e} outside [0, 1]"),
            ));
        }
    }

    for spring in &contract.springs {
        if spring.stiffness.to_si().unwrap_or(0.0) <= 0.0 {
            errors.push(ReportError::fatal(
                ErrorCode::SCHEMA_VIOLATION,
                format!("springs[{}].stiffness", spring.id),
                "spring stiffness must be positive",
            ));
        }
    }

    for rope in &contract.ropes {
        if rope.length.to_si().unwrap_or(0.0) <= 0.0 {
            errors.push(ReportError::fatal(
                ErrorCode::SCHEMA_VIOLATION,
                format!("ropes[{}].length", rope.id),
                "rope length must be positive",
            ));
        }
    }

    errors
}

fn check_feasibility(contract: &Contract) -> Vec<ReportError> {
    let mut errors = Vec::new();

    for expected in &contract.expected_events {
        if let Some(window) = expected.window {
            if !(0.0 <= window.t_min && window.t_min <= window.t_max) {
                errors.push(ReportError::fatal(
                    ErrorCode::INVALID_TIME_WINDOW,
                    format!("expected_events[{}].window", expected.name),
                    format!(
                        "window [{}, {}] must satisfy 0 <= t_min <= t_max",
                        window.t_min, window.t_max
                    ),
                ));
            }
        }

        if let Some(body_id) = &expected.body {
            if contract.body(body_id).is_none() {
                errors.push(ReportError::fatal(
                    ErrorCode::MISSING_BODY_REFERENCE,
                    format!("expected_events[{}].body", expected.name),
                    format!("body `{body_id}` does not exist"),
                ));
            }
        }

        if let Some(surface_id) = &expected.surface {
            if contract.surface(surface_id).is_none() {
                errors.push(ReportError::fatal(
                    ErrorCode::MISSING_SURFACE_REFERENCE,
                    format!("expected_events[{}].surface", expected.name),
                    format!("surface `{surface_id}` does not exist"),
                ));
            }
        }
    }

    for constraint in &contract.constraints {
        if contract.body(&constraint.body).is_none() {
            errors.push(ReportError::fatal(
                ErrorCode::MISSING_BODY_REFERENCE,
                format!("constraints[{}].body", constraint.id),
                format!("body `{}` does not exist", constraint.body),
            ));
        }
    }

    errors
}
