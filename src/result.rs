//! Result Validator, the Post-Sim Gate.
//!
//! Two stages, mirroring the Pre-Sim Gate's own split into a cheap
//! structural check and a scored semantic one: [`quick_check`] rejects a
//! malformed trace outright, [`acceptance`] scores a structurally sound
//! trace against the Contract's `expected_events` and numeric tolerances,
//! subtracting one fixed penalty per unmet expectation from a starting
//! score of 1.0.

use vek::Vec2;

use crate::contract::model::Contract;
use crate::error::PostSimGateError;
use crate::sim::event::EventRecord;
use crate::sim::trace::Trace;

/// Deducted from the acceptance score for every `expected_events` entry with
/// no matching recorded event.
pub const MISSING_EVENT_PENALTY: f64 = 0.3;
/// Deducted when a matched event fires outside its declared time window.
pub const OUT_OF_WINDOW_PENALTY: f64 = 0.1;
/// Deducted when total energy in a stage with no dissipative interactions
/// drifts beyond `tolerances.energy_drift_rel`.
pub const DRIFT_PENALTY: f64 = 0.1;
/// Deducted when a matched event's recorded parameter falls outside its
/// declared `value_bounds`.
pub const BOUND_VIOLATION_PENALTY: f64 = 0.2;

#[derive(Debug, Clone, Default)]
pub struct AcceptanceReport {
    pub success: bool,
    pub score: f64,
    pub missing_events: Vec<String>,
    pub out_of_window_events: Vec<String>,
    pub bound_violations: Vec<String>,
    pub energy_drift_rel: Option<f64>,
    pub momentum_drift_rel: Option<f64>,
}

/// Whether this Contract declares any interaction expected to dissipate
/// energy: kinetic friction, a less-than-perfectly-elastic restitution, or
/// an inelastic merge. Stages without one of these are "conservative" and
/// their energy/momentum drift is held to `tolerances.energy_drift_rel`;
/// stages with one are expected to lose energy and aren't penalized for it.
fn has_dissipative_interactions(contract: &Contract) -> bool {
    let surface_dissipates = contract.surfaces.iter().any(|s| {
        let kinetic = s.kinetic_friction.to_si().unwrap_or(0.0);
        let restitution = s.restitution.to_si().unwrap_or(1.0);
        kinetic > 0.0 || restitution < 1.0
    });
    let stage_merges = contract.stages.iter().any(|s| s.merge.is_some());
    surface_dissipates || stage_merges
}

/// Structural sanity check, cheap enough to run unconditionally before
/// scoring: the trace must be non-empty, every sample finite, time
/// non-decreasing, every body within the declared world bounds, and (absent
/// a recognized dissipative interaction) energy within `energy_drift_rel`.
pub fn quick_check(contract: &Contract, trace: &Trace) -> Result<(), PostSimGateError> {
    if trace.samples.is_empty() {
        return Err(PostSimGateError::MalformedTrace("trace has no samples".into()));
    }
    if trace.has_non_finite_sample() {
        return Err(PostSimGateError::MalformedTrace("trace contains a non-finite sample".into()));
    }
    for pair in trace.samples.windows(2) {
        if pair[1].t < pair[0].t {
            return Err(PostSimGateError::MalformedTrace(format!(
                "sample time went backwards: {} -> {}",
                pair[0].t, pair[1].t
            )));
        }
    }

    let bounds_min: Vec2<f64> = contract.world.bounds.min.into();
    let bounds_max: Vec2<f64> = contract.world.bounds.max.into();
    for sample in &trace.samples {
        for body in &sample.bodies {
            let p: Vec2<f64> = body.p.into();
            if p.x < bounds_min.x || p.x > bounds_max.x || p.y < bounds_min.y || p.y > bounds_max.y {
                return Err(PostSimGateError::MalformedTrace(format!(
                    "body {} left world bounds at t={}: ({}, {})",
                    body.id, sample.t, p.x, p.y
                )));
            }
        }
    }

    if !has_dissipative_interactions(contract) {
        if let Some(drift) = energy_drift(trace) {
            if drift.abs() > contract.tolerances.energy_drift_rel {
                return Err(PostSimGateError::MalformedTrace(format!(
                    "energy drifted {:.4} with no recognized dissipative interaction",
                    drift
                )));
            }
        }
    }

    Ok(())
}

fn find_matching_event<'a>(events: &'a [EventRecord], name: &str) -> Option<&'a EventRecord> {
    events.iter().find(|e| e.id == name)
}

/// Score a structurally sound trace against the Contract's expectations.
/// Every unmet expectation subtracts a fixed penalty from a starting score
/// of 1.0, floored at 0.0; `success` is true only when nothing fired a
/// penalty.
pub fn acceptance(contract: &Contract, trace: &Trace) -> AcceptanceReport {
    let mut score = 1.0;
    let mut missing_events = Vec::new();
    let mut out_of_window_events = Vec::new();
    let mut bound_violations = Vec::new();

    for expected in &contract.expected_events {
        match find_matching_event(&trace.events, &expected.name) {
            None => {
                missing_events.push(expected.name.clone());
                score -= MISSING_EVENT_PENALTY;
            }
            Some(event) => {
                if let Some(window) = expected.window {
                    let slack = contract.tolerances.event_time_sec;
                    if event.t < window.t_min - slack || event.t > window.t_max + slack {
                        out_of_window_events.push(expected.name.clone());
                        score -= OUT_OF_WINDOW_PENALTY;
                    }
                }
                if let Some(bounds) = expected.value_bounds {
                    let value = event.parameters.values().next().copied();
                    if let Some(value) = value {
                        let below = bounds.min.map(|min| value < min).unwrap_or(false);
                        let above = bounds.max.map(|max| value > max).unwrap_or(false);
                        if below || above {
                            bound_violations.push(expected.name.clone());
                            score -= BOUND_VIOLATION_PENALTY;
                        }
                    }
                }
            }
        }
    }

    // Drift against the theoretical conservation class: stages with a
    // recognized dissipative interaction (friction, inelastic restitution,
    // a merge) are expected to lose energy/momentum and aren't penalized
    // for it; conservative stages are held to `energy_drift_rel`.
    let dissipative = has_dissipative_interactions(contract);
    let energy_drift_rel = energy_drift(trace);
    let momentum_drift_rel = momentum_drift(contract, trace);
    if !dissipative {
        let energy_exceeded = energy_drift_rel.map(|d| d.abs() > contract.tolerances.energy_drift_rel).unwrap_or(false);
        let momentum_exceeded =
            momentum_drift_rel.map(|d| d.abs() > contract.tolerances.energy_drift_rel).unwrap_or(false);
        if energy_exceeded || momentum_exceeded {
            score -= DRIFT_PENALTY;
        }
    }

    let score = score.clamp(0.0, 1.0);
    let success = missing_events.is_empty()
        && out_of_window_events.is_empty()
        && bound_violations.is_empty()
        && score >= contract.tolerances.r2_min;

    AcceptanceReport {
        success,
        score,
        missing_events,
        out_of_window_events,
        bound_violations,
        energy_drift_rel,
        momentum_drift_rel,
    }
}

/// Relative change in total kinetic energy from the first to the last
/// sample, used as a coarse conservation check. A `None` means there
/// weren't at least two samples to compare.
fn energy_drift(trace: &Trace) -> Option<f64> {
    let first = trace.samples.first()?.energy;
    let last = trace.samples.last()?.energy;
    if first.abs() < f64::EPSILON {
        return None;
    }
    Some((last - first) / first)
}

/// Relative change in the horizontal momentum component from the first to
/// the last sample. Horizontal momentum is the component this pipeline can
/// treat as theoretically conserved: gravity, the only always-on external
/// force, has no horizontal component for any Contract. `None` when gravity
/// has a horizontal component (no conserved axis to check) or there wasn't
/// an initial horizontal momentum to compare against.
fn momentum_drift(contract: &Contract, trace: &Trace) -> Option<f64> {
    if contract.world.gravity.x.abs() > f64::EPSILON {
        return None;
    }
    let first = trace.samples.first()?.momentum.x;
    let last = trace.samples.last()?.momentum.x;
    if first.abs() < f64::EPSILON {
        return None;
    }
    Some((last - first) / first)
}

/// Fail-closed entry point combining both stages.
pub fn validate_result(contract: &Contract, trace: &Trace) -> Result<AcceptanceReport, PostSimGateError> {
    quick_check(contract, trace)?;
    Ok(acceptance(contract, trace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::*;
    use crate::sim::event::Severity;
    use crate::sim::trace::{BodySample, EndReason, Sample, Stats};
    use std::collections::BTreeMap;

    fn sample(t: f64, energy: f64) -> Sample {
        Sample {
            t,
            bodies: vec![BodySample {
                id: "a".into(),
                p: Vec2Quantity { x: 0.0, y: 0.0 },
                v: Vec2Quantity { x: 0.0, y: 0.0 },
                theta: 0.0,
                omega: 0.0,
            }],
            energy,
            momentum: Vec2Quantity { x: 0.0, y: 0.0 },
        }
    }

    fn trace_with(samples: Vec<Sample>, events: Vec<EventRecord>) -> Trace {
        Trace {
            samples,
            events,
            stats: Stats { step_count: 1, rejected_steps: 0, cpu_time_sec: 0.0, max_local_error: 0.0, end_reason: EndReason::TEnd },
        }
    }

    fn contract_with_expected(expected: Vec<ExpectedEvent>) -> Contract {
        Contract {
            schema_version: "physics-contract/1.0.0".into(),
            world: World {
                gravity: Vec2Quantity { x: 0.0, y: -9.8 },
                bounds: Bounds { min: Vec2Quantity { x: -10.0, y: -10.0 }, max: Vec2Quantity { x: 10.0, y: 10.0 } },
                default_step_hint: None,
                stats_budget: None,
                integrator: IntegratorMode::Fixed,
            },
            bodies: vec![],
            surfaces: vec![],
            springs: vec![],
            ropes: vec![],
            stages: vec![],
            expected_events: expected,
            constraints: vec![],
            tolerances: Tolerances::default(),
            end_condition: EndCondition { t_end: Some(1.0), terminal_event: None },
        }
    }

    #[test]
    fn quick_check_rejects_empty_trace() {
        let contract = contract_with_expected(vec![]);
        let trace = trace_with(vec![], vec![]);
        assert!(quick_check(&contract, &trace).is_err());
    }

    #[test]
    fn quick_check_rejects_time_going_backwards() {
        let contract = contract_with_expected(vec![]);
        let trace = trace_with(vec![sample(1.0, 1.0), sample(0.5, 1.0)], vec![]);
        assert!(quick_check(&contract, &trace).is_err());
    }

    #[test]
    fn quick_check_rejects_body_outside_world_bounds() {
        let contract = contract_with_expected(vec![]);
        let mut outside = sample(1.0, 1.0);
        outside.bodies[0].p = Vec2Quantity { x: 0.0, y: 50.0 };
        let trace = trace_with(vec![sample(0.0, 1.0), outside], vec![]);
        assert!(quick_check(&contract, &trace).is_err());
    }

    #[test]
    fn quick_check_rejects_drift_with_no_dissipative_interaction() {
        let contract = contract_with_expected(vec![]);
        let trace = trace_with(vec![sample(0.0, 10.0), sample(1.0, 20.0)], vec![]);
        assert!(quick_check(&contract, &trace).is_err());
    }

    #[test]
    fn quick_check_accepts_drift_when_surface_has_kinetic_friction() {
        let mut contract = contract_with_expected(vec![]);
        contract.surfaces.push(Surface {
            id: "ground".into(),
            kind: SurfaceKind::Plane,
            anchor: Vec2Quantity { x: 0.0, y: 0.0 },
            normal: Vec2Quantity { x: 0.0, y: 1.0 },
            tangent: None,
            length: None,
            static_friction: Quantity::Bare(0.3),
            kinetic_friction: Quantity::Bare(0.25),
            restitution: Quantity::Bare(0.0),
        });
        let trace = trace_with(vec![sample(0.0, 10.0), sample(1.0, 8.0)], vec![]);
        assert!(quick_check(&contract, &trace).is_ok());
    }

    #[test]
    fn missing_expected_event_is_penalized() {
        let contract = contract_with_expected(vec![ExpectedEvent {
            name: "touchdown".into(),
            body: None,
            surface: None,
            kind: None,
            window: None,
            value_bounds: None,
        }]);
        let trace = trace_with(vec![sample(0.0, 1.0), sample(1.0, 1.0)], vec![]);

        let report = acceptance(&contract, &trace);
        assert!(!report.success);
        assert_eq!(report.missing_events, vec!["touchdown".to_string()]);
        assert!((report.score - (1.0 - MISSING_EVENT_PENALTY)).abs() < 1e-9);
    }

    #[test]
    fn matched_event_within_window_scores_perfectly() {
        let contract = contract_with_expected(vec![ExpectedEvent {
            name: "touchdown".into(),
            body: None,
            surface: None,
            kind: None,
            window: Some(TimeWindow { t_min: 0.0, t_max: 1.0 }),
            value_bounds: None,
        }]);
        let event = EventRecord {
            id: "touchdown".into(),
            kind: EventKind::Contact,
            t: 0.5,
            actors: vec![],
            parameters: BTreeMap::new(),
            severity: Severity::Medium,
            converged: true,
        };
        let trace = trace_with(vec![sample(0.0, 1.0), sample(1.0, 1.0)], vec![event]);

        let report = acceptance(&contract, &trace);
        assert!(report.success);
        assert!((report.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn large_energy_drift_is_penalized() {
        let contract = contract_with_expected(vec![]);
        let trace = trace_with(vec![sample(0.0, 10.0), sample(1.0, 20.0)], vec![]);

        let report = acceptance(&contract, &trace);
        assert!(report.energy_drift_rel.unwrap() > contract.tolerances.energy_drift_rel);
        assert!(report.score < 1.0);
        assert!(!report.success);
    }

    #[test]
    fn dissipative_stage_is_not_penalized_for_energy_drift() {
        let mut contract = contract_with_expected(vec![]);
        contract.surfaces.push(Surface {
            id: "ground".into(),
            kind: SurfaceKind::Plane,
            anchor: Vec2Quantity { x: 0.0, y: 0.0 },
            normal: Vec2Quantity { x: 0.0, y: 1.0 },
            tangent: None,
            length: None,
            static_friction: Quantity::Bare(0.3),
            kinetic_friction: Quantity::Bare(0.25),
            restitution: Quantity::Bare(0.0),
        });
        let trace = trace_with(vec![sample(0.0, 10.0), sample(1.0, 8.0)], vec![]);

        let report = acceptance(&contract, &trace);
        assert!(report.success);
        assert!((report.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn score_below_r2_min_fails_success_even_with_no_other_penalty() {
        let mut contract = contract_with_expected(vec![]);
        contract.tolerances.r2_min = 0.999;
        // A drift just over tolerance costs exactly DRIFT_PENALTY (0.1),
        // landing the score at 0.9 -- below this contract's raised r2_min.
        let trace = trace_with(vec![sample(0.0, 10.0), sample(1.0, 10.0 * 1.03)], vec![]);

        let report = acceptance(&contract, &trace);
        assert!((report.score - (1.0 - DRIFT_PENALTY)).abs() < 1e-9);
        assert!(!report.success);
    }
}
