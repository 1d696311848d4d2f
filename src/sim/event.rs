//! Event Detector.
//!
//! Every predicate family reduces to a scalar `g(state)` whose sign change
//! between two proposed states marks an event: a cheap predicate evaluation
//! stands in for a broad phase, and [`bisect`] resolves the exact crossing
//! time the way a narrow phase resolves an exact contact point. Event
//! detection never relies on exceptions for control flow — the simulator
//! drives this with a tagged `StepOutcome` rather than throwing.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use vek::Vec2;

use crate::contract::model::{Comparator, EventKind, PredicateField};
use crate::sim::body::{BodyKey, RigidBody};

/// Reporting-only urgency tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

pub fn default_severity(kind: EventKind) -> Severity {
    match kind {
        EventKind::Collision => Severity::High,
        EventKind::Contact | EventKind::Separation | EventKind::Threshold | EventKind::StateChange => {
            Severity::Medium
        }
        EventKind::Custom => Severity::Low,
    }
}

/// Fixed tie-break order for events within `1e-9` s of each other:
/// collision > contact > separation > threshold > state-change > custom.
pub fn priority(kind: EventKind) -> u8 {
    match kind {
        EventKind::Collision => 0,
        EventKind::Contact => 1,
        EventKind::Separation => 2,
        EventKind::Threshold => 3,
        EventKind::StateChange => 4,
        EventKind::Custom => 5,
    }
}

/// Two simultaneous events are a tie if their times differ by less than
/// this.
pub const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub kind: EventKind,
    pub t: f64,
    pub actors: Vec<String>,
    pub parameters: BTreeMap<String, f64>,
    pub severity: Severity,
    /// False when the bisection root-find hit the iteration cap and the
    /// event was recorded at the bracket midpoint instead. Events are never
    /// silently dropped, even when root-finding fails to converge.
    pub converged: bool,
}

/// One trackable predicate source, built once per active stage from the
/// Contract's active-interaction pairs and expected-event/constraint
/// declarations.
#[derive(Debug, Clone)]
pub enum PredicateSpec {
    /// Body/surface signed distance: falling through zero is a `contact`
    /// event, rising through zero is a `separation` event.
    SurfaceContact { name: String, body: String, surface: String },
    /// Sphere-sphere gap: falling through zero is a `collision` event.
    BallCollision {
        name: String,
        a: String,
        b: String,
        radius_a: f64,
        radius_b: f64,
    },
    /// Sphere-plane gap for a body/surface pair declared `collision` rather
    /// than `contact`: falling through zero is a `collision` event resolved
    /// with an impulse rather than the compliant contact model.
    SurfaceCollision { name: String, body: String, surface: String, radius: f64 },
    /// A user-declared scalar crossing a threshold (from an
    /// `expected_events` entry of kind `threshold`).
    Threshold { name: String, body: String, field: PredicateField, threshold: f64 },
    /// Velocity-direction reversal, `g = v_old . v_new`.
    StateChange { name: String, body: String },
    /// A pre-parsed constraint predicate over a body/state field and a
    /// numeric threshold.
    Custom {
        name: String,
        body: String,
        field: PredicateField,
        comparator: Comparator,
        threshold: f64,
    },
}

impl PredicateSpec {
    pub fn actors(&self) -> Vec<String> {
        match self {
            PredicateSpec::SurfaceContact { body, surface, .. } => vec![body.clone(), surface.clone()],
            PredicateSpec::BallCollision { a, b, .. } => vec![a.clone(), b.clone()],
            PredicateSpec::SurfaceCollision { body, surface, .. } => vec![body.clone(), surface.clone()],
            PredicateSpec::Threshold { body, .. }
            | PredicateSpec::StateChange { body, .. }
            | PredicateSpec::Custom { body, .. } => vec![body.clone()],
        }
    }

    /// Evaluate `g(state)` for this predicate against a candidate body
    /// table. `prev_vel` supplies the velocity at the start of the step,
    /// needed only by the state-change family.
    pub fn evaluate(
        &self,
        bodies: &SlotMap<BodyKey, RigidBody>,
        body_index: &HashMap<String, BodyKey>,
        surface_distance: &dyn Fn(&str, Vec2<f64>) -> Option<f64>,
        prev_vel: &HashMap<String, Vec2<f64>>,
    ) -> Option<f64> {
        match self {
            PredicateSpec::SurfaceContact { body, surface, .. } => {
                let key = *body_index.get(body)?;
                surface_distance(surface, bodies[key].pos)
            }
            PredicateSpec::BallCollision { a, b, radius_a, radius_b, .. } => {
                let ka = *body_index.get(a)?;
                let kb = *body_index.get(b)?;
                let dist = (bodies[kb].pos - bodies[ka].pos).magnitude();
                Some(dist - (radius_a + radius_b))
            }
            PredicateSpec::SurfaceCollision { body, surface, radius, .. } => {
                let key = *body_index.get(body)?;
                surface_distance(surface, bodies[key].pos).map(|d| d - radius)
            }
            PredicateSpec::Threshold { body, field, threshold, .. } => {
                let key = *body_index.get(body)?;
                Some(field_value(&bodies[key], *field) - threshold)
            }
            PredicateSpec::StateChange { body, .. } => {
                let key = *body_index.get(body)?;
                let v_old = prev_vel.get(body).copied().unwrap_or(bodies[key].vel);
                Some(v_old.dot(bodies[key].vel))
            }
            PredicateSpec::Custom { body, field, comparator, threshold, .. } => {
                let key = *body_index.get(body)?;
                let value = field_value(&bodies[key], *field);
                Some(match comparator {
                    Comparator::Gt | Comparator::Ge => value - threshold,
                    Comparator::Lt | Comparator::Le => threshold - value,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PredicateSpec::SurfaceContact { name, .. }
            | PredicateSpec::BallCollision { name, .. }
            | PredicateSpec::SurfaceCollision { name, .. }
            | PredicateSpec::Threshold { name, .. }
            | PredicateSpec::StateChange { name, .. }
            | PredicateSpec::Custom { name, .. } => name,
        }
    }

    /// Decide the event kind a sign change of this predicate produces, or
    /// `None` if this direction of crossing carries no event (e.g. a ball
    /// separating back out of collision range).
    pub fn kind_for_crossing(&self, before: f64, after: f64) -> Option<EventKind> {
        match self {
            PredicateSpec::SurfaceContact { .. } => {
                if before > 0.0 && after <= 0.0 {
                    Some(EventKind::Contact)
                } else if before <= 0.0 && after > 0.0 {
                    Some(EventKind::Separation)
                } else {
                    None
                }
            }
            PredicateSpec::BallCollision { .. } | PredicateSpec::SurfaceCollision { .. } => {
                (before > 0.0 && after <= 0.0).then_some(EventKind::Collision)
            }
            PredicateSpec::Threshold { .. } => (before.signum() != after.signum()).then_some(EventKind::Threshold),
            PredicateSpec::StateChange { .. } => (before >= 0.0 && after < 0.0).then_some(EventKind::StateChange),
            PredicateSpec::Custom { .. } => (before <= 0.0 && after > 0.0).then_some(EventKind::Custom),
        }
    }
}

fn field_value(body: &RigidBody, field: PredicateField) -> f64 {
    match field {
        PredicateField::PositionX => body.pos.x,
        PredicateField::PositionY => body.pos.y,
        PredicateField::VelocityX => body.vel.x,
        PredicateField::VelocityY => body.vel.y,
        PredicateField::Speed => body.vel.magnitude(),
        PredicateField::Angle => body.rot.to_radians(),
        PredicateField::AngularVelocity => body.ang_vel,
    }
}

/// Candidate zero-crossing found between two proposed states, before its
/// exact time has been resolved by bisection.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub spec_index: usize,
    pub kind: EventKind,
}

/// Among every predicate that changed sign across the step, pick the one
/// the integrator should resolve next: earliest time wins; ties within
/// [`TIE_EPSILON`] break by [`priority`].
///
/// `roots` holds, for each crossing predicate, the bisected root time; this
/// is called after every candidate has already been bisected, since the
/// bisection itself needs to know which single predicate to track.
pub fn earliest(mut candidates: Vec<(Candidate, f64)>) -> Option<(Candidate, f64)> {
    candidates.sort_by(|(a_cand, a_t), (b_cand, b_t)| {
        if (a_t - b_t).abs() < TIE_EPSILON {
            priority(a_cand.kind).cmp(&priority(b_cand.kind))
        } else {
            a_t.partial_cmp(b_t).unwrap()
        }
    });
    candidates.into_iter().next()
}

/// Bracketing bisection root-finder: `g` is evaluated as a function of
/// elapsed time within `[lo, hi]`. Converges to within `tol` or gives up
/// after `max_iter` iterations and returns the bracket midpoint with
/// `converged = false` — callers must still record the event.
pub fn bisect(mut g: impl FnMut(f64) -> f64, lo: f64, hi: f64, tol: f64, max_iter: u32) -> (f64, bool) {
    let mut lo = lo;
    let mut hi = hi;
    let g_lo = g(lo);
    let g_hi = g(hi);

    if g_lo == 0.0 {
        return (lo, true);
    }
    if g_hi == 0.0 {
        return (hi, true);
    }
    if g_lo.signum() == g_hi.signum() {
        // Not actually bracketed (can happen for a fast sign flicker); fall
        // back to the midpoint rather than diverge.
        return (0.5 * (lo + hi), false);
    }

    let sign_lo = g_lo.signum();
    for _ in 0..max_iter {
        if (hi - lo) < tol {
            return (0.5 * (lo + hi), true);
        }
        let mid = 0.5 * (lo + hi);
        let g_mid = g(mid);
        if g_mid == 0.0 {
            return (mid, true);
        }
        if g_mid.signum() == sign_lo {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    (0.5 * (lo + hi), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bisect_converges_on_a_simple_linear_crossing() {
        // g(t) = t - 0.37, root at t = 0.37.
        let (t, converged) = bisect(|t| t - 0.37, 0.0, 1.0, 1e-6, 50);
        assert!(converged);
        assert!((t - 0.37).abs() < 1e-5);
    }

    #[test]
    fn bisect_falls_back_to_midpoint_when_not_bracketed() {
        let (t, converged) = bisect(|_t| 1.0, 0.0, 1.0, 1e-6, 50);
        assert!(!converged);
        assert!((t - 0.5).abs() < 1e-9);
    }

    #[test]
    fn earliest_breaks_ties_by_priority() {
        let a = (Candidate { spec_index: 0, kind: EventKind::Threshold }, 1.0000000001);
        let b = (Candidate { spec_index: 1, kind: EventKind::Collision }, 1.0);
        let (winner, _) = earliest(vec![a, b]).unwrap();
        assert_eq!(winner.kind, EventKind::Collision);
    }

    #[test]
    fn earliest_picks_strictly_smaller_time_outside_tie_window() {
        let a = (Candidate { spec_index: 0, kind: EventKind::Collision }, 2.0);
        let b = (Candidate { spec_index: 1, kind: EventKind::Custom }, 1.0);
        let (winner, t) = earliest(vec![a, b]).unwrap();
        assert_eq!(winner.kind, EventKind::Custom);
        assert_eq!(t, 1.0);
    }
}
