//! Springs and ropes as XPBD positional constraints.
//!
//! Lambda accumulates across the substep loop and resets once per full
//! step, compliance is converted to an effective stiffness via
//! `compliance / dt^2`, and the applied impulse is split between the two
//! endpoints by their generalized inverse mass. Ropes reuse the same
//! machinery as a one-sided distance constraint, only engaged when
//! `length > rest_length`, matching their unilateral-constraint semantics.

use slotmap::SlotMap;
use vek::Vec2;

use crate::sim::body::{BodyKey, RigidBody};

/// Either a simulated body or a fixed point in world space, resolved once at
/// setup time from the Contract's `AttachPoint`.
#[derive(Debug, Clone, Copy)]
pub enum Anchor {
    Body(BodyKey),
    Fixed(Vec2<f64>),
}

impl Anchor {
    fn world_position(&self, bodies: &SlotMap<BodyKey, RigidBody>) -> Vec2<f64> {
        match self {
            Anchor::Body(key) => bodies[*key].pos,
            Anchor::Fixed(pos) => *pos,
        }
    }

    fn body_key(&self) -> Option<BodyKey> {
        match self {
            Anchor::Body(key) => Some(*key),
            Anchor::Fixed(_) => None,
        }
    }
}

/// Shared XPBD lambda update, specialized to two endpoints since every
/// constraint here is pairwise.
fn delta_lambda(
    lambda: f64,
    magnitude: f64,
    compliance: f64,
    gradient: Vec2<f64>,
    a: &RigidBody,
    b: Option<&RigidBody>,
    dt: f64,
) -> f64 {
    let w_a = a.inverse_mass_at_relative_point(Vec2::zero(), gradient);
    let w_b = b
        .map(|b| b.inverse_mass_at_relative_point(Vec2::zero(), gradient))
        .unwrap_or(0.0);
    let w_sum = w_a + w_b;

    if w_sum <= f64::EPSILON {
        return 0.0;
    }

    let stiffness = if compliance <= 0.0 {
        f64::INFINITY
    } else {
        compliance / dt.powi(2)
    };

    if stiffness.is_infinite() {
        return -magnitude / w_sum;
    }

    (-magnitude - stiffness * lambda) / (w_sum + stiffness)
}

fn apply_pair(
    bodies: &mut SlotMap<BodyKey, RigidBody>,
    a: &Anchor,
    b: &Anchor,
    gradient: Vec2<f64>,
    delta_lambda: f64,
) {
    if delta_lambda.abs() <= f64::EPSILON {
        return;
    }

    let impulse = gradient * delta_lambda;

    if let Some(key) = a.body_key() {
        bodies[key].apply_positional_impulse(impulse, Vec2::zero(), 1.0);
    }
    if let Some(key) = b.body_key() {
        bodies[key].apply_positional_impulse(impulse, Vec2::zero(), -1.0);
    }
}

/// `F = -k(L - L0)` along the spring axis, with optional velocity damping.
/// Implemented as a compliant positional constraint rather than a direct
/// force so it shares the lambda/substep machinery with ropes and contacts.
#[derive(Debug, Clone)]
pub struct SpringConstraint {
    pub id: String,
    pub a: Anchor,
    pub b: Anchor,
    pub rest_length: f64,
    pub stiffness: f64,
    pub damping: f64,
    lambda: f64,
}

impl SpringConstraint {
    pub fn new(id: String, a: Anchor, b: Anchor, rest_length: f64, stiffness: f64, damping: f64) -> Self {
        Self {
            id,
            a,
            b,
            rest_length,
            stiffness,
            damping,
            lambda: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.lambda = 0.0;
    }

    /// Current extension, `L - L0`; used by threshold-style event predicates.
    pub fn extension(&self, bodies: &SlotMap<BodyKey, RigidBody>) -> f64 {
        let pa = self.a.world_position(bodies);
        let pb = self.b.world_position(bodies);
        (pa - pb).magnitude() - self.rest_length
    }

    pub fn solve(&mut self, bodies: &mut SlotMap<BodyKey, RigidBody>, dt: f64) {
        let pa = self.a.world_position(bodies);
        let pb = self.b.world_position(bodies);
        let delta = pa - pb;
        let gradient = delta.try_normalized().unwrap_or(Vec2::unit_y());
        let magnitude = delta.magnitude() - self.rest_length;

        let compliance = if self.stiffness > 0.0 { self.stiffness.recip() } else { 0.0 };

        let a_body = match self.a {
            Anchor::Body(key) => Some(&bodies[key]),
            Anchor::Fixed(_) => None,
        };
        let b_body = match self.b {
            Anchor::Body(key) => Some(&bodies[key]),
            Anchor::Fixed(_) => None,
        };

        // At least one side must be a real body, otherwise there is nothing
        // to solve for.
        let probe = a_body.or(b_body).expect("spring must attach to at least one body");
        let other = if a_body.is_some() { b_body } else { None };

        let dl = delta_lambda(self.lambda, magnitude, compliance, gradient, probe, other, dt);
        self.lambda += dl;

        apply_pair(bodies, &self.a, &self.b, gradient, dl);

        if self.damping > 0.0 {
            self.apply_damping(bodies, gradient, dt);
        }
    }

    fn apply_damping(&self, bodies: &mut SlotMap<BodyKey, RigidBody>, gradient: Vec2<f64>, dt: f64) {
        let va = match self.a {
            Anchor::Body(key) => bodies[key].vel,
            Anchor::Fixed(_) => Vec2::zero(),
        };
        let vb = match self.b {
            Anchor::Body(key) => bodies[key].vel,
            Anchor::Fixed(_) => Vec2::zero(),
        };
        let rate = (va - vb).dot(gradient);
        let damping_force = -self.damping * rate;

        if let Anchor::Body(key) = self.a {
            bodies[key].apply_force(gradient * damping_force * dt.recip().min(1.0));
        }
        if let Anchor::Body(key) = self.b {
            bodies[key].apply_force(-gradient * damping_force * dt.recip().min(1.0));
        }
    }
}

/// Inextensible rope: a unilateral distance constraint only engaged when
/// `L > L0`. Effectively infinite stiffness (zero compliance) within
/// `inextensibility_tolerance`.
#[derive(Debug, Clone)]
pub struct RopeConstraint {
    pub id: String,
    pub a: Anchor,
    pub b: Anchor,
    pub length: f64,
    pub tolerance: f64,
    lambda: f64,
}

impl RopeConstraint {
    pub fn new(id: String, a: Anchor, b: Anchor, length: f64, tolerance: f64) -> Self {
        Self { id, a, b, length, tolerance, lambda: 0.0 }
    }

    pub fn reset(&mut self) {
        self.lambda = 0.0;
    }

    pub fn current_length(&self, bodies: &SlotMap<BodyKey, RigidBody>) -> f64 {
        let pa = self.a.world_position(bodies);
        let pb = self.b.world_position(bodies);
        (pa - pb).magnitude()
    }

    pub fn solve(&mut self, bodies: &mut SlotMap<BodyKey, RigidBody>, dt: f64) {
        let pa = self.a.world_position(bodies);
        let pb = self.b.world_position(bodies);
        let delta = pa - pb;
        let len = delta.magnitude();
        let slack = len - self.length;

        if slack <= self.tolerance {
            // Rope is not taut: no force.
            return;
        }

        let gradient = delta.try_normalized().unwrap_or(Vec2::unit_y());

        let a_body = match self.a {
            Anchor::Body(key) => Some(&bodies[key]),
            Anchor::Fixed(_) => None,
        };
        let b_body = match self.b {
            Anchor::Body(key) => Some(&bodies[key]),
            Anchor::Fixed(_) => None,
        };
        let probe = a_body.or(b_body).expect("rope must attach to at least one body");
        let other = if a_body.is_some() { b_body } else { None };

        let dl = delta_lambda(self.lambda, slack, 0.0, gradient, probe, other, dt);
        self.lambda += dl;

        apply_pair(bodies, &self.a, &self.b, gradient, dl);
    }
}
