//! Stage Controller.
//!
//! Tracks the active stage pointer and active-interaction set, and performs
//! inelastic merges as transactions on the body arena addressed by stable
//! `BodyKey`s rather than references or raw indices that a merge could
//! invalidate.

use std::collections::HashMap;

use slotmap::SlotMap;
use vek::Vec2;

use crate::contract::model::{ActivePair, Stage, StageExit};
use crate::sim::body::{BodyKey, RigidBody};
use crate::sim::shape::Shape;

/// Active stage pointer plus the interaction set it exposes.
pub struct StageController {
    stages: Vec<Stage>,
    current: usize,
}

impl StageController {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages, current: 0 }
    }

    pub fn active(&self) -> &Stage {
        &self.stages[self.current]
    }

    pub fn active_pairs(&self) -> &[ActivePair] {
        &self.active().active_interactions
    }

    pub fn exit(&self) -> &StageExit {
        &self.active().exit
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.stages.len()
    }

    /// Advance to the next declared stage. Returns `false` if there is none
    /// (the controller stays on the final stage).
    pub fn advance(&mut self) -> bool {
        if self.is_last() {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn current_id(&self) -> &str {
        &self.active().id
    }
}

/// Merge two bodies into a single composite, conserving total mass,
/// center-of-mass position, and linear momentum. `a` and `b` are marked
/// `retired` (kept in the arena, not removed) so later event actors can
/// still resolve their historical ids.
pub fn merge_bodies(
    bodies: &mut SlotMap<BodyKey, RigidBody>,
    body_index: &mut HashMap<String, BodyKey>,
    a_id: &str,
    b_id: &str,
    new_id: String,
) -> Option<BodyKey> {
    let a_key = *body_index.get(a_id)?;
    let b_key = *body_index.get(b_id)?;

    let (mass, com, velocity, radius, inertia) = {
        let a = &bodies[a_key];
        let b = &bodies[b_key];

        let ma = a.mass();
        let mb = b.mass();
        let total_mass = ma + mb;
        let com = (a.pos * ma + b.pos * mb) / total_mass;
        let velocity = (a.vel * ma + b.vel * mb) / total_mass;
        let radius = a.shape.bounding_radius().max(b.shape.bounding_radius());
        let inertia = a.inertia() + b.inertia();

        (total_mass, com, velocity, radius, inertia)
    };

    let mut merged = RigidBody::new(new_id.clone(), com, mass, Shape::ball(radius), Some(inertia));
    merged.vel = velocity;

    bodies[a_key].retired = true;
    bodies[b_key].retired = true;

    let new_key = bodies.insert(merged);
    body_index.insert(new_id, new_key);

    Some(new_key)
}

/// Conserved momentum check used by tests and by the Post-Sim Gate: total
/// linear momentum of a set of bodies.
pub fn total_momentum(bodies: &SlotMap<BodyKey, RigidBody>) -> Vec2<f64> {
    bodies
        .values()
        .filter(|b| !b.is_fixed() && !b.retired)
        .map(|b| b.vel * b.mass())
        .fold(Vec2::zero(), |acc, p| acc + p)
}
