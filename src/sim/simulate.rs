//! Simulator: the integrator core that drives a Contract's stages to
//! completion and hands back a [`Trace`].
//!
//! A fixed substep loop of integrate -> solve constraints -> reconstruct
//! velocities, with event-driven re-stepping: whenever a predicate crosses
//! zero mid-step the integrator bisects back to the exact crossing time
//! instead of overshooting past it. `advance_state` is factored out as a
//! free function, not a method, so the exact same step code runs on the
//! committed arena and on a cloned scratch arena during bisection trials —
//! no process-wide state, every trial gets its own workspace.

use std::collections::HashMap;

use slotmap::SlotMap;
use vek::Vec2;

use crate::contract::model::{
    ActivePair, AttachPoint, Body, BodyKind, Contract, EventKind, IntegratorMode, InteractionKind,
};
use crate::error::SimulationError;
use crate::sim::body::{BodyKey, RigidBody};
use crate::sim::collision;
use crate::sim::constraint::{Anchor, RopeConstraint, SpringConstraint};
use crate::sim::contact::{self, SurfaceRuntime};
use crate::sim::event::{self, Candidate, PredicateSpec};
use crate::sim::shape::Shape;
use crate::sim::stage::{self, StageController};
use crate::sim::trace::{BodySample, EndReason, Sample, Stats, Trace};

/// Default fixed step, used when the Contract's `world.default_step_hint` is
/// absent.
const DEFAULT_STEP: f64 = 1e-3;
/// A body moving faster than this (m/s) or any non-finite state field is
/// treated as diverged.
const DIVERGENCE_SPEED: f64 = 1e6;
/// Upper bound on bisection iterations.
const MAX_BISECT_ITER: u32 = 50;
/// Bounds the adaptive integrator's step size can shrink or grow to,
/// regardless of the error estimate.
const MIN_STEP: f64 = 1e-6;
const MAX_STEP: f64 = 1e-1;
/// Shrink/grow factors the adaptive integrator applies to its step size,
/// and a cap on rejection retries per nominal step.
const STEP_SHRINK: f64 = 0.5;
const STEP_GROW: f64 = 1.5;
const MAX_STEP_RETRIES: u32 = 16;

/// Plain-data step context passed into [`advance_state`], read-only for the
/// duration of one substep.
struct StepContext<'a> {
    gravity: Vec2<f64>,
    surfaces: &'a HashMap<String, SurfaceRuntime>,
    active_pairs: &'a [ActivePair],
    v_eps: f64,
}

/// Advance one fixed substep of `dt`, shared by the committed stepper and by
/// bisection trials run against cloned scratch state.
fn advance_state(
    bodies: &mut SlotMap<BodyKey, RigidBody>,
    springs: &mut [SpringConstraint],
    ropes: &mut [RopeConstraint],
    body_index: &HashMap<String, BodyKey>,
    ctx: &StepContext,
    dt: f64,
) {
    for body in bodies.values_mut() {
        body.clear_forces();
    }

    contact::apply_gravity(bodies.values_mut(), ctx.gravity);

    for pair in ctx.active_pairs {
        if !matches!(pair.interaction, InteractionKind::Contact | InteractionKind::Friction) {
            continue;
        }
        let (body_id, surface_id) = match (body_index.get(&pair.a), ctx.surfaces.get(&pair.b)) {
            (Some(_), Some(_)) => (&pair.a, &pair.b),
            _ => match (body_index.get(&pair.b), ctx.surfaces.get(&pair.a)) {
                (Some(_), Some(_)) => (&pair.b, &pair.a),
                _ => continue,
            },
        };
        if let (Some(&key), Some(surface)) = (body_index.get(body_id), ctx.surfaces.get(surface_id)) {
            contact::resolve_contact(&mut bodies[key], surface, ctx.v_eps);
        }
    }

    for body in bodies.values_mut() {
        body.integrate(dt);
    }

    for spring in springs.iter_mut() {
        spring.solve(bodies, dt);
    }
    for rope in ropes.iter_mut() {
        rope.solve(bodies, dt);
    }

    for body in bodies.values_mut() {
        body.solve_velocity(dt);
    }

    for spring in springs.iter_mut() {
        spring.reset();
    }
    for rope in ropes.iter_mut() {
        rope.reset();
    }
}

fn build_predicates(
    contract: &Contract,
    body_index: &HashMap<String, BodyKey>,
    active_pairs: &[ActivePair],
) -> Vec<PredicateSpec> {
    let mut specs = Vec::new();

    for pair in active_pairs {
        match pair.interaction {
            InteractionKind::Contact | InteractionKind::Friction => {
                if body_index.contains_key(&pair.a) && contract.surface(&pair.b).is_some() {
                    specs.push(PredicateSpec::SurfaceContact {
                        name: format!("{}__{}", pair.a, pair.b),
                        body: pair.a.clone(),
                        surface: pair.b.clone(),
                    });
                } else if contract.surface(&pair.a).is_some() && body_index.contains_key(&pair.b) {
                    specs.push(PredicateSpec::SurfaceContact {
                        name: format!("{}__{}", pair.b, pair.a),
                        body: pair.b.clone(),
                        surface: pair.a.clone(),
                    });
                }
            }
            InteractionKind::Collision => {
                if body_index.contains_key(&pair.a) && body_index.contains_key(&pair.b) {
                    let radius_a = body_radius(contract, &pair.a);
                    let radius_b = body_radius(contract, &pair.b);
                    specs.push(PredicateSpec::BallCollision {
                        name: format!("collision__{}__{}", pair.a, pair.b),
                        a: pair.a.clone(),
                        b: pair.b.clone(),
                        radius_a,
                        radius_b,
                    });
                } else if body_index.contains_key(&pair.a) && contract.surface(&pair.b).is_some() {
                    specs.push(PredicateSpec::SurfaceCollision {
                        name: format!("collision__{}__{}", pair.a, pair.b),
                        body: pair.a.clone(),
                        surface: pair.b.clone(),
                        radius: body_radius(contract, &pair.a),
                    });
                } else if contract.surface(&pair.a).is_some() && body_index.contains_key(&pair.b) {
                    specs.push(PredicateSpec::SurfaceCollision {
                        name: format!("collision__{}__{}", pair.b, pair.a),
                        body: pair.b.clone(),
                        surface: pair.a.clone(),
                        radius: body_radius(contract, &pair.b),
                    });
                }
            }
            InteractionKind::Spring | InteractionKind::Rope => {}
        }
    }

    for event in &contract.expected_events {
        match (event.kind, &event.body) {
            (Some(EventKind::Threshold), Some(body)) => {
                if let Some(bounds) = event.value_bounds {
                    let threshold = bounds.max.or(bounds.min).unwrap_or(0.0);
                    specs.push(PredicateSpec::Threshold {
                        name: event.name.clone(),
                        body: body.clone(),
                        field: crate::contract::model::PredicateField::Speed,
                        threshold,
                    });
                }
            }
            (Some(EventKind::StateChange), Some(body)) => {
                specs.push(PredicateSpec::StateChange { name: event.name.clone(), body: body.clone() });
            }
            _ => {}
        }
    }

    for constraint in &contract.constraints {
        if let Ok(threshold) = constraint.threshold.to_si() {
            specs.push(PredicateSpec::Custom {
                name: constraint.id.clone(),
                body: constraint.body.clone(),
                field: constraint.field,
                comparator: constraint.comparator,
                threshold,
            });
        }
    }

    specs
}

fn body_radius(contract: &Contract, id: &str) -> f64 {
    contract
        .body(id)
        .and_then(|b| b.radius)
        .and_then(|r| r.to_si().ok())
        .unwrap_or(0.0)
}

fn build_body(body: &Body) -> Result<RigidBody, SimulationError> {
    let mass = body
        .mass
        .to_si()
        .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
    let pos: Vec2<f64> = body.initial_position.into();
    let inertia = body
        .inertia
        .map(|q| q.to_si())
        .transpose()
        .map_err(|e| SimulationError::ValidationException(e.to_string()))?;

    let shape = match body.kind {
        BodyKind::Ball => {
            let radius = body
                .radius
                .ok_or_else(|| SimulationError::MissingReference {
                    reference: "radius".into(),
                    location: format!("bodies[{}]", body.id),
                })?
                .to_si()
                .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
            Shape::ball(radius)
        }
        BodyKind::Slider | BodyKind::Block | BodyKind::SpringMass | BodyKind::Assembly => {
            let size: Vec2<f64> = body
                .size
                .map(Into::into)
                .unwrap_or_else(|| Vec2::new(1.0, 1.0));
            Shape::rectangle(size / 2.0)
        }
    };

    let mut rb = RigidBody::new(body.id.clone(), pos, mass, shape, inertia);
    if let Some(v) = body.initial_velocity {
        rb.vel = v.into();
    }
    if let Some(angle) = body.initial_angle {
        let radians = angle
            .to_si()
            .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
        rb.rot = crate::math::Rotation::from_radians(radians);
    }
    if let Some(av) = body.initial_angular_velocity {
        rb.ang_vel = av
            .to_si()
            .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
    }

    Ok(rb)
}

fn resolve_anchor(point: &AttachPoint, body_index: &HashMap<String, BodyKey>) -> Result<Anchor, SimulationError> {
    match point {
        AttachPoint::Body(id) => body_index
            .get(id)
            .map(|&key| Anchor::Body(key))
            .ok_or_else(|| SimulationError::MissingReference { reference: id.clone(), location: "spring/rope".into() }),
        AttachPoint::Anchor(pos) => Ok(Anchor::Fixed((*pos).into())),
    }
}

/// The running simulation: arena of bodies plus constraint lists, addressed
/// by stable `BodyKey`s rather than references.
pub struct Simulation<'c> {
    contract: &'c Contract,
    bodies: SlotMap<BodyKey, RigidBody>,
    body_index: HashMap<String, BodyKey>,
    springs: Vec<SpringConstraint>,
    ropes: Vec<RopeConstraint>,
    surfaces: HashMap<String, SurfaceRuntime>,
    stage: StageController,
    predicates: Vec<PredicateSpec>,
    gravity: Vec2<f64>,
    bounds_min: Vec2<f64>,
    bounds_max: Vec2<f64>,
    v_eps: f64,
    event_time_tol: f64,
    h: f64,
    t: f64,
    budget: Option<u64>,
    step_count: u64,
    rejected_steps: u64,
    samples: Vec<Sample>,
    events: Vec<crate::sim::event::EventRecord>,
    prev_vel: HashMap<String, Vec2<f64>>,
    integrator: IntegratorMode,
    atol: f64,
    rtol: f64,
    max_local_error: f64,
}

enum StepOutcome {
    Continue,
    Terminate(EndReason),
}

impl<'c> Simulation<'c> {
    pub fn new(contract: &'c Contract) -> Result<Self, SimulationError> {
        let mut bodies = SlotMap::with_key();
        let mut body_index = HashMap::new();
        for body in &contract.bodies {
            let key = bodies.insert(build_body(body)?);
            body_index.insert(body.id.clone(), key);
        }

        let mut surfaces = HashMap::new();
        for surface in &contract.surfaces {
            let runtime = SurfaceRuntime::from_contract(surface)
                .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
            surfaces.insert(surface.id.clone(), runtime);
        }

        let mut springs = Vec::new();
        for spring in &contract.springs {
            let a = resolve_anchor(&spring.a, &body_index)?;
            let b = resolve_anchor(&spring.b, &body_index)?;
            let rest_length = spring
                .rest_length
                .to_si()
                .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
            let stiffness = spring
                .stiffness
                .to_si()
                .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
            let damping = spring
                .damping
                .map(|q| q.to_si())
                .transpose()
                .map_err(|e| SimulationError::ValidationException(e.to_string()))?
                .unwrap_or(0.0);
            springs.push(SpringConstraint::new(spring.id.clone(), a, b, rest_length, stiffness, damping));
        }

        let mut ropes = Vec::new();
        for rope in &contract.ropes {
            let a = resolve_anchor(&rope.a, &body_index)?;
            let b = resolve_anchor(&rope.b, &body_index)?;
            let length = rope
                .length
                .to_si()
                .map_err(|e| SimulationError::ValidationException(e.to_string()))?;
            ropes.push(RopeConstraint::new(rope.id.clone(), a, b, length, rope.inextensibility_tolerance));
        }

        let stage = StageController::new(contract.stages.clone());
        let predicates = build_predicates(contract, &body_index, stage.active_pairs());

        let gravity: Vec2<f64> = contract.world.gravity.into();
        let bounds_min: Vec2<f64> = contract.world.bounds.min.into();
        let bounds_max: Vec2<f64> = contract.world.bounds.max.into();
        let h = contract.world.default_step_hint.unwrap_or(DEFAULT_STEP);
        let v_eps = contract.tolerances.v_eps;
        let event_time_tol = (contract.tolerances.event_time_sec / 100.0).min(1e-4).max(1e-9);

        let prev_vel = body_index
            .iter()
            .map(|(id, &key)| (id.clone(), bodies[key].vel))
            .collect();

        Ok(Self {
            contract,
            bodies,
            body_index,
            springs,
            ropes,
            surfaces,
            stage,
            predicates,
            gravity,
            bounds_min,
            bounds_max,
            v_eps,
            event_time_tol,
            h,
            t: 0.0,
            budget: contract.world.stats_budget,
            step_count: 0,
            rejected_steps: 0,
            samples: Vec::new(),
            events: Vec::new(),
            prev_vel,
            integrator: contract.world.integrator,
            atol: contract.tolerances.atol,
            rtol: contract.tolerances.rtol,
            max_local_error: 0.0,
        })
    }

    fn step_context(&self) -> StepContext<'_> {
        StepContext {
            gravity: self.gravity,
            surfaces: &self.surfaces,
            active_pairs: self.stage.active_pairs(),
            v_eps: self.v_eps,
        }
    }

    fn evaluate_all(&self, bodies: &SlotMap<BodyKey, RigidBody>) -> Vec<Option<f64>> {
        let surfaces = &self.surfaces;
        let surface_distance = |surface_id: &str, point: Vec2<f64>| -> Option<f64> {
            surfaces.get(surface_id).and_then(|s| {
                if s.within_extent(point) {
                    Some(s.signed_distance(point))
                } else {
                    None
                }
            })
        };
        self.predicates
            .iter()
            .map(|p| p.evaluate(bodies, &self.body_index, &surface_distance, &self.prev_vel))
            .collect()
    }

    /// Total mechanical energy: kinetic, plus gravitational and spring
    /// potential. Ropes contribute no potential term; they are unilateral
    /// rigid constraints, not energy-storing elements.
    fn record_sample(&mut self) {
        let mut bodies_out = Vec::new();
        let mut momentum = Vec2::zero();
        let mut energy = 0.0;

        // `body_index` is a HashMap with a per-instance random seed, so its
        // iteration order isn't fixed across runs; walk bodies by sorted id
        // instead so the energy/momentum summation order (and therefore the
        // resulting float) is the same on every run of the same Contract.
        let mut ordered: Vec<(&str, BodyKey)> =
            self.body_index.iter().map(|(id, &key)| (id.as_str(), key)).collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        for (id, key) in ordered {
            let body = &self.bodies[key];
            if body.retired {
                continue;
            }
            bodies_out.push(BodySample {
                id: id.to_string(),
                p: body.pos.into(),
                v: body.vel.into(),
                theta: body.rot.to_radians(),
                omega: body.ang_vel,
            });
            if !body.is_fixed() {
                momentum += body.vel * body.mass();
                energy += body.kinetic_energy();
                energy += -body.mass() * self.gravity.dot(body.pos);
            }
        }
        for spring in &self.springs {
            let extension = spring.extension(&self.bodies);
            energy += 0.5 * spring.stiffness * extension.powi(2);
        }
        self.samples.push(Sample { t: self.t, bodies: bodies_out, energy, momentum: momentum.into() });
    }

    fn diverged(&self) -> bool {
        self.bodies.values().any(|b| {
            !b.pos.x.is_finite()
                || !b.pos.y.is_finite()
                || !b.vel.x.is_finite()
                || !b.vel.y.is_finite()
                || b.vel.magnitude() > DIVERGENCE_SPEED
        })
    }

    fn out_of_bounds(&self) -> bool {
        self.bodies.values().any(|b| {
            !b.retired
                && !b.is_fixed()
                && (b.pos.x < self.bounds_min.x
                    || b.pos.x > self.bounds_max.x
                    || b.pos.y < self.bounds_min.y
                    || b.pos.y > self.bounds_max.y)
        })
    }

    fn commit(&mut self, bodies: SlotMap<BodyKey, RigidBody>, springs: Vec<SpringConstraint>, ropes: Vec<RopeConstraint>, dt: f64) {
        self.prev_vel = self
            .body_index
            .iter()
            .map(|(id, &key)| (id.clone(), self.bodies[key].vel))
            .collect();
        self.bodies = bodies;
        self.springs = springs;
        self.ropes = ropes;
        self.t += dt;
        self.step_count += 1;
    }

    /// Apply a resolved event's physical effect (the impulse a collision
    /// leaves behind, or a restitution bounce off a hard-contact surface).
    /// Merges are handled separately by [`Self::check_stage_transition`],
    /// since they are tied to the stage exit, not to the collision
    /// predicate itself.
    fn apply_event_effects(&mut self, spec: &PredicateSpec) {
        match spec {
            PredicateSpec::BallCollision { a, b, radius_a, radius_b, .. } => {
                let merges_here = self
                    .stage
                    .active()
                    .merge
                    .as_ref()
                    .map(|m| (&m.a == a && &m.b == b) || (&m.a == b && &m.b == a))
                    .unwrap_or(false);
                if merges_here {
                    return;
                }
                if let (Some(&ka), Some(&kb)) = (self.body_index.get(a), self.body_index.get(b)) {
                    let mut ba = self.bodies[ka].clone();
                    let mut bb = self.bodies[kb].clone();
                    collision::resolve_ball_ball(&mut ba, &mut bb, *radius_a, *radius_b, 1.0);
                    self.bodies[ka] = ba;
                    self.bodies[kb] = bb;
                }
            }
            PredicateSpec::SurfaceCollision { body, surface, radius, .. } => {
                if let (Some(&key), Some(runtime)) = (self.body_index.get(body), self.surfaces.get(surface)) {
                    let mut b = self.bodies[key].clone();
                    collision::resolve_ball_plane(&mut b, *radius, runtime);
                    self.bodies[key] = b;
                }
            }
            _ => {}
        }
    }

    /// Handle a stage transition whose exit is this resolved event, or whose
    /// exit is a time bound already reached; applies the declared merge (if
    /// any) atomically with the transition and rebuilds the predicate set
    /// for the new stage's active interactions.
    fn check_stage_transition(&mut self, just_fired: Option<&str>) {
        let should_advance = match self.stage.exit() {
            crate::contract::model::StageExit::Event(name) => just_fired == Some(name.as_str()),
            crate::contract::model::StageExit::TimeBound(q) => {
                q.to_si().map(|bound| self.t >= bound).unwrap_or(false)
            }
        };

        if !should_advance {
            return;
        }

        if let Some(merge) = self.stage.active().merge.clone() {
            stage::merge_bodies(&mut self.bodies, &mut self.body_index, &merge.a, &merge.b, merge.into);
        }

        if self.stage.advance() {
            self.predicates = build_predicates(self.contract, &self.body_index, self.stage.active_pairs());
        }
    }

    /// Magnitude scale of the current state, the `||state||` term in the
    /// adaptive integrator's acceptance rule `err <= atol + rtol * ||state||`.
    fn state_norm(&self) -> f64 {
        self.bodies
            .values()
            .filter(|b| !b.is_fixed())
            .map(|b| b.pos.magnitude().max(b.vel.magnitude()))
            .fold(0.0_f64, f64::max)
    }

    /// Step-doubling local error estimate: one step of `h` against two
    /// steps of `h / 2`, both starting from the same committed state. The
    /// difference approximates the leading-order truncation error of the
    /// semi-implicit Euler stepper without a second, embedded integration
    /// scheme.
    fn estimate_local_error(&self, h: f64) -> f64 {
        let ctx = self.step_context();

        let mut whole_bodies = self.bodies.clone();
        let mut whole_springs = self.springs.clone();
        let mut whole_ropes = self.ropes.clone();
        advance_state(&mut whole_bodies, &mut whole_springs, &mut whole_ropes, &self.body_index, &ctx, h);

        let mut half_bodies = self.bodies.clone();
        let mut half_springs = self.springs.clone();
        let mut half_ropes = self.ropes.clone();
        advance_state(&mut half_bodies, &mut half_springs, &mut half_ropes, &self.body_index, &ctx, h / 2.0);
        advance_state(&mut half_bodies, &mut half_springs, &mut half_ropes, &self.body_index, &ctx, h / 2.0);

        self.body_index
            .values()
            .map(|&key| {
                let a = &whole_bodies[key];
                let b = &half_bodies[key];
                (a.pos - b.pos).magnitude().max((a.vel - b.vel).magnitude())
            })
            .fold(0.0_f64, f64::max)
    }

    /// Brings `self.h` into compliance with the step-acceptance rule before
    /// the committed step is taken: shrinks and retries on rejection,
    /// counting each rejection, and grows the step afterward when the local
    /// error has ample margin. A no-op in fixed-step mode.
    fn adapt_step_size(&mut self) {
        if self.integrator == IntegratorMode::Fixed {
            return;
        }

        let mut retries = 0;
        loop {
            let err = self.estimate_local_error(self.h);
            let tol = self.atol + self.rtol * self.state_norm();
            self.max_local_error = self.max_local_error.max(err);

            if err <= tol || retries >= MAX_STEP_RETRIES || self.h <= MIN_STEP {
                if err <= tol * 0.25 {
                    self.h = (self.h * STEP_GROW).min(MAX_STEP);
                }
                break;
            }

            self.rejected_steps += 1;
            self.h = (self.h * STEP_SHRINK).max(MIN_STEP);
            retries += 1;
        }
    }

    fn step(&mut self) -> StepOutcome {
        self.adapt_step_size();
        let h = self.h;
        let g_before = self.evaluate_all(&self.bodies);

        let mut trial_bodies = self.bodies.clone();
        let mut trial_springs = self.springs.clone();
        let mut trial_ropes = self.ropes.clone();
        {
            let ctx = self.step_context();
            advance_state(&mut trial_bodies, &mut trial_springs, &mut trial_ropes, &self.body_index, &ctx, h);
        }
        let g_after = self.evaluate_all(&trial_bodies);

        let mut candidates: Vec<Candidate> = Vec::new();
        for (i, spec) in self.predicates.iter().enumerate() {
            if let (Some(before), Some(after)) = (g_before[i], g_after[i]) {
                if let Some(kind) = spec.kind_for_crossing(before, after) {
                    candidates.push(Candidate { spec_index: i, kind });
                }
            }
        }

        if candidates.is_empty() {
            self.commit(trial_bodies, trial_springs, trial_ropes, h);
            self.record_sample();
            self.check_stage_transition(None);
            return self.check_termination_after_commit();
        }

        let mut resolved: Vec<(Candidate, f64, bool)> = Vec::new();
        for cand in candidates {
            let spec = self.predicates[cand.spec_index].clone();
            let body_index = self.body_index.clone();
            let gravity = self.gravity;
            let v_eps = self.v_eps;
            let active_pairs = self.stage.active().active_interactions.clone();
            let base_bodies = self.bodies.clone();
            let base_springs = self.springs.clone();
            let base_ropes = self.ropes.clone();
            let surfaces = &self.surfaces;
            let prev_vel = &self.prev_vel;
            let tol = self.event_time_tol;

            let mut evaluate_at = |dt: f64| -> f64 {
                let mut b = base_bodies.clone();
                let mut s = base_springs.clone();
                let mut r = base_ropes.clone();
                let ctx = StepContext { gravity, surfaces, active_pairs: &active_pairs, v_eps };
                advance_state(&mut b, &mut s, &mut r, &body_index, &ctx, dt);
                let surface_distance = |surface_id: &str, point: Vec2<f64>| -> Option<f64> {
                    surfaces.get(surface_id).and_then(|su| {
                        if su.within_extent(point) { Some(su.signed_distance(point)) } else { None }
                    })
                };
                spec.evaluate(&b, &body_index, &surface_distance, prev_vel).unwrap_or(0.0)
            };

            let (t_star, converged) = event::bisect(&mut evaluate_at, 0.0, h, tol, MAX_BISECT_ITER);
            resolved.push((cand, t_star, converged));
        }

        let picks: Vec<(Candidate, f64)> = resolved.iter().map(|(c, t, _)| (c.clone(), *t)).collect();
        let (winner, t_star) = match event::earliest(picks) {
            Some(w) => w,
            None => {
                self.commit(trial_bodies, trial_springs, trial_ropes, h);
                self.record_sample();
                self.check_stage_transition(None);
                return self.check_termination_after_commit();
            }
        };
        let winner_converged = resolved
            .iter()
            .find(|(c, _, _)| c.spec_index == winner.spec_index)
            .map(|(_, _, converged)| *converged)
            .unwrap_or(true);
        if !winner_converged {
            self.rejected_steps += 1;
            log::warn!(
                "bisection for predicate {} did not converge by t={}; falling back to midpoint",
                self.predicates[winner.spec_index].name(),
                self.t
            );
        }

        let mut star_bodies = self.bodies.clone();
        let mut star_springs = self.springs.clone();
        let mut star_ropes = self.ropes.clone();
        {
            let ctx = self.step_context();
            advance_state(&mut star_bodies, &mut star_springs, &mut star_ropes, &self.body_index, &ctx, t_star);
        }
        self.commit(star_bodies, star_springs, star_ropes, t_star);

        let spec = self.predicates[winner.spec_index].clone();
        let record = self.record_event(&spec, winner.kind, winner_converged);
        self.apply_event_effects(&spec);
        let event_name = record.id.clone();
        self.events.push(record);
        self.record_sample();

        if let Some(outcome) = self.check_divergence_or_bounds() {
            return outcome;
        }

        if self.contract.end_condition.terminal_event.as_deref() == Some(event_name.as_str()) {
            return StepOutcome::Terminate(EndReason::TerminalEvent);
        }

        self.check_stage_transition(Some(&event_name));

        // The step's remaining time, (h - t_star), is simply picked up by the
        // next loop iteration's full-h trial: a new event within the same
        // nominal step re-enters this function with an unchanged predicate
        // set (or a freshly rebuilt one if the stage just changed).
        StepOutcome::Continue
    }

    fn record_event(&self, spec: &PredicateSpec, kind: EventKind, converged: bool) -> crate::sim::event::EventRecord {
        use std::collections::BTreeMap;
        let mut parameters = BTreeMap::new();
        if let PredicateSpec::BallCollision { radius_a, radius_b, .. } = spec {
            parameters.insert("radius_a".to_string(), *radius_a);
            parameters.insert("radius_b".to_string(), *radius_b);
        }
        crate::sim::event::EventRecord {
            id: spec.name().to_string(),
            kind,
            t: self.t,
            actors: spec.actors(),
            parameters,
            severity: event::default_severity(kind),
            converged,
        }
    }

    fn check_divergence_or_bounds(&self) -> Option<StepOutcome> {
        if self.diverged() {
            log::warn!("simulation diverged at t={}, terminating", self.t);
            return Some(StepOutcome::Terminate(EndReason::Divergence));
        }
        if self.out_of_bounds() {
            return Some(StepOutcome::Terminate(EndReason::BoundExit));
        }
        None
    }

    fn check_termination_after_commit(&mut self) -> StepOutcome {
        match self.check_divergence_or_bounds() {
            Some(outcome) => outcome,
            None => StepOutcome::Continue,
        }
    }

    fn check_terminal_before_step(&self) -> Option<EndReason> {
        if let Some(t_end) = self.contract.end_condition.t_end {
            if self.t >= t_end {
                return Some(EndReason::TEnd);
            }
        }
        if let Some(budget) = self.budget {
            if self.step_count >= budget {
                log::warn!("step budget of {} exhausted at t={}", budget, self.t);
                return Some(EndReason::BudgetExhausted);
            }
        }
        None
    }

    /// Run to completion and produce the Trace.
    pub fn run(mut self) -> Trace {
        self.record_sample();

        let end_reason = loop {
            if let Some(reason) = self.check_terminal_before_step() {
                break reason;
            }
            match self.step() {
                StepOutcome::Continue => {}
                StepOutcome::Terminate(reason) => break reason,
            }
        };

        Trace {
            samples: self.samples,
            events: self.events,
            stats: Stats {
                step_count: self.step_count,
                rejected_steps: self.rejected_steps,
                cpu_time_sec: 0.0,
                max_local_error: self.max_local_error,
                end_reason,
            },
        }
    }
}

/// Entry point for the simulation pipeline: build runtime state from a
/// Contract already cleared by the Pre-Sim Gate, and run it to completion.
pub fn simulate(contract: &Contract) -> Result<Trace, SimulationError> {
    let simulation = Simulation::new(contract)?;
    Ok(simulation.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::*;

    fn falling_ball_contract() -> Contract {
        Contract {
            schema_version: "physics-contract/1.0.0".into(),
            world: World {
                gravity: Vec2Quantity { x: 0.0, y: -9.8 },
                bounds: Bounds {
                    min: Vec2Quantity { x: -100.0, y: -100.0 },
                    max: Vec2Quantity { x: 100.0, y: 100.0 },
                },
                default_step_hint: Some(1e-3),
                stats_budget: Some(100_000),
                integrator: IntegratorMode::Fixed,
            },
            bodies: vec![Body {
                id: "ball".into(),
                kind: BodyKind::Ball,
                mass: Quantity::Bare(1.0),
                inertia: None,
                size: None,
                initial_position: Vec2Quantity { x: 0.0, y: 5.0 },
                initial_velocity: None,
                initial_angle: None,
                initial_angular_velocity: None,
                radius: Some(Quantity::Bare(0.5)),
            }],
            surfaces: vec![Surface {
                id: "ground".into(),
                kind: SurfaceKind::Plane,
                anchor: Vec2Quantity { x: 0.0, y: 0.0 },
                normal: Vec2Quantity { x: 0.0, y: 1.0 },
                tangent: None,
                length: None,
                static_friction: Quantity::Bare(0.5),
                kinetic_friction: Quantity::Bare(0.3),
                restitution: Quantity::Bare(0.0),
            }],
            springs: vec![],
            ropes: vec![],
            stages: vec![Stage {
                id: "fall".into(),
                active_interactions: vec![ActivePair {
                    a: "ball".into(),
                    b: "ground".into(),
                    interaction: InteractionKind::Contact,
                }],
                entry_event: None,
                exit: StageExit::TimeBound(Quantity::Bare(2.0)),
                merge: None,
            }],
            expected_events: vec![ExpectedEvent {
                name: "touchdown".into(),
                body: Some("ball".into()),
                surface: Some("ground".into()),
                kind: Some(EventKind::Contact),
                window: None,
                value_bounds: None,
            }],
            constraints: vec![],
            tolerances: Tolerances::default(),
            end_condition: EndCondition { t_end: Some(2.0), terminal_event: None },
        }
    }

    #[test]
    fn falling_ball_settles_on_ground_without_diverging() {
        let contract = falling_ball_contract();
        let trace = simulate(&contract).expect("simulation should not error");

        assert_eq!(trace.stats.end_reason, EndReason::TEnd);
        assert!(!trace.has_non_finite_sample());

        let last = trace.samples.last().expect("at least one sample");
        let ball = last.bodies.iter().find(|b| b.id == "ball").unwrap();
        assert!(ball.p.y > -0.1 && ball.p.y < 1.0, "ball should have settled near the ground, got {}", ball.p.y);
    }

    #[test]
    fn falling_ball_produces_a_contact_event() {
        let contract = falling_ball_contract();
        let trace = simulate(&contract).unwrap();
        assert!(trace.events.iter().any(|e| e.kind == EventKind::Contact));
    }

    #[test]
    fn time_stays_monotone_across_samples() {
        let contract = falling_ball_contract();
        let trace = simulate(&contract).unwrap();
        for pair in trace.samples.windows(2) {
            assert!(pair[1].t >= pair[0].t);
        }
    }

    #[test]
    fn adaptive_mode_runs_to_completion_and_tracks_local_error() {
        let mut contract = falling_ball_contract();
        contract.world.integrator = IntegratorMode::Adaptive;
        let trace = simulate(&contract).expect("simulation should not error");

        assert_eq!(trace.stats.end_reason, EndReason::TEnd);
        assert!(!trace.has_non_finite_sample());
        assert!(trace.stats.max_local_error >= 0.0);
    }

    #[test]
    fn adaptive_mode_matches_fixed_mode_landing_height() {
        let fixed = simulate(&falling_ball_contract()).unwrap();

        let mut adaptive_contract = falling_ball_contract();
        adaptive_contract.world.integrator = IntegratorMode::Adaptive;
        let adaptive = simulate(&adaptive_contract).unwrap();

        let fixed_last = fixed.samples.last().unwrap().bodies.iter().find(|b| b.id == "ball").unwrap();
        let adaptive_last = adaptive.samples.last().unwrap().bodies.iter().find(|b| b.id == "ball").unwrap();
        assert!(
            (fixed_last.p.y - adaptive_last.p.y).abs() < 0.5,
            "fixed and adaptive integrators should agree on settled height: {} vs {}",
            fixed_last.p.y,
            adaptive_last.p.y
        );
    }
}
