//! Rigid body state and the semi-implicit integrator step.
//!
//! Bodies live in a `slotmap::SlotMap` keyed by [`BodyKey`] — an arena of
//! stable ids rather than raw indices or references — so retired bodies
//! keep resolvable identity for historical event actors even after they
//! stop integrating.

use slotmap::new_key_type;
use vek::Vec2;

use crate::math::Rotation;
use crate::sim::shape::Shape;

new_key_type! {
    /// Stable identity for a body across its whole lifetime, including after
    /// it is retired.
    pub struct BodyKey;
}

/// A rigid body under simulation.
///
/// Integrated with semi-implicit Euler and linear/angular damping, followed
/// by a velocity reconstruction from the position delta left by the
/// constraint solver.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub id: String,
    pub pos: Vec2<f64>,
    prev_pos: Vec2<f64>,
    pub vel: Vec2<f64>,
    pub rot: Rotation,
    prev_rot: Rotation,
    pub ang_vel: f64,
    inertia: f64,
    pub lin_damping: f64,
    pub ang_damping: f64,
    pub ext_force: Vec2<f64>,
    pub ext_torque: f64,
    inv_mass: f64,
    pub shape: Shape,
    /// Set once a body leaves every stage's active interaction set; it keeps
    /// its slot and last known state but no longer integrates or collides.
    pub retired: bool,
}

impl RigidBody {
    /// Construct a dynamic body. `inertia` overrides the shape's computed
    /// moment of inertia when the contract supplies one explicitly.
    pub fn new(id: String, pos: Vec2<f64>, mass: f64, shape: Shape, inertia: Option<f64>) -> Self {
        let inv_mass = mass.recip();
        let inertia = inertia.unwrap_or_else(|| shape.inertia(mass));

        Self {
            id,
            pos,
            prev_pos: pos,
            vel: Vec2::zero(),
            rot: Rotation::zero(),
            prev_rot: Rotation::zero(),
            ang_vel: 0.0,
            inertia,
            lin_damping: 0.0,
            ang_damping: 0.0,
            ext_force: Vec2::zero(),
            ext_torque: 0.0,
            inv_mass,
            shape,
            retired: false,
        }
    }

    /// Construct a fixed body (infinite mass, never integrated): used for
    /// anchor points on springs and ropes.
    pub fn fixed(id: String, pos: Vec2<f64>, shape: Shape) -> Self {
        Self {
            id,
            pos,
            prev_pos: pos,
            vel: Vec2::zero(),
            rot: Rotation::zero(),
            prev_rot: Rotation::zero(),
            ang_vel: 0.0,
            inertia: 0.0,
            lin_damping: 0.0,
            ang_damping: 0.0,
            ext_force: Vec2::zero(),
            ext_torque: 0.0,
            inv_mass: 0.0,
            shape,
            retired: false,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.inv_mass == 0.0
    }

    pub fn mass(&self) -> f64 {
        if self.is_fixed() {
            f64::INFINITY
        } else {
            self.inv_mass.recip()
        }
    }

    pub fn inverse_mass(&self) -> f64 {
        self.inv_mass
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn inverse_inertia(&self) -> f64 {
        if self.inertia == 0.0 {
            0.0
        } else {
            self.inertia.recip()
        }
    }

    /// Predictive integration step of a substep: symplectic Euler baseline.
    pub fn integrate(&mut self, dt: f64) {
        if self.is_fixed() || self.retired {
            return;
        }

        self.prev_pos = self.pos;
        if self.lin_damping != 0.0 {
            self.vel *= 1.0 / (1.0 + dt * self.lin_damping);
        }
        self.vel += dt * self.ext_force * self.inv_mass;
        self.pos += dt * self.vel;

        self.prev_rot = self.rot;
        if self.ang_damping != 0.0 {
            self.ang_vel *= 1.0 / (1.0 + dt * self.ang_damping);
        }
        self.ang_vel += dt * self.inverse_inertia() * self.ext_torque;
        self.rot += dt * self.ang_vel;
    }

    /// Reconstruct velocity from the position delta left by the constraint
    /// solver, closing out the substep.
    pub fn solve_velocity(&mut self, dt: f64) {
        if self.is_fixed() || self.retired {
            return;
        }

        self.vel = (self.pos - self.prev_pos) / dt;
        self.ang_vel = (self.rot - self.prev_rot).to_radians() / dt;
    }

    pub fn apply_force(&mut self, force: Vec2<f64>) {
        self.ext_force += force;
    }

    pub fn clear_forces(&mut self) {
        self.ext_force = Vec2::zero();
        self.ext_torque = 0.0;
    }

    /// Generalized inverse mass at a relative point along a normal, used by
    /// every positional constraint's lambda update.
    pub fn inverse_mass_at_relative_point(&self, point: Vec2<f64>, normal: Vec2<f64>) -> f64 {
        let perp_dot = point.x * normal.y - point.y * normal.x;
        self.inv_mass + self.inverse_inertia() * perp_dot.powi(2)
    }

    pub fn delta_rotation_at_point(&self, point: Vec2<f64>, impulse: Vec2<f64>) -> f64 {
        let perp_dot = point.x * impulse.y - point.y * impulse.x;
        self.inverse_inertia() * perp_dot
    }

    pub fn rotate(&self, point: Vec2<f64>) -> Vec2<f64> {
        self.rot.rotate(point)
    }

    pub fn local_to_world(&self, point: Vec2<f64>) -> Vec2<f64> {
        self.pos + self.rotate(point)
    }

    /// Apply a positional impulse at an attachment point, the shared last
    /// step of every positional constraint's `apply`.
    pub fn apply_positional_impulse(&mut self, impulse: Vec2<f64>, attachment: Vec2<f64>, sign: f64) {
        if self.is_fixed() || self.retired {
            return;
        }

        self.pos += sign * impulse * self.inv_mass;
        self.rot += sign * self.delta_rotation_at_point(attachment, impulse);
    }

    /// Kinetic energy, translational plus rotational (used by the Post-Sim
    /// Gate's drift check).
    pub fn kinetic_energy(&self) -> f64 {
        if self.is_fixed() {
            return 0.0;
        }
        0.5 * self.mass() * self.vel.magnitude_squared() + 0.5 * self.inertia * self.ang_vel.powi(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::shape::Shape;

    fn falling_body() -> RigidBody {
        let shape = Shape::ball(0.5);
        let mut body = RigidBody::new("b".into(), Vec2::new(0.0, 10.0), 1.0, shape, None);
        body.ext_force = Vec2::new(0.0, -9.8);
        body
    }

    #[test]
    fn integrate_under_gravity_matches_kinematics() {
        let mut body = falling_body();
        let dt = 1e-3;
        for _ in 0..1000 {
            body.integrate(dt);
            body.solve_velocity(dt);
        }

        // After 1s of free fall: v = g*t, y = y0 - 1/2 g t^2 (symplectic Euler
        // is first-order, so allow a loose tolerance).
        assert!((body.vel.y - (-9.8)).abs() < 0.05);
        assert!((body.pos.y - (10.0 - 4.9)).abs() < 0.1);
    }

    #[test]
    fn fixed_body_never_moves() {
        let mut body = RigidBody::fixed("anchor".into(), Vec2::new(1.0, 2.0), Shape::ball(0.1));
        body.ext_force = Vec2::new(0.0, -9.8);
        body.integrate(1e-3);
        assert_eq!(body.pos, Vec2::new(1.0, 2.0));
    }
}
