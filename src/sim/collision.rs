//! Body-body collision impulses, the discrete part of the contact and force
//! model.
//!
//! Relative contact velocity is split into normal/tangent components,
//! restitution is applied against the normal component, and a small-velocity
//! threshold keeps resting contact from jittering. Scoped to the two
//! primitives the Contract actually needs — sphere-sphere and sphere-plane —
//! since `body.radius` is the only shape parameter the wire format exposes
//! for ball-kind bodies.

use vek::Vec2;

use crate::sim::body::RigidBody;
use crate::sim::contact::SurfaceRuntime;

/// Velocities below this (in `m/s`) along the contact normal are treated as
/// resting contact rather than an impact, avoiding restitution jitter.
const RESTING_VELOCITY: f64 = 1e-2;

/// Sphere-sphere collision: detect gap, apply a normal impulse with the
/// pair's combined restitution, and push the spheres apart along the
/// normal in proportion to their inverse mass.
pub fn resolve_ball_ball(a: &mut RigidBody, b: &mut RigidBody, radius_a: f64, radius_b: f64, restitution: f64) -> bool {
    let delta = b.pos - a.pos;
    let dist = delta.magnitude();
    let gap = dist - (radius_a + radius_b);

    if gap > 0.0 {
        return false;
    }

    let normal = if dist > f64::EPSILON { delta / dist } else { Vec2::unit_y() };
    let rel_vel = b.vel - a.vel;
    let vn = rel_vel.dot(normal);

    if vn >= 0.0 {
        // Already separating: overlap is resolved positionally only.
        separate(a, b, normal, -gap);
        return true;
    }

    let inv_sum = a.inverse_mass() + b.inverse_mass();
    if inv_sum <= f64::EPSILON {
        return true;
    }

    let e = if vn.abs() <= RESTING_VELOCITY { 0.0 } else { restitution };
    let j = -(1.0 + e) * vn / inv_sum;
    let impulse = normal * j;

    a.vel -= impulse * a.inverse_mass();
    b.vel += impulse * b.inverse_mass();

    separate(a, b, normal, -gap);
    true
}

fn separate(a: &mut RigidBody, b: &mut RigidBody, normal: Vec2<f64>, overlap: f64) {
    if overlap <= 0.0 {
        return;
    }
    let inv_sum = a.inverse_mass() + b.inverse_mass();
    if inv_sum <= f64::EPSILON {
        return;
    }
    let correction = normal * (overlap / inv_sum);
    a.pos -= correction * a.inverse_mass();
    b.pos += correction * b.inverse_mass();
}

/// Sphere-plane collision against a surface, used when a ball-kind body is
/// declared `collision` rather than `contact` against a surface (i.e. a hard
/// bounce rather than the compliant contact model in [`crate::sim::contact`]).
pub fn resolve_ball_plane(body: &mut RigidBody, radius: f64, surface: &SurfaceRuntime) -> bool {
    let d = surface.signed_distance(body.pos) - radius;
    if d > 0.0 {
        return false;
    }

    let vn = body.vel.dot(surface.normal);
    if vn < 0.0 {
        let e = if vn.abs() <= RESTING_VELOCITY { 0.0 } else { surface.restitution };
        let new_vn = -e * vn;
        body.vel += surface.normal * (new_vn - vn);
    }

    body.pos -= surface.normal * d;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::shape::Shape;

    #[test]
    fn approaching_balls_bounce_apart() {
        let mut a = RigidBody::new("a".into(), Vec2::new(-0.6, 0.0), 1.0, Shape::ball(0.5), None);
        let mut b = RigidBody::new("b".into(), Vec2::new(0.6, 0.0), 1.0, Shape::ball(0.5), None);
        a.vel = Vec2::new(1.0, 0.0);
        b.vel = Vec2::new(-1.0, 0.0);

        let hit = resolve_ball_ball(&mut a, &mut b, 0.5, 0.5, 1.0);
        assert!(hit);
        assert!(a.vel.x < 0.0);
        assert!(b.vel.x > 0.0);
    }

    #[test]
    fn separating_balls_are_left_alone_but_depenetrated() {
        let mut a = RigidBody::new("a".into(), Vec2::new(-0.4, 0.0), 1.0, Shape::ball(0.5), None);
        let mut b = RigidBody::new("b".into(), Vec2::new(0.4, 0.0), 1.0, Shape::ball(0.5), None);
        a.vel = Vec2::new(-1.0, 0.0);
        b.vel = Vec2::new(1.0, 0.0);

        resolve_ball_ball(&mut a, &mut b, 0.5, 0.5, 1.0);
        assert!(a.pos.x < -0.4);
        assert!(b.pos.x > 0.4);
    }

    #[test]
    fn distant_balls_do_not_collide() {
        let mut a = RigidBody::new("a".into(), Vec2::new(0.0, 0.0), 1.0, Shape::ball(0.5), None);
        let mut b = RigidBody::new("b".into(), Vec2::new(5.0, 0.0), 1.0, Shape::ball(0.5), None);
        assert!(!resolve_ball_ball(&mut a, &mut b, 0.5, 0.5, 1.0));
    }
}
