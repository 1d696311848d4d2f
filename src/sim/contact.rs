//! Gravity and surface contact/friction, the continuous part of the contact
//! and force model.
//!
//! Gravity is a plain applied force, not a constraint. A surface is
//! expressed as an anchor point plus a unit normal, with penetration as a
//! signed distance along that normal — an arbitrary anchor/normal pair
//! rather than an axis-aligned ground plane, so inclines and segments fit
//! the same code path.

use vek::Vec2;

use crate::contract::model::Surface;
use crate::sim::body::RigidBody;

/// Stiff compliant-contact default.
pub const DEFAULT_KC: f64 = 1e5;

/// Critically-damped contact damping for a given mass and stiffness,
/// `c_c = 2 * sqrt(m * k_c)`.
pub fn critical_damping(mass: f64, kc: f64) -> f64 {
    2.0 * (mass * kc).sqrt()
}

/// A surface resolved to world-space runtime data: SI anchor/normal/tangent
/// plus the friction and restitution it carries.
#[derive(Debug, Clone)]
pub struct SurfaceRuntime {
    pub id: String,
    pub anchor: Vec2<f64>,
    pub normal: Vec2<f64>,
    pub tangent: Vec2<f64>,
    pub mu_s: f64,
    pub mu_k: f64,
    pub restitution: f64,
    pub half_extent: Option<f64>,
}

impl SurfaceRuntime {
    pub fn from_contract(surface: &Surface) -> Result<Self, crate::units::UnitsError> {
        let anchor = Vec2::new(surface.anchor.x, surface.anchor.y);
        let normal = Vec2::new(surface.normal.x, surface.normal.y).normalized();
        let tangent = surface
            .tangent
            .map(|t| Vec2::new(t.x, t.y).normalized())
            .unwrap_or_else(|| Vec2::new(normal.y, -normal.x));

        Ok(Self {
            id: surface.id.clone(),
            anchor,
            normal,
            tangent,
            mu_s: surface.static_friction.to_si()?,
            mu_k: surface.kinetic_friction.to_si()?,
            restitution: surface.restitution.to_si()?,
            half_extent: surface.length.map(|l| l.to_si()).transpose()?.map(|l| l / 2.0),
        })
    }

    /// Signed distance of a world point from the surface plane along the
    /// normal; negative means penetrating.
    pub fn signed_distance(&self, point: Vec2<f64>) -> f64 {
        (point - self.anchor).dot(self.normal)
    }

    /// Whether `point`'s projection onto the tangent still lies within the
    /// surface's declared extent (unbounded if no length was given).
    pub fn within_extent(&self, point: Vec2<f64>) -> bool {
        match self.half_extent {
            Some(half) => (point - self.anchor).dot(self.tangent).abs() <= half,
            None => true,
        }
    }
}

/// Apply `m * g` to every active dynamic body.
pub fn apply_gravity<'a>(bodies: impl Iterator<Item = &'a mut RigidBody>, gravity: Vec2<f64>) {
    for body in bodies {
        if body.is_fixed() || body.retired {
            continue;
        }
        body.apply_force(gravity * body.mass());
    }
}

/// Result of resolving one body/surface contact, used by the Event Detector
/// to report actor parameters.
#[derive(Debug, Clone, Copy)]
pub struct ContactInfo {
    pub penetration: f64,
    pub normal_force: f64,
}

/// Compliant normal force plus Coulomb friction for one body against one
/// surface. Returns `None` when the body is not penetrating the surface
/// (or lies outside its finite extent).
///
/// Friction consistency: with multiple simultaneous contacts the caller sums
/// each contact's normal force magnitude into the aggregate used for static
/// friction by calling this once per contact and letting forces accumulate
/// on the body via `apply_force`.
pub fn resolve_contact(body: &mut RigidBody, surface: &SurfaceRuntime, v_eps: f64) -> Option<ContactInfo> {
    if body.is_fixed() || body.retired {
        return None;
    }

    let d = surface.signed_distance(body.pos);
    if d > 0.0 || !surface.within_extent(body.pos) {
        return None;
    }

    let vn = body.vel.dot(surface.normal);
    let kc = DEFAULT_KC;
    let cc = critical_damping(body.mass(), kc);
    let normal_force = (-kc * d - cc * vn).max(0.0);

    let v_t = body.vel - surface.normal * vn;
    let speed_t = v_t.magnitude();

    // Tangential component of whatever has already been applied this step
    // (gravity, springs), used by the static-friction balance below.
    let applied_tangential = body.ext_force.dot(surface.tangent);

    let friction = if speed_t > v_eps {
        // Kinetic: opposes the sliding direction.
        -surface.mu_k * normal_force * (v_t / speed_t)
    } else {
        // Static: cancels the applied tangential force up to mu_s * N. If
        // the applied force exceeds that limit the clamp below leaves a
        // residual force, so the body starts sliding in the same step.
        let limit = surface.mu_s * normal_force;
        surface.tangent * (-applied_tangential).clamp(-limit, limit)
    };

    body.apply_force(surface.normal * normal_force + friction);

    Some(ContactInfo { penetration: -d, normal_force })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::shape::Shape;

    fn flat_ground() -> SurfaceRuntime {
        SurfaceRuntime {
            id: "ground".into(),
            anchor: Vec2::zero(),
            normal: Vec2::unit_y(),
            tangent: Vec2::unit_x(),
            mu_s: 0.5,
            mu_k: 0.3,
            restitution: 0.0,
            half_extent: None,
        }
    }

    #[test]
    fn resting_body_gets_upward_normal_force() {
        let mut body = RigidBody::new("b".into(), Vec2::new(0.0, -0.01), 1.0, Shape::ball(0.5), None);
        body.apply_force(Vec2::new(0.0, -9.8));

        let surface = flat_ground();
        let contact = resolve_contact(&mut body, &surface, 1e-3).expect("penetrating");

        assert!(contact.normal_force > 0.0);
        assert!(body.ext_force.y > -9.8);
    }

    #[test]
    fn body_above_surface_has_no_contact() {
        let mut body = RigidBody::new("b".into(), Vec2::new(0.0, 1.0), 1.0, Shape::ball(0.5), None);
        let surface = flat_ground();
        assert!(resolve_contact(&mut body, &surface, 1e-3).is_none());
    }

    #[test]
    fn static_friction_cancels_small_tangential_force() {
        let mut body = RigidBody::new("b".into(), Vec2::new(0.0, -0.001), 1.0, Shape::ball(0.5), None);
        body.apply_force(Vec2::new(1.0, -9.8));

        let surface = flat_ground();
        resolve_contact(&mut body, &surface, 1e-3).unwrap();

        // mu_s * N (~ mu_s * m*g) should easily exceed the 1 N tangential
        // push, so the net tangential force should be (near) zero.
        assert!(body.ext_force.x.abs() < 1e-6);
    }
}
