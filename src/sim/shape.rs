//! Collision shapes.
//!
//! A thin wrapper around `parry2d_f64::shape::SharedShape`. The Contract's
//! body kinds only ever need a cuboid or a ball primitive, since body-body
//! collision is scoped to sphere-sphere and sphere-plane, so this keeps
//! `SharedShape` for its AABB and mass-property queries without pulling in
//! general polygon-manifold narrow-phase collision.

use parry2d_f64::mass_properties::MassProperties;
use parry2d_f64::shape::SharedShape;
use vek::{Aabr, Vec2};

use crate::math::Iso;

#[derive(Clone)]
pub struct Shape(SharedShape);

impl Shape {
    pub fn rectangle(half_size: Vec2<f64>) -> Self {
        Self(SharedShape::cuboid(half_size.x, half_size.y))
    }

    pub fn ball(radius: f64) -> Self {
        Self(SharedShape::ball(radius))
    }

    pub fn aabr(&self, iso: Iso) -> Aabr<f64> {
        let aabb = self.0.compute_aabb(&iso.into());
        Aabr {
            min: Vec2::new(aabb.mins.x, aabb.mins.y),
            max: Vec2::new(aabb.maxs.x, aabb.maxs.y),
        }
    }

    pub fn mass_properties(&self, density: f64) -> MassProperties {
        self.0.mass_properties(density)
    }

    /// Half-diagonal of the shape's local AABB, used as an effective ball
    /// radius when two bodies merge into a composite.
    pub fn bounding_radius(&self) -> f64 {
        let aabr = self.aabr(Iso::from_pos(Vec2::zero()));
        (aabr.max - aabr.min).magnitude() / 2.0
    }

    /// Moment of inertia for a body of the given total mass, used when the
    /// Contract does not supply `inertia` explicitly.
    pub fn inertia(&self, mass: f64) -> f64 {
        let area = self.0.mass_properties(1.0).mass();
        if area <= 0.0 {
            return mass;
        }
        let density = mass / area;
        self.0.mass_properties(density).principal_inertia()
    }
}

impl Default for Shape {
    fn default() -> Self {
        Self::rectangle(Vec2::new(0.5, 0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_inertia_matches_analytic_formula() {
        let half = Vec2::new(1.0, 0.5);
        let shape = Shape::rectangle(half);
        let mass = 2.0;
        let expected = mass * ((2.0f64).powi(2) + (1.0f64).powi(2)) / 12.0;
        assert!((shape.inertia(mass) - expected).abs() < 1e-6);
    }

    #[test]
    fn bounding_radius_is_half_diagonal() {
        let shape = Shape::rectangle(Vec2::new(1.0, 1.0));
        assert!((shape.bounding_radius() - (2.0f64).sqrt()).abs() < 1e-9);
    }
}
