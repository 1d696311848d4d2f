//! The Contract data model.
//!
//! Plain, `serde`-deserializable data. The Contract is owned by the caller
//! and read-only to the rest of the core. Typed `kind` fields use
//! exhaustive Rust enums rather than bare strings, so the Pre-Sim Gate can
//! match on them exhaustively instead of string-comparing.

use serde::{Deserialize, Serialize};
use vek::Vec2;

/// String id matching `[A-Za-z_][A-Za-z0-9_]*`.
pub type Id = String;

/// A bare number (assumed SI) or an explicit `{value, unit}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Bare(f64),
    WithUnit { value: f64, unit: String },
}

impl Quantity {
    /// Resolve to an SI value, assuming bare numbers are already SI.
    pub fn to_si(self) -> Result<f64, crate::units::UnitsError> {
        match self {
            Quantity::Bare(value) => Ok(value),
            Quantity::WithUnit { value, unit } => {
                let (si, _dimension) = crate::units::normalize(value, &unit)?;
                Ok(si)
            }
        }
    }

    /// Resolve to an SI value and check it fills the expected dimension.
    pub fn to_si_expect(
        self,
        expected: crate::units::Dimension,
    ) -> Result<f64, crate::units::UnitsError> {
        match self {
            Quantity::Bare(value) => Ok(value),
            Quantity::WithUnit { value, unit } => {
                crate::units::normalize_expect(value, &unit, expected)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2Quantity {
    pub x: f64,
    pub y: f64,
}

impl From<Vec2Quantity> for Vec2<f64> {
    fn from(v: Vec2Quantity) -> Self {
        Vec2::new(v.x, v.y)
    }
}

impl From<Vec2<f64>> for Vec2Quantity {
    fn from(v: Vec2<f64>) -> Self {
        Self { x: v.x, y: v.y }
    }
}

/// Schema version field, `physics-contract/MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const SUPPORTED_MAJOR: u32 = 1;

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("physics-contract/")?;
        let mut parts = rest.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;

        Some(Self { major, minor, patch })
    }

    pub fn is_supported(&self) -> bool {
        self.major == Self::SUPPORTED_MAJOR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyKind {
    Slider,
    Block,
    Ball,
    SpringMass,
    Assembly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub id: Id,
    pub kind: BodyKind,
    pub mass: Quantity,
    #[serde(default)]
    pub inertia: Option<Quantity>,
    #[serde(default)]
    pub size: Option<Vec2Quantity>,
    pub initial_position: Vec2Quantity,
    #[serde(default)]
    pub initial_velocity: Option<Vec2Quantity>,
    #[serde(default)]
    pub initial_angle: Option<Quantity>,
    #[serde(default)]
    pub initial_angular_velocity: Option<Quantity>,
    #[serde(default)]
    pub radius: Option<Quantity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceKind {
    Plane,
    Incline,
    Segment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Surface {
    pub id: Id,
    pub kind: SurfaceKind,
    pub anchor: Vec2Quantity,
    pub normal: Vec2Quantity,
    #[serde(default)]
    pub tangent: Option<Vec2Quantity>,
    #[serde(default)]
    pub length: Option<Quantity>,
    pub static_friction: Quantity,
    pub kinetic_friction: Quantity,
    pub restitution: Quantity,
}

/// A spring or rope endpoint: either a body id or a fixed anchor point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachPoint {
    Body(Id),
    Anchor(Vec2Quantity),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spring {
    pub id: Id,
    pub a: AttachPoint,
    pub b: AttachPoint,
    pub rest_length: Quantity,
    pub stiffness: Quantity,
    #[serde(default)]
    pub damping: Option<Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rope {
    pub id: Id,
    pub a: AttachPoint,
    pub b: AttachPoint,
    pub length: Quantity,
    #[serde(default = "default_rope_tolerance")]
    pub inextensibility_tolerance: f64,
}

fn default_rope_tolerance() -> f64 {
    1e-4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Contact,
    Friction,
    Spring,
    Rope,
    Collision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePair {
    pub a: Id,
    pub b: Id,
    pub interaction: InteractionKind,
}

/// Declares that two bodies merge into one composite the moment this stage
/// exits. Applied atomically at the exit event's resolved time, alongside
/// the stage transition itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDirective {
    pub a: Id,
    pub b: Id,
    pub into: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: Id,
    #[serde(default)]
    pub active_interactions: Vec<ActivePair>,
    #[serde(default)]
    pub entry_event: Option<Id>,
    pub exit: StageExit,
    #[serde(default)]
    pub merge: Option<MergeDirective>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageExit {
    Event(Id),
    TimeBound(Quantity),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub t_min: f64,
    pub t_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueBounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// State fields a [`CustomConstraint`] may read. A fixed enum instead of a
/// string keeps constraints like `"x > 5"` pre-parsed at load time rather
/// than interpreted with `eval`-style string matching during simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateField {
    PositionX,
    PositionY,
    Speed,
    VelocityX,
    VelocityY,
    Angle,
    AngularVelocity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
}

/// A constraint-violation predicate, pre-parsed at contract-load time rather
/// than interpreted at simulation time. Feeds the event detector's
/// "constraint violation" family: `g = c(state)` where `c` is this
/// predicate's field compared against its threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomConstraint {
    pub id: Id,
    pub body: Id,
    pub field: PredicateField,
    pub comparator: Comparator,
    pub threshold: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Contact,
    Separation,
    Collision,
    Threshold,
    StateChange,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedEvent {
    pub name: Id,
    #[serde(default)]
    pub body: Option<Id>,
    #[serde(default)]
    pub surface: Option<Id>,
    #[serde(default)]
    pub kind: Option<EventKind>,
    #[serde(default)]
    pub window: Option<TimeWindow>,
    #[serde(default)]
    pub value_bounds: Option<ValueBounds>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tolerances {
    #[serde(default = "default_r2_min")]
    pub r2_min: f64,
    #[serde(default = "default_rel_err")]
    pub rel_err: f64,
    #[serde(default = "default_event_time_sec")]
    pub event_time_sec: f64,
    #[serde(default = "default_energy_drift_rel")]
    pub energy_drift_rel: f64,
    #[serde(default = "default_v_eps")]
    pub v_eps: f64,
    /// Absolute term of the adaptive integrator's step-acceptance rule,
    /// `err <= atol + rtol * ||state||`. Unused in fixed-step mode.
    #[serde(default = "default_atol")]
    pub atol: f64,
    /// Relative term of the adaptive integrator's step-acceptance rule.
    /// Unused in fixed-step mode.
    #[serde(default = "default_rtol")]
    pub rtol: f64,
}

fn default_r2_min() -> f64 {
    0.95
}
fn default_rel_err() -> f64 {
    0.05
}
fn default_event_time_sec() -> f64 {
    0.1
}
fn default_energy_drift_rel() -> f64 {
    0.02
}
fn default_v_eps() -> f64 {
    1e-3
}
fn default_atol() -> f64 {
    1e-6
}
fn default_rtol() -> f64 {
    1e-4
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            r2_min: default_r2_min(),
            rel_err: default_rel_err(),
            event_time_sec: default_event_time_sec(),
            energy_drift_rel: default_energy_drift_rel(),
            v_eps: default_v_eps(),
            atol: default_atol(),
            rtol: default_rtol(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndCondition {
    #[serde(default)]
    pub t_end: Option<f64>,
    #[serde(default)]
    pub terminal_event: Option<Id>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec2Quantity,
    pub max: Vec2Quantity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub gravity: Vec2Quantity,
    pub bounds: Bounds,
    #[serde(default)]
    pub default_step_hint: Option<f64>,
    /// Hard cap on integrator steps for a single `simulate` call.
    #[serde(default)]
    pub stats_budget: Option<u64>,
    /// Which stepping scheme the Integrator Core uses. Defaults to the
    /// fixed-step semi-implicit Euler baseline.
    #[serde(default)]
    pub integrator: IntegratorMode,
}

/// Selects between the fixed-step baseline and the step-size-adaptive
/// variant, offered behind the same `Simulation::step` interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorMode {
    #[default]
    Fixed,
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub schema_version: String,
    pub world: World,
    pub bodies: Vec<Body>,
    pub surfaces: Vec<Surface>,
    #[serde(default)]
    pub springs: Vec<Spring>,
    #[serde(default)]
    pub ropes: Vec<Rope>,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub expected_events: Vec<ExpectedEvent>,
    /// Pre-parsed constraint-violation predicates.
    #[serde(default)]
    pub constraints: Vec<CustomConstraint>,
    #[serde(default)]
    pub tolerances: Tolerances,
    pub end_condition: EndCondition,
}

impl Contract {
    pub fn body(&self, id: &str) -> Option<&Body> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn surface(&self, id: &str) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    pub fn schema_version(&self) -> Option<SchemaVersion> {
        SchemaVersion::parse(&self.schema_version)
    }

    /// Parse a Contract from its JSON wire format.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialize back to the JSON wire format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_JSON: &str = r#"{
        "schema_version": "physics-contract/1.0.0",
        "world": {
            "gravity": {"x": 0.0, "y": -9.8},
            "bounds": {"min": {"x": -10.0, "y": -10.0}, "max": {"x": 10.0, "y": 10.0}}
        },
        "bodies": [{
            "id": "ball",
            "kind": "ball",
            "mass": 1.0,
            "initial_position": {"x": 0.0, "y": 5.0},
            "radius": 0.5
        }],
        "surfaces": [{
            "id": "ground",
            "kind": "plane",
            "anchor": {"x": 0.0, "y": 0.0},
            "normal": {"x": 0.0, "y": 1.0},
            "static_friction": 0.5,
            "kinetic_friction": 0.3,
            "restitution": 0.0
        }],
        "stages": [],
        "end_condition": {"t_end": 2.0}
    }"#;

    #[test]
    fn contract_round_trips_through_json() {
        let contract = Contract::from_json(MINIMAL_JSON).expect("valid contract JSON");
        assert_eq!(contract.bodies.len(), 1);
        assert_eq!(contract.schema_version().unwrap().major, 1);

        let re_encoded = contract.to_json().expect("serializable");
        let round_tripped = Contract::from_json(&re_encoded).expect("round-tripped JSON still valid");
        assert_eq!(round_tripped.bodies[0].id, "ball");
    }

    #[test]
    fn quantity_with_explicit_unit_resolves_to_si() {
        let q = Quantity::WithUnit { value: 9.8, unit: "m/s^2".into() };
        assert_eq!(q.to_si().unwrap(), 9.8);
    }

    #[test]
    fn schema_version_rejects_unsupported_major() {
        let v = SchemaVersion::parse("physics-contract/2.0.0").unwrap();
        assert!(!v.is_supported());
    }
}
