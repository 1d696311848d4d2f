//! The Trace: the Simulator's sole output.
//!
//! Exclusively owned by the Simulator during construction, handed to the
//! Event Detector to enrich in place, then to the validators read-only.
//! `bincode` supplies a compact binary encoding alongside JSON, so callers
//! can pick whichever wire format suits them.

use serde::{Deserialize, Serialize};

use crate::contract::model::Vec2Quantity;
use crate::sim::event::EventRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodySample {
    pub id: String,
    pub p: Vec2Quantity,
    pub v: Vec2Quantity,
    #[serde(rename = "theta")]
    pub theta: f64,
    #[serde(rename = "omega")]
    pub omega: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub t: f64,
    pub bodies: Vec<BodySample>,
    pub energy: f64,
    pub momentum: Vec2Quantity,
}

/// Why the simulator stopped advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TEnd,
    TerminalEvent,
    Divergence,
    BoundExit,
    BudgetExhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub step_count: u64,
    pub rejected_steps: u64,
    pub cpu_time_sec: f64,
    pub max_local_error: f64,
    pub end_reason: EndReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub samples: Vec<Sample>,
    pub events: Vec<EventRecord>,
    pub stats: Stats,
}

impl Trace {
    /// Encode the trace as `bincode`'s compact binary format, the caller-
    /// selectable alternative to JSON.
    pub fn to_bincode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bincode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Encode the trace as JSON, the wire format's other caller-selectable
    /// option.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Whether any sample contains a non-finite value (used by the Post-Sim
    /// Gate's quick check).
    pub fn has_non_finite_sample(&self) -> bool {
        self.samples.iter().any(|s| {
            !s.energy.is_finite()
                || !s.momentum.x.is_finite()
                || !s.momentum.y.is_finite()
                || s.bodies.iter().any(|b| {
                    !b.p.x.is_finite()
                        || !b.p.y.is_finite()
                        || !b.v.x.is_finite()
                        || !b.v.y.is_finite()
                        || !b.theta.is_finite()
                        || !b.omega.is_finite()
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> Trace {
        Trace {
            samples: vec![Sample {
                t: 0.0,
                bodies: vec![BodySample {
                    id: "ball".into(),
                    p: Vec2Quantity { x: 0.0, y: 5.0 },
                    v: Vec2Quantity { x: 0.0, y: 0.0 },
                    theta: 0.0,
                    omega: 0.0,
                }],
                energy: 49.0,
                momentum: Vec2Quantity { x: 0.0, y: 0.0 },
            }],
            events: vec![],
            stats: Stats {
                step_count: 1,
                rejected_steps: 0,
                cpu_time_sec: 0.0,
                max_local_error: 0.0,
                end_reason: EndReason::TEnd,
            },
        }
    }

    #[test]
    fn trace_round_trips_through_json() {
        let trace = sample_trace();
        let json = trace.to_json().expect("serializable");
        let back = Trace::from_json(&json).expect("deserializable");
        assert_eq!(back.samples.len(), 1);
        assert_eq!(back.stats.end_reason, EndReason::TEnd);
    }

    #[test]
    fn trace_round_trips_through_bincode() {
        let trace = sample_trace();
        let bytes = trace.to_bincode().expect("serializable");
        let back = Trace::from_bincode(&bytes).expect("deserializable");
        assert_eq!(back.samples[0].bodies[0].id, "ball");
    }
}
