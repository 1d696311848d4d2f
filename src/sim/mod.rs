//! The Simulator and the modules it's built from: bodies, contact and
//! collision forces, constraints, event detection, and stage transitions.

pub mod body;
pub mod collision;
pub mod constraint;
pub mod contact;
pub mod event;
pub mod shape;
pub mod simulate;
pub mod stage;
pub mod trace;

pub use simulate::{simulate, Simulation};
pub use trace::Trace;
