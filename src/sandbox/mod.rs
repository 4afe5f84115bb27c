//! Sandbox configuration and lifecycle on top of the ruri engine.

pub mod descriptor;
pub mod engine;
pub mod lifecycle;
pub mod render;
pub mod synth;
