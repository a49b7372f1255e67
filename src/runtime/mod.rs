//! Launching target programs under a coordinated environment.

pub mod launcher;

pub use launcher::{run, LaunchSpec};
