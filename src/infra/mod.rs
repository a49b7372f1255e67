//! Infrastructure adapters: the environment contract shared with child
//! processes, and the optional inter-process coordination library.

pub mod coord;
pub mod env;
