//! Class matching, call-site substitution and coverage weaving for JVM instrumentation
//! agents.

pub mod bytecode;
mod cfg;
pub mod config;
pub mod coverage;
pub mod csi;
pub mod descriptor;
pub mod fixed_cache;
pub mod ipc;
pub mod ir;
pub mod matcher;
pub mod matching;
pub mod opcodes;
pub mod scan;
pub mod tooling;
