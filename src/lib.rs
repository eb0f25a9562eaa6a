//! Aggregation-and-export engine for daily epidemiological counters.
//!
//! Records flow through the pipeline in stages: axis key building
//! ([`aggregate::axis`]), dense counter accumulation
//! ([`aggregate::tensor`]), metric derivation ([`aggregate::derive`]),
//! sparsification into tagged points ([`aggregate::sparse`]), line
//! protocol encoding ([`influx::line`]) and batched HTTP writes
//! ([`influx`], [`export`]).

pub mod aggregate;
pub mod config;
pub mod export;
pub mod influx;
pub mod model;
