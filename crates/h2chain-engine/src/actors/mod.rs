//! Actors: core state machines wired to the bus.
//!
//! Each submodule wraps one kind of core agent in actor state and builds
//! its handler table. Translation between payloads and core calls lives
//! here; the protocol logic stays in `h2chain-core`.

pub mod aggregator;
pub mod monitor;
pub mod plant;
pub mod sources;
