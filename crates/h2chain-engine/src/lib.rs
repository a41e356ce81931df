//! Runtime for the h2chain simulation.
//!
//! Wires the synchronous agents of `h2chain-core` onto a pub/sub bus. Each
//! agent becomes an actor with a handler table; the tick driver paces the
//! whole pipeline.
//!
//! # Modules
//!
//! - [`bus`] -- Transport trait and the in-process bus
//! - [`nats_bus`] -- NATS transport
//! - [`handlers`] -- Actor runtime and payload codecs
//! - [`actors`] -- Aggregator, plant, source and monitor actors
//! - [`topology`] -- Spawns every actor from configuration
//! - [`tick_driver`] -- Broadcasts ticks at the configured pace
//! - [`error`] -- Engine error types

pub mod actors;
pub mod bus;
pub mod error;
pub mod handlers;
pub mod nats_bus;
pub mod tick_driver;
pub mod topology;
