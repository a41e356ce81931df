//! Shared type definitions for the h2chain simulation.
//!
//! Every agent in the pipeline speaks the same flat JSON vocabulary. This
//! crate is the single source of truth for those payloads and the
//! identifiers and enumerations they carry.
//!
//! # Modules
//!
//! - [`ids`] -- Strongly-typed plant identifiers
//! - [`enums`] -- Resource kinds, plant status, allocation mode and quality
//! - [`messages`] -- Wire payloads exchanged on the bus each tick

pub mod enums;
pub mod ids;
pub mod messages;

pub use enums::{AllocationMode, AllocationQuality, PlantKind, PlantStatus, ResourceKind};
pub use ids::PlantId;
pub use messages::{
    AllocationReport, KpiReport, PlannedOutput, ResourceReply, ResourceRequest, ResourceSupply,
    StageSummary, TickMessage,
};
