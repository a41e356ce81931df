//! Enumeration types for the h2chain simulation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A resource negotiated between pipeline stages.
///
/// Each resource has exactly one aggregator. The order of the variants
/// follows the production chain from electricity to hydrogen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Electrical power in kW, drawn by every plant.
    Power,
    /// Raw water delivered by the pipe, in m³.
    Water,
    /// Filtered water produced by filter plants, in m³.
    FilteredWater,
    /// Distilled water produced by distillation plants, in m³.
    DistilledWater,
    /// Hydrogen produced by electrolyzers, in kg.
    Hydrogen,
}

impl ResourceKind {
    /// All resources in chain order.
    pub const ALL: [Self; 5] = [
        Self::Power,
        Self::Water,
        Self::FilteredWater,
        Self::DistilledWater,
        Self::Hydrogen,
    ];

    /// Subject segment used for this resource on the bus.
    pub const fn topic_segment(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Water => "water",
            Self::FilteredWater => "filtered_water",
            Self::DistilledWater => "distilled_water",
            Self::Hydrogen => "hydrogen",
        }
    }

    /// Whether the requesters of this resource are plants. Hydrogen is
    /// requested by the external consumer, which reports no KPIs.
    pub const fn requested_by_plants(self) -> bool {
        !matches!(self, Self::Hydrogen)
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.topic_segment())
    }
}

// ---------------------------------------------------------------------------
// Plants
// ---------------------------------------------------------------------------

/// The conversion stage a plant agent simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlantKind {
    /// Raw water to filtered water.
    Filter,
    /// Filtered water to distilled water.
    Distillation,
    /// Distilled water to hydrogen.
    Electrolyzer,
}

impl PlantKind {
    /// The dependency resource this stage consumes besides power.
    pub const fn input(self) -> ResourceKind {
        match self {
            Self::Filter => ResourceKind::Water,
            Self::Distillation => ResourceKind::FilteredWater,
            Self::Electrolyzer => ResourceKind::DistilledWater,
        }
    }

    /// The resource this stage supplies downstream.
    pub const fn output(self) -> ResourceKind {
        match self {
            Self::Filter => ResourceKind::FilteredWater,
            Self::Distillation => ResourceKind::DistilledWater,
            Self::Electrolyzer => ResourceKind::Hydrogen,
        }
    }

    /// Prefix of the per-plant environment overrides for this stage.
    pub const fn env_prefix(self) -> &'static str {
        match self {
            Self::Filter => "FILTER_PLANT",
            Self::Distillation => "DISTIL_PLANT",
            Self::Electrolyzer => "ELECTROLYZER",
        }
    }
}

/// Operating status reported in every KPI.
///
/// When several conditions hold at once the first in this order wins:
/// offline, power not received, resource not received, online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlantStatus {
    /// Producing normally.
    Online,
    /// In a forced outage.
    Offline,
    /// Planned power was non-zero but nothing was granted.
    PowerNotReceived,
    /// Planned input was non-zero but nothing was granted.
    ResourceNotReceived,
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Which allocation policy an aggregator applies under scarcity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Shares proportional to demand.
    #[default]
    Proportional,
    /// KPI-driven tiered caps.
    Adaptive,
}

impl AllocationMode {
    /// Interpret a plain-text adaptive-mode toggle.
    ///
    /// `true`, `True` and `1` switch adaptive mode on; anything else
    /// switches it off.
    pub fn from_toggle(raw: &str) -> Self {
        match raw.trim() {
            "true" | "True" | "1" => Self::Adaptive,
            _ => Self::Proportional,
        }
    }
}

/// Whether an allocation saw every expected peer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationQuality {
    /// All N requests and M supplies arrived.
    Complete,
    /// Flushed by the bounded wait with peers missing.
    Partial,
}
