//! Per-plant production gate.
//!
//! A plant may convert input to output only after it has received both
//! its power grant and its dependency grant for the current tick. The
//! machine tracks the two flags and derives its state from them, so the
//! order in which the grants arrive does not matter.
//!
//! ```text
//! WaitingForPower --power--> WaitingForDependency --dependency--> ReadyToProcess
//!        |                                                        ^
//!        +--dependency--> (still WaitingForPower) --power---------+
//!
//! ReadyToProcess --start--> Processing --complete--> Done
//! any state --reset_for_tick--> WaitingForPower
//! ```
//!
//! `Done` holds until the tick boundary, so one tick can never produce twice.

use std::sync::{Mutex, MutexGuard};

/// Observable state of a [`PlantStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlantState {
    /// No power grant yet.
    WaitingForPower,
    /// Power granted, dependency grant outstanding.
    WaitingForDependency,
    /// Both grants in; production may start.
    ReadyToProcess,
    /// Production claimed by one caller.
    Processing,
    /// Production finished for this tick.
    Done,
}

#[derive(Debug, Default)]
struct Flags {
    power: bool,
    dependency: bool,
    processing: bool,
    done: bool,
}

impl Flags {
    const fn state(&self) -> PlantState {
        if self.done {
            PlantState::Done
        } else if self.processing {
            PlantState::Processing
        } else if !self.power {
            PlantState::WaitingForPower
        } else if !self.dependency {
            PlantState::WaitingForDependency
        } else {
            PlantState::ReadyToProcess
        }
    }
}

/// Mutex-guarded production gate of one plant.
#[derive(Debug, Default)]
pub struct PlantStateMachine {
    flags: Mutex<Flags>,
}

impl PlantStateMachine {
    /// Create a machine waiting for power.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        // The flags stay consistent even if a holder panicked.
        self.flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> PlantState {
        self.lock().state()
    }

    /// Mark the power grant as received. Idempotent.
    pub fn receive_power(&self) -> PlantState {
        let mut flags = self.lock();
        if !flags.done {
            flags.power = true;
        }
        flags.state()
    }

    /// Mark the dependency grant as received. Idempotent.
    pub fn receive_dependency(&self) -> PlantState {
        let mut flags = self.lock();
        if !flags.done {
            flags.dependency = true;
        }
        flags.state()
    }

    /// Claim the production step. Succeeds for exactly one caller, and only
    /// from [`PlantState::ReadyToProcess`].
    pub fn start_processing(&self) -> bool {
        let mut flags = self.lock();
        if flags.state() == PlantState::ReadyToProcess {
            flags.processing = true;
            true
        } else {
            false
        }
    }

    /// Finish the production step. Returns `false` unless the machine was
    /// [`PlantState::Processing`].
    pub fn complete_processing(&self) -> bool {
        let mut flags = self.lock();
        if flags.state() == PlantState::Processing {
            *flags = Flags {
                done: true,
                ..Flags::default()
            };
            true
        } else {
            false
        }
    }

    /// Unconditional tick-boundary reset.
    pub fn reset_for_tick(&self) {
        *self.lock() = Flags::default();
    }
}
