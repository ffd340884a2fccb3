pub mod logs;
pub mod signals;
pub mod supervisor;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bot_config::Preset;

/// One of the three fixed worker slots every tenant owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotId {
    Bot1,
    Bot2,
    Bot3,
}

impl SlotId {
    pub const ALL: [SlotId; 3] = [SlotId::Bot1, SlotId::Bot2, SlotId::Bot3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot1 => "bot1",
            Self::Bot2 => "bot2",
            Self::Bot3 => "bot3",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Bot1 => 0,
            Self::Bot2 => 1,
            Self::Bot3 => 2,
        }
    }

    /// Preset seeded into the slot when the tenant is created.
    pub fn preset(&self) -> Preset {
        match self {
            Self::Bot1 => Preset::Balanced,
            Self::Bot2 => Preset::Aggressive,
            Self::Bot3 => Preset::Conservative,
        }
    }

    pub fn display_name(&self) -> &'static str {
        self.preset().display_name()
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot1" => Ok(Self::Bot1),
            "bot2" => Ok(Self::Bot2),
            "bot3" => Ok(Self::Bot3),
            other => Err(format!("unknown bot: {other}")),
        }
    }
}

/// Slot status.
///
/// `stopped → starting → running | error`, and any non-stopped state returns
/// to `stopped` on stop or process exit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

impl SlotStatus {
    /// Whether `self → next` is an edge of the slot state machine.
    pub fn can_become(self, next: SlotStatus) -> bool {
        use SlotStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Error, Stopped)
        )
    }
}

/// Per-slot line in a status snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotView {
    pub id: SlotId,
    pub name: &'static str,
    pub status: SlotStatus,
}

/// Current state of all three slots.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub running_bots: usize,
    pub bots: Vec<SlotView>,
}

impl StatusSnapshot {
    pub fn status_of(&self, slot: SlotId) -> SlotStatus {
        self.bots
            .iter()
            .find(|b| b.id == slot)
            .map(|b| b.status)
            .unwrap_or_default()
    }
}
