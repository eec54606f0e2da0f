//! The six fixed pipeline stages.

use serde::{Deserialize, Serialize};

/// One phase of command processing. The set is closed and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Understand,
    Query,
    Find,
    Analyze,
    Prepare,
    Ready,
}

impl Stage {
    /// 1-based stage number as shown to clients.
    pub fn number(&self) -> u8 {
        self.index() as u8 + 1
    }

    /// 0-based position, for per-stage arrays.
    pub fn index(&self) -> usize {
        match self {
            Stage::Understand => 0,
            Stage::Query => 1,
            Stage::Find => 2,
            Stage::Analyze => 3,
            Stage::Prepare => 4,
            Stage::Ready => 5,
        }
    }

    pub fn from_number(number: u8) -> Option<Stage> {
        match number {
            1 => Some(Stage::Understand),
            2 => Some(Stage::Query),
            3 => Some(Stage::Find),
            4 => Some(Stage::Analyze),
            5 => Some(Stage::Prepare),
            6 => Some(Stage::Ready),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Stage::Understand => "Understanding command",
            Stage::Query => "Generating query",
            Stage::Find => "Finding matching tickets",
            Stage::Analyze => "Analyzing tickets",
            Stage::Prepare => "Preparing changes",
            Stage::Ready => "Ready for review",
        }
    }

    /// Short label for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Understand => "understand",
            Stage::Query => "query",
            Stage::Find => "find",
            Stage::Analyze => "analyze",
            Stage::Prepare => "prepare",
            Stage::Ready => "ready",
        }
    }

    pub fn all() -> [Stage; 6] {
        [
            Stage::Understand,
            Stage::Query,
            Stage::Find,
            Stage::Analyze,
            Stage::Prepare,
            Stage::Ready,
        ]
    }
}
