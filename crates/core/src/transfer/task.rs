//! Task records published by the transfer engine

use std::fmt;

use serde::Serialize;

/// Engine-assigned task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Upload,
    Download,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What `total_units` and `completed_units` count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressUnit {
    Bytes,
    Files,
    Objects,
}

/// Snapshot of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferTask {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Display name (file name, directory or prefix)
    pub name: String,
    /// Fraction done, within `[0, 1]`
    pub progress: f64,
    pub status: TaskStatus,
    pub unit: ProgressUnit,
    pub total_units: u64,
    pub completed_units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TransferTask {
    pub(crate) fn new(id: TaskId, kind: TaskKind, name: String, unit: ProgressUnit) -> Self {
        Self {
            id,
            kind,
            name,
            progress: 0.0,
            status: TaskStatus::Pending,
            unit,
            total_units: 0,
            completed_units: 0,
            error_message: None,
        }
    }

    /// Record progress; ignored once the task is terminal
    pub(crate) fn record_progress(&mut self, completed: u64, total: u64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.total_units = total;
        self.completed_units = completed.min(total);
        self.progress = if total == 0 {
            0.0
        } else {
            (self.completed_units as f64 / total as f64).clamp(0.0, 1.0)
        };
        true
    }

    /// Move to a new status; terminal statuses are sticky
    pub(crate) fn transition(&mut self, status: TaskStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        match status {
            TaskStatus::Completed => {
                self.progress = 1.0;
                self.completed_units = self.total_units;
            }
            TaskStatus::Failed => self.error_message = error,
            _ => {}
        }
        true
    }
}
