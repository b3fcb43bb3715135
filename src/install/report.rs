use std::fmt;

use super::Stage;
use crate::error::InstallError;

/// How an installed component got to its current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was recorded before.
    Fresh,
    /// A previous installation was replaced.
    Updated,
    /// Already at the resolved version; nothing downloaded.
    UpToDate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    Installed {
        version: String,
        outcome: Outcome,
        files: usize,
    },
    Failed {
        stage: Stage,
        error: InstallError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentResult {
    pub id: String,
    pub status: ComponentStatus,
}

impl ComponentResult {
    pub fn is_installed(&self) -> bool {
        matches!(self.status, ComponentStatus::Installed { .. })
    }
}

impl fmt::Display for ComponentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            ComponentStatus::Installed {
                version,
                outcome: Outcome::UpToDate,
                ..
            } => write!(f, "{} {} is up to date", self.id, version),
            ComponentStatus::Installed {
                version, files, ..
            } => write!(f, "{} {} installed ({} files)", self.id, version, files),
            ComponentStatus::Failed { stage, error } => {
                write!(f, "{} failed while {}: {}", self.id, stage, error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSummary {
    Success,
    Partial,
    Failed,
}

/// One result per requested component, in manifest order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallReport {
    pub results: Vec<ComponentResult>,
}

impl InstallReport {
    pub fn get(&self, id: &str) -> Option<&ComponentResult> {
        self.results.iter().find(|r| r.id == id)
    }

    pub fn installed(&self) -> usize {
        self.results.iter().filter(|r| r.is_installed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.installed()
    }

    pub fn summary(&self) -> RunSummary {
        match (self.installed(), self.failed()) {
            (_, 0) => RunSummary::Success,
            (0, _) => RunSummary::Failed,
            _ => RunSummary::Partial,
        }
    }

    /// 0 when everything is installed, 2 for a partial run, 3 when nothing is.
    pub fn exit_code(&self) -> i32 {
        match self.summary() {
            RunSummary::Success => 0,
            RunSummary::Partial => 2,
            RunSummary::Failed => 3,
        }
    }
}
