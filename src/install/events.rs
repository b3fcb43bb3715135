//! Progress and status events emitted by the installer.

use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Where a component is in the install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pending,
    Resolving,
    Downloading,
    Extracting,
    Installed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Resolving => "resolving",
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Installed => "installed",
            Stage::Failed => "failed",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Stage { id: String, stage: Stage },
    Progress {
        id: String,
        transferred: u64,
        total: Option<u64>,
    },
}

/// Consumer of [`InstallEvent`]s. Must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: InstallEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: InstallEvent) {}
}

impl ProgressReporter for UnboundedSender<InstallEvent> {
    fn report(&self, event: InstallEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Downloading.to_string(), "downloading");
        assert_eq!(Stage::Installed.to_string(), "installed");
    }

    #[tokio::test]
    async fn test_channel_reporter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.report(InstallEvent::Stage {
            id: "obs-studio".into(),
            stage: Stage::Resolving,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            InstallEvent::Stage {
                id: "obs-studio".into(),
                stage: Stage::Resolving
            }
        );
    }

    #[test]
    fn test_report_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel::<InstallEvent>();
        drop(rx);
        tx.report(InstallEvent::Progress {
            id: "x".into(),
            transferred: 1,
            total: None,
        });
    }
}
