use anyhow::Result;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cleanup::SharedCleanupContext;
use crate::config::InstallerConfig;
use crate::install::{
    InstallEvent, InstallOptions, InstallReport, Installer, ProgressReporter, RunSummary, Stage,
};
use crate::manifest::load_manifest;
use crate::runtime::Runtime;

/// Loads the manifest and installs its components, printing progress.
///
/// Only run-level failures (configuration, manifest) are returned as errors;
/// per-component failures are part of the report.
#[tracing::instrument(skip_all)]
pub async fn install<R: Runtime + 'static>(
    runtime: Arc<R>,
    config: &InstallerConfig,
    options: &InstallOptions,
    cleanup: SharedCleanupContext,
) -> Result<InstallReport> {
    debug!("Configuration: {:?}", config.redacted());
    let http = config.http_client()?;
    let manifest = load_manifest(&config.manifest, runtime.as_ref(), &http).await?;

    let installer = Installer::new(Arc::clone(&runtime), config.resolver(&http)?, http, config)
        .with_reporter(Arc::new(ConsoleReporter::new()))
        .with_cleanup(cleanup);
    let report = installer.install(manifest.components(), options).await;

    println!();
    for result in &report.results {
        println!("{}", result);
    }
    println!("{}", summary_line(&report));
    Ok(report)
}

fn summary_line(report: &InstallReport) -> String {
    let total = report.results.len();
    match report.summary() {
        RunSummary::Success => format!("All {} component(s) installed.", total),
        RunSummary::Partial => format!(
            "{} of {} component(s) installed, {} failed.",
            report.installed(),
            total,
            report.failed()
        ),
        RunSummary::Failed => format!("No component installed, {} failed.", total),
    }
}

/// Prints stage transitions and download progress in 25% steps.
#[derive(Default)]
pub struct ConsoleReporter {
    printed: Mutex<HashMap<String, u64>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(&self, event: &InstallEvent) -> Option<String> {
        match event {
            InstallEvent::Stage {
                stage: Stage::Pending,
                ..
            } => None,
            InstallEvent::Stage { id, stage } => Some(format!("{:>12} {}", stage, id)),
            InstallEvent::Progress {
                id,
                transferred,
                total: Some(total),
            } if *total > 0 => {
                let step = (transferred.saturating_mul(100) / total).min(100) / 25 * 25;
                let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
                let last = printed.entry(id.clone()).or_insert(0);
                if step <= *last {
                    return None;
                }
                *last = step;
                Some(format!(
                    "{:>12} {} {}% of {:.1} MB",
                    "",
                    id,
                    step,
                    *total as f64 / (1024.0 * 1024.0)
                ))
            }
            InstallEvent::Progress { .. } => None,
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, event: InstallEvent) {
        if let Some(line) = self.render(&event) {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use crate::install::{ComponentResult, ComponentStatus, Outcome};

    fn progress(transferred: u64, total: Option<u64>) -> InstallEvent {
        InstallEvent::Progress {
            id: "obs-studio".into(),
            transferred,
            total,
        }
    }

    #[test]
    fn test_stage_lines() {
        let reporter = ConsoleReporter::new();
        let line = reporter.render(&InstallEvent::Stage {
            id: "obs-studio".into(),
            stage: Stage::Downloading,
        });
        assert_eq!(line.as_deref(), Some(" downloading obs-studio"));

        let pending = reporter.render(&InstallEvent::Stage {
            id: "obs-studio".into(),
            stage: Stage::Pending,
        });
        assert_eq!(pending, None);
    }

    #[test]
    fn test_progress_is_printed_in_steps() {
        let reporter = ConsoleReporter::new();
        let total = 4 * 1024 * 1024;

        assert_eq!(reporter.render(&progress(1, Some(total))), None);
        let quarter = reporter.render(&progress(total / 4 + 10, Some(total))).unwrap();
        assert!(quarter.ends_with("obs-studio 25% of 4.0 MB"));
        assert_eq!(reporter.render(&progress(total / 4 + 20, Some(total))), None);
        assert!(reporter.render(&progress(total, Some(total))).unwrap().contains("100%"));
        assert_eq!(reporter.render(&progress(100, None)), None);
    }

    #[test]
    fn test_summary_line() {
        let ok = ComponentResult {
            id: "a".into(),
            status: ComponentStatus::Installed {
                version: "1".into(),
                outcome: Outcome::Fresh,
                files: 1,
            },
        };
        let failed = ComponentResult {
            id: "b".into(),
            status: ComponentStatus::Failed {
                stage: Stage::Resolving,
                error: ResolutionError::InvalidLocator("b".into()).into(),
            },
        };

        let report = InstallReport {
            results: vec![ok.clone(), failed.clone()],
        };
        assert_eq!(summary_line(&report), "1 of 2 component(s) installed, 1 failed.");

        let report = InstallReport { results: vec![ok] };
        assert_eq!(summary_line(&report), "All 1 component(s) installed.");

        let report = InstallReport { results: vec![failed] };
        assert_eq!(summary_line(&report), "No component installed, 1 failed.");
    }
}
