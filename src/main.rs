use anyhow::Result;
use clap::Parser;
use log::warn;
use obs_installer::cleanup::{self, SharedCleanupContext};
use obs_installer::config::InstallerConfig;
use obs_installer::http::RetryPolicy;
use obs_installer::install::InstallOptions;
use obs_installer::manifest::ManifestSource;
use obs_installer::runtime::{RealRuntime, Runtime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// obs-installer - install OBS Studio and plugins from a manifest
///
/// Resolves the latest release of every component listed in the manifest,
/// downloads it (with resume and retry), verifies it and extracts it into
/// the target directory. Components already at the latest version are skipped.
///
/// If the GITHUB_TOKEN environment variable is set, it will be used for authentication.
///
/// Exit codes: 0 all installed, 2 some failed, 3 all failed, 1 run error.
#[derive(Parser, Debug)]
#[command(author, version = env!("OBS_INSTALLER_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log progress details (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install or update the components of a manifest
    Install(InstallArgs),

    /// Show installed components
    Status(StatusArgs),
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Manifest URL or file path
    #[arg(long, short, env = "OBS_INSTALLER_MANIFEST", value_name = "URL|PATH")]
    manifest: ManifestSource,

    /// OBS installation directory
    #[arg(long, short, value_name = "DIR")]
    target: PathBuf,

    /// Download cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Installed state file
    #[arg(long, env = "OBS_INSTALLER_STATE", value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// GitHub token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Components processed at the same time
    #[arg(long, short = 'j', value_name = "N")]
    concurrency: Option<usize>,

    /// Attempts per request, first one included
    #[arg(long, value_name = "N")]
    max_attempts: Option<usize>,

    /// Delay before the first retry
    #[arg(long, value_name = "MS")]
    base_delay_ms: Option<u64>,

    /// GitHub API URL (defaults to https://api.github.com)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Reinstall components that are already up to date
    #[arg(long)]
    force: bool,

    /// Only install these components (repeatable)
    #[arg(long, value_name = "ID")]
    only: Vec<String>,

    /// Keep cached archives of versions that have been superseded
    #[arg(long)]
    keep_old_downloads: bool,
}

#[derive(clap::Args, Debug)]
struct StatusArgs {
    /// Installed state file
    #[arg(long, env = "OBS_INSTALLER_STATE", value_name = "FILE")]
    state_file: Option<PathBuf>,
}

impl InstallArgs {
    fn into_config(self, runtime: &dyn Runtime) -> Result<InstallerConfig> {
        let mut config = InstallerConfig::new(runtime, self.manifest, self.target)?;
        if let Some(dir) = self.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(path) = self.state_file {
            config.state_path = path;
        }
        if let Some(token) = self.token.filter(|t| !t.is_empty()) {
            config.token = Some(token);
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n.max(1);
        }
        if let Some(url) = self.api_url {
            config.api_url = url;
        }
        config.keep_old_downloads = self.keep_old_downloads;
        config.retry = RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(config.retry.max_attempts).max(1),
            base_delay: self
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(config.retry.base_delay),
            ..config.retry
        };
        Ok(config)
    }
}

/// First Ctrl-C cancels the run; a second one removes staging paths and exits.
fn handle_interrupts(cancel: CancellationToken, cleanup_ctx: SharedCleanupContext) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing current steps...");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted again, cleaning up...");
            cleanup::lock(&cleanup_ctx).cleanup(&RealRuntime);
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    let runtime = Arc::new(RealRuntime);

    match cli.command {
        Commands::Install(args) => {
            let only = args.only.clone();
            let force = args.force;
            let config = args.into_config(runtime.as_ref())?;

            let cleanup_ctx = cleanup::new_shared();
            let options = InstallOptions {
                force,
                only,
                cancel: CancellationToken::new(),
            };
            handle_interrupts(options.cancel.clone(), Arc::clone(&cleanup_ctx));

            let report = obs_installer::commands::install(
                Arc::clone(&runtime),
                &config,
                &options,
                Arc::clone(&cleanup_ctx),
            )
            .await?;

            let leftovers = cleanup::lock(&cleanup_ctx).cleanup(runtime.as_ref());
            if leftovers > 0 {
                warn!("Removed {} leftover staging path(s)", leftovers);
            }

            let code = report.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Status(args) => {
            let state_path = match args.state_file {
                Some(path) => path,
                None => obs_installer::config::default_state_path(runtime.as_ref())?,
            };
            obs_installer::commands::status(runtime, &state_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from([
            "obs-installer",
            "install",
            "--manifest",
            "https://example.com/manifest.json",
            "--target",
            "/opt/obs",
            "--only",
            "obs-studio",
            "--only",
            "obs-ndi",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(
                    args.manifest,
                    ManifestSource::Url("https://example.com/manifest.json".into())
                );
                assert_eq!(args.target, PathBuf::from("/opt/obs"));
                assert_eq!(args.only, vec!["obs-studio", "obs-ndi"]);
                assert!(!args.force);
            }
            _ => panic!("Expected Install command"),
        }
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_install_requires_target() {
        let result = Cli::try_parse_from(["obs-installer", "install", "--manifest", "m.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_status_parsing() {
        let cli = Cli::try_parse_from([
            "obs-installer",
            "-v",
            "status",
            "--state-file",
            "/tmp/state.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Status(args) => {
                assert_eq!(args.state_file, Some(PathBuf::from("/tmp/state.json")));
            }
            _ => panic!("Expected Status command"),
        }
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["obs-installer"]).is_err());
    }

    #[test]
    fn test_install_args_override_defaults() {
        let cli = Cli::try_parse_from([
            "obs-installer",
            "install",
            "-m",
            "manifest.json",
            "-t",
            "/opt/obs",
            "--cache-dir",
            "/tmp/cache",
            "--state-file",
            "/tmp/state.json",
            "-j",
            "0",
            "--max-attempts",
            "3",
            "--base-delay-ms",
            "250",
            "--api-url",
            "http://localhost:8080",
            "--keep-old-downloads",
        ])
        .unwrap();
        let Commands::Install(args) = cli.command else {
            panic!("Expected Install command");
        };

        let config = args.into_config(&RealRuntime).unwrap();
        assert_eq!(config.manifest, ManifestSource::Path(PathBuf::from("manifest.json")));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.factor, 2);
        assert_eq!(config.api_url, "http://localhost:8080");
        assert!(config.keep_old_downloads);
    }
}
