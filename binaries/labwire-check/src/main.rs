//! labwire system check.
//!
//! Prints what the host is running and then proves a device can actually be
//! deployed: a single `hello_world` device is deployed and undeployed in a
//! throwaway `labwire_test` lab.
//!
//! # Usage
//!
//! ```bash
//! # Check the local Docker engine
//! labwire-check
//!
//! # Check a remote engine with a specific driver
//! labwire-check --remote-url tcp://10.0.0.5:2375 --network-plugin kathara/katharanp
//!
//! # Show the configuration file format
//! labwire-check --print-config
//! ```

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::CheckConfig;
use labwire_core::Lab;
use labwire_orchestrator::backend::HOSTHOME_MOUNT_OPTION;
use labwire_orchestrator::Manager;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lab used for the deployment check.
const TEST_LAB: &str = "labwire_test";

/// Device used for the deployment check.
const TEST_DEVICE: &str = "hello_world";

/// CLI arguments for the system check.
#[derive(Parser, Debug)]
#[command(
    name = "labwire-check",
    about = "Check that labwire can deploy devices on this host",
    version
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long)]
    json_logs: bool,

    /// Remote engine URL.
    #[arg(long, value_name = "URL")]
    remote_url: Option<String>,

    /// Network driver plugin (`org/name`, `_vde` suffix for userspace).
    #[arg(long, value_name = "PLUGIN")]
    network_plugin: Option<String>,

    /// Image for the test device.
    #[arg(long, value_name = "IMAGE")]
    image: Option<String>,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        config.format.as_str()
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Returns `sysname-release-machine`, like `uname -srm` joined with dashes.
fn platform_info() -> String {
    let sysname = match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        other => other,
    };

    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|r| r.trim().to_string())
        .ok()
        .filter(|r| !r.is_empty());

    match release {
        Some(release) => format!("{}-{}-{}", sysname, release, std::env::consts::ARCH),
        None => format!("{}-{}", sysname, std::env::consts::ARCH),
    }
}

/// Builds the single-device lab used for the deployment check.
fn test_lab() -> Lab {
    let mut lab = Lab::new(TEST_LAB);
    lab.set_option(HOSTHOME_MOUNT_OPTION, false);
    lab.get_or_new_device(TEST_DEVICE);
    lab
}

async fn run_container_check(manager: &Manager, lab: &Lab) -> labwire_orchestrator::Result<()> {
    manager.deploy_machine(lab, TEST_DEVICE).await?;
    manager.undeploy_machine(lab, TEST_DEVICE).await
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    if args.print_config {
        let config = CheckConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = if let Some(ref config_path) = args.config {
        CheckConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        CheckConfig::default()
    };

    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "labwire system check starting");

    println!("System Check");
    let manager = Manager::from_settings(config.settings.clone())
        .await
        .context("Failed to initialize manager")?;

    println!("Current Manager is:\t\t{}", manager.get_formatted_manager_name());
    let release = manager
        .get_release_version()
        .await
        .context("Failed to query manager version")?;
    println!("Manager version is:\t\t{}", release);
    println!("labwire version is:\t\t{}", env!("CARGO_PKG_VERSION"));
    println!("Operating System version is:\t{}", platform_info());

    println!(
        "Trying to run container with `{}` image...",
        manager.settings().image
    );
    match run_container_check(&manager, &test_lab()).await {
        Ok(()) => {
            println!("\u{2713} Container run successfully.");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "System check failed");
            println!("\u{00d7} Running container failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["labwire-check"]);
        assert!(args.config.is_none());
        assert!(!args.json_logs);
        assert!(!args.print_config);

        let args = CliArgs::parse_from([
            "labwire-check",
            "--config",
            "/etc/labwire/check.toml",
            "--json-logs",
            "--image",
            "alpine:3",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/labwire/check.toml")));
        assert!(args.json_logs);
        assert_eq!(args.image.as_deref(), Some("alpine:3"));
    }

    #[test]
    fn test_lab_shape() {
        let lab = test_lab();
        assert_eq!(lab.name(), TEST_LAB);
        assert_eq!(lab.bool_option(HOSTHOME_MOUNT_OPTION), Some(false));
        let device = lab.device(TEST_DEVICE).unwrap();
        assert_eq!(device.interface_count(), 0);
    }

    #[test]
    fn test_platform_info() {
        let info = platform_info();
        assert!(info.ends_with(std::env::consts::ARCH));
        assert!(!info.starts_with('-'));
    }
}
