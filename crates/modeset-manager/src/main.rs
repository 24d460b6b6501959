//! modeset-manager command-line entry point.
//!
//! Loads the config file, opens one display backend and runs a single
//! command against it.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- TOML settings + saved profiles
//!  └─ open_backend()             -- KMS device or in-memory test backend
//!  └─ TopologyService::new()     -- initial hardware read
//!  └─ command
//!       ├─ show / apply / gamma / power   (one shot)
//!       └─ watch                          (poll until Ctrl-C)
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use modeset_core::TopologySnapshot;
use modeset_manager::application::manage_topology::TopologyService;
use modeset_manager::application::resolve_layout::{profile_matches, resolve_profile, LayoutProfile};
use modeset_manager::infrastructure::backend::{open_backend, BackendKind, DisplayBackend, GammaRamp, PowerSaveMode};
use modeset_manager::infrastructure::storage::config::load_config;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Display topology manager.
///
/// Reads the display hardware, applies saved multi-monitor layouts
/// atomically and controls per-output gamma and power state.
#[derive(Debug, Parser)]
#[command(
    name = "modeset-manager",
    about = "Resolve display topology and apply multi-monitor layouts",
    version
)]
struct Cli {
    /// Config file to use instead of `$XDG_CONFIG_HOME/modeset/config.toml`.
    #[arg(long, env = "MODESET_CONFIG")]
    config: Option<PathBuf>,

    /// Backend override; the config file decides when absent.
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// JSON inventory for the test backend.
    #[arg(long)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print controllers, outputs, modes and clone lists.
    Show {
        /// Emit the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Resolve a saved profile and apply it.
    Apply {
        /// Profile name from the config file.
        profile: String,
    },
    /// Inspect or reset a controller's gamma table.
    Gamma {
        #[command(subcommand)]
        action: GammaAction,
    },
    /// Set the power-save state of every connected output.
    Power {
        #[arg(value_enum)]
        mode: PowerSaveMode,
    },
    /// Re-apply the first matching profile whenever outputs come or go.
    Watch {
        /// Polling interval in milliseconds.
        #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum GammaAction {
    /// Print the controller's gamma table.
    Get { controller: u32 },
    /// Load a linear ramp.
    Reset { controller: u32 },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load config")?;

    // Level comes from the config file unless `RUST_LOG` is set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.manager.log_level)),
        )
        .init();

    let kind = cli.backend.unwrap_or(config.manager.backend);
    let fixture = cli.fixture.or_else(|| config.manager.fixture.clone());
    let backend = open_backend(kind, &config.manager.device, fixture.as_deref())
        .context("failed to open display backend")?;
    let mut service = TopologyService::new(backend)?;

    match cli.command {
        Command::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(service.snapshot())?);
            } else {
                print_snapshot(service.snapshot());
            }
        }
        Command::Apply { profile } => {
            let profile = config
                .profile(&profile)
                .with_context(|| format!("no profile named \"{profile}\""))?;
            apply_profile(&mut service, profile)?;
        }
        Command::Gamma { action } => match action {
            GammaAction::Get { controller } => {
                let ramp = service.get_controller_gamma(controller)?;
                for (i, ((r, g), b)) in ramp.red.iter().zip(&ramp.green).zip(&ramp.blue).enumerate() {
                    println!("{i:4} {r:5} {g:5} {b:5}");
                }
            }
            GammaAction::Reset { controller } => {
                let size = service
                    .snapshot()
                    .controller_by_id(controller)
                    .map(|c| c.gamma_size as usize)
                    .with_context(|| format!("unknown controller {controller}"))?;
                service.set_controller_gamma(controller, &GammaRamp::linear(size))?;
                info!("controller {controller}: gamma reset to linear ({size} entries)");
            }
        },
        Command::Power { mode } => {
            let failed = service.set_power_save_mode(mode);
            if !failed.is_empty() {
                anyhow::bail!("power mode not applied to: {}", failed.join(", "));
            }
        }
        Command::Watch { interval_ms } => {
            watch(&mut service, &config.profiles, Duration::from_millis(interval_ms)).await?;
        }
    }

    Ok(())
}

fn apply_profile<B: DisplayBackend>(service: &mut TopologyService<B>, profile: &LayoutProfile) -> anyhow::Result<()> {
    let layout = resolve_profile(profile, service.snapshot())?;
    let size = service.apply_configuration(&layout.controllers, &layout.outputs)?;
    info!(
        "profile \"{}\" applied; screen is {}x{}",
        profile.name, size.width, size.height
    );
    Ok(())
}

fn connector_names(snapshot: &TopologySnapshot) -> BTreeSet<String> {
    snapshot.connectors().iter().map(|c| c.name.clone()).collect()
}

/// Polls the backend until Ctrl-C, re-applying a profile on every hotplug.
async fn watch<B: DisplayBackend>(
    service: &mut TopologyService<B>,
    profiles: &[LayoutProfile],
    interval: Duration,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut known = BTreeSet::new();

    info!("watching for output changes every {}ms. Press Ctrl-C to exit.", interval.as_millis());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let current = match service.read_current() {
            Ok(snapshot) => connector_names(snapshot),
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        if current == known {
            continue;
        }
        info!("connected outputs: {}", current.iter().cloned().collect::<Vec<_>>().join(", "));
        known = current;

        match profiles.iter().find(|p| profile_matches(p, service.snapshot())) {
            Some(profile) => {
                if let Err(e) = apply_profile(service, profile) {
                    error!("profile \"{}\" failed: {e:#}", profile.name);
                }
            }
            None => info!("no saved profile matches the connected outputs"),
        }
    }
}

fn print_snapshot(snapshot: &TopologySnapshot) {
    let screen = snapshot.screen_size();
    println!("screen {}x{}", screen.width, screen.height);

    println!("controllers:");
    for c in snapshot.controllers() {
        match c.mode.and_then(|id| snapshot.mode(id)) {
            Some(mode) => println!(
                "  {:<4} {}x{}@{:.2} at {},{} {:?}",
                c.id, mode.width, mode.height, mode.refresh_rate, c.rect.x, c.rect.y, c.transform
            ),
            None => println!("  {:<4} off", c.id),
        }
    }

    println!("outputs:");
    for connector in snapshot.connectors() {
        let on = connector
            .controller
            .map(|i| snapshot.controllers()[i].id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut flags = Vec::new();
        if connector.is_primary {
            flags.push("primary");
        }
        if connector.is_presentation {
            flags.push("presentation");
        }
        println!(
            "  {:<10} id {:<4} controller {:<4} {}mm x {}mm {}",
            connector.name,
            connector.id,
            on,
            connector.width_mm,
            connector.height_mm,
            flags.join(" ")
        );
        for &id in &connector.modes {
            if let Some(mode) = snapshot.mode(id) {
                let star = if connector.preferred_mode == Some(id) { "*" } else { " " };
                println!("      {star} {}x{}@{:.2}", mode.width, mode.height, mode.refresh_rate);
            }
        }
        let clones: Vec<&str> = connector
            .clones
            .iter()
            .map(|&i| snapshot.connectors()[i].name.as_str())
            .collect();
        if !clones.is_empty() {
            println!("      clones with: {}", clones.join(", "));
        }
    }

    for issue in snapshot.issues() {
        println!("note: {issue}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_show_defaults_to_text() {
        let cli = Cli::parse_from(["modeset-manager", "show"]);
        assert!(matches!(cli.command, Command::Show { json: false }));
        assert_eq!(cli.backend, None);
        assert_eq!(cli.fixture, None);
    }

    #[test]
    fn test_cli_backend_and_fixture_override() {
        // Arrange / Act
        let cli = Cli::parse_from([
            "modeset-manager",
            "--backend",
            "test",
            "--fixture",
            "desk.json",
            "show",
            "--json",
        ]);

        // Assert
        assert_eq!(cli.backend, Some(BackendKind::Test));
        assert_eq!(cli.fixture, Some(PathBuf::from("desk.json")));
        assert!(matches!(cli.command, Command::Show { json: true }));
    }

    #[test]
    fn test_cli_apply_takes_profile_name() {
        let cli = Cli::parse_from(["modeset-manager", "apply", "desk"]);
        assert!(matches!(cli.command, Command::Apply { profile } if profile == "desk"));
    }

    #[test]
    fn test_cli_gamma_reset_parses_controller() {
        let cli = Cli::parse_from(["modeset-manager", "gamma", "reset", "41"]);
        assert!(matches!(
            cli.command,
            Command::Gamma { action: GammaAction::Reset { controller: 41 } }
        ));
    }

    #[test]
    fn test_cli_power_parses_mode() {
        let cli = Cli::parse_from(["modeset-manager", "power", "standby"]);
        assert!(matches!(cli.command, Command::Power { mode: PowerSaveMode::Standby }));
    }

    #[test]
    fn test_cli_watch_interval_default_and_override() {
        let cli = Cli::parse_from(["modeset-manager", "watch"]);
        assert!(matches!(cli.command, Command::Watch { interval_ms: 2000 }));

        let cli = Cli::parse_from(["modeset-manager", "watch", "--interval-ms", "500"]);
        assert!(matches!(cli.command, Command::Watch { interval_ms: 500 }));
    }

    #[test]
    fn test_cli_rejects_unknown_power_mode() {
        assert!(Cli::try_parse_from(["modeset-manager", "power", "hibernate"]).is_err());
    }
}
