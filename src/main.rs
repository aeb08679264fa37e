#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # tunnelctl
//!
//! Start, stop and switch SSH port-forwards and a managed SOCKS proxy that
//! run as detached tmux sessions and outlive the command that started them.
//!
//! ## Subcommands
//!
//! | Command                               | Description                              |
//! |---------------------------------------|------------------------------------------|
//! | `tunnels list`                        | Active tunnels (stale records pruned)    |
//! | `tunnels create HOST LOCAL REMOTE`    | Forward `localhost:LOCAL` to `HOST:REMOTE` |
//! | `tunnels kill NAME`                   | Stop a tunnel and forget it              |
//! | `tunnels recent`                      | Recently launched tunnel parameters      |
//! | `tunnels relaunch INDEX`              | Relaunch entry INDEX (1-based) of recent |
//! | `proxy status`                        | Managed proxy state                      |
//! | `proxy enable [CONFIG]`               | Start or switch the proxy config         |
//! | `proxy disable`                       | System proxy off, then stop the proxy    |
//! | `proxy configs`                       | Available proxy configs                  |
//! | `proxy show CONFIG`                   | Config details and file contents         |
//! | `proxy remove CONFIG`                 | Delete a config that is not running      |
//! | `hosts`                               | Host aliases from `~/.ssh/config`        |
//!
//! `--json` prints machine-readable output instead of text.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use tunnelctl::proxy::catalog::ConfigItem;
use tunnelctl::{AppState, Config, EnableOutcome, ProxyState, TunnelError};

/// tmux-backed SSH tunnels and SOCKS proxy manager.
#[derive(Parser)]
#[command(name = "tunnelctl", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,
    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// SSH port-forwards.
    Tunnels {
        #[command(subcommand)]
        command: TunnelCommands,
    },
    /// Managed SOCKS proxy.
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },
    /// List host aliases from the SSH client config.
    Hosts,
}

#[derive(Subcommand)]
enum TunnelCommands {
    /// Active tunnels.
    List,
    /// Start a forward from localhost:LOCAL to HOST:REMOTE.
    Create {
        host: String,
        local: u16,
        remote: u16,
    },
    /// Stop a tunnel by session name.
    Kill { name: String },
    /// Recently launched tunnels.
    Recent,
    /// Relaunch a recent tunnel by its 1-based position.
    Relaunch { index: usize },
}

#[derive(Subcommand)]
enum ProxyCommands {
    /// Current proxy state.
    Status,
    /// Start (or switch to) CONFIG, or the default config.
    Enable { config: Option<String> },
    /// Turn the system proxy off and stop the proxy session.
    Disable,
    /// Available proxy configs.
    Configs,
    /// Details and contents of CONFIG.
    Show { config: String },
    /// Delete CONFIG from the config directory.
    Remove { config: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();
    debug!("tunnelctl v{} starting", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(config);
    let json = cli.json;
    match run(&state, cli.command, json).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("{e}");
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "error": e.category(),
                        "message": e.user_message(),
                        "detail": e.to_string(),
                    })
                );
            } else {
                eprintln!("{}", e.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(state: &AppState, command: Commands, json: bool) -> Result<(), TunnelError> {
    match command {
        Commands::Tunnels { command } => run_tunnels(state, command, json).await,
        Commands::Proxy { command } => run_proxy(state, command, json).await,
        Commands::Hosts => {
            let hosts = state.ssh_hosts();
            if json {
                return print_json(&hosts);
            }
            if hosts.is_empty() {
                println!("No hosts found (all entries may be commented out or wildcards)");
            }
            for h in hosts {
                match h.host_name {
                    Some(name) => println!("{}\t{name}", h.alias),
                    None => println!("{}", h.alias),
                }
            }
            Ok(())
        }
    }
}

async fn run_tunnels(state: &AppState, command: TunnelCommands, json: bool) -> Result<(), TunnelError> {
    let registry = &state.registry;
    match command {
        TunnelCommands::List => {
            let tunnels = registry.reconcile().await?;
            if json {
                return print_json(&tunnels);
            }
            if tunnels.is_empty() {
                println!("No active tunnels");
            }
            for t in tunnels {
                println!(
                    "{}\tlocalhost:{} -> {}:{}",
                    t.session_name, t.local_port, t.host, t.remote_port
                );
            }
        }
        TunnelCommands::Create {
            host,
            local,
            remote,
        } => {
            let tunnel = registry.create(&host, local, remote).await?;
            if json {
                return print_json(&tunnel);
            }
            println!(
                "Tunnel {} started: localhost:{local} -> {host}:{remote}",
                tunnel.session_name
            );
        }
        TunnelCommands::Kill { name } => {
            let report = registry.kill(&name).await?;
            if let Some(warning) = &report.warning {
                eprintln!("{}", warning.user_message());
            }
            if json {
                return print_json(&report.tunnels);
            }
            println!("Tunnel {name} removed");
        }
        TunnelCommands::Recent => {
            let recent = registry.recent().await?;
            if json {
                return print_json(&recent);
            }
            if recent.is_empty() {
                println!("No recent tunnels");
            }
            for (i, r) in recent.iter().enumerate() {
                println!(
                    "{}\t{} localhost:{} -> {}",
                    i + 1,
                    r.host,
                    r.local_port,
                    r.remote_port
                );
            }
        }
        TunnelCommands::Relaunch { index } => {
            let recent = registry.recent().await?;
            let entry = index
                .checked_sub(1)
                .and_then(|i| recent.get(i))
                .ok_or_else(|| {
                    TunnelError::InvalidRequest(format!(
                        "No recent tunnel #{index} ({} remembered)",
                        recent.len()
                    ))
                })?;
            let tunnel = registry.relaunch(entry).await?;
            if json {
                return print_json(&tunnel);
            }
            println!(
                "Tunnel {} started: localhost:{} -> {}:{}",
                tunnel.session_name, tunnel.local_port, tunnel.host, tunnel.remote_port
            );
        }
    }
    Ok(())
}

async fn run_proxy(state: &AppState, command: ProxyCommands, json: bool) -> Result<(), TunnelError> {
    let proxy = &state.proxy;
    match command {
        ProxyCommands::Status => {
            let current = proxy.refresh().await;
            if json {
                return print_json(&current);
            }
            match current {
                ProxyState::On(config) => println!(
                    "Proxy on: {config} ({}:{})",
                    state.config.proxy.socks_host, state.config.proxy.socks_port
                ),
                ProxyState::Off | ProxyState::Unknown => println!("Proxy off"),
            }
        }
        ProxyCommands::Enable { config } => {
            let outcome = proxy.enable(config.as_deref()).await?;
            let (config, already) = match outcome {
                EnableOutcome::AlreadyActive(c) => (c, true),
                EnableOutcome::Started(c) => (c, false),
            };
            if json {
                return print_json(&serde_json::json!({
                    "config": config,
                    "alreadyActive": already,
                }));
            }
            if already {
                println!("Proxy already running with {config}");
            } else {
                println!("Proxy on: {config}");
            }
        }
        ProxyCommands::Disable => {
            let sweep = proxy.disable().await?;
            for failure in &sweep.failures {
                eprintln!("{}", failure.user_message());
            }
            if json {
                return print_json(&sweep.killed);
            }
            println!("Proxy off");
        }
        ProxyCommands::Configs => {
            let configs = proxy.configs().await;
            if json {
                return print_json(&configs);
            }
            for c in &configs {
                println!("{}", describe_config(c));
            }
        }
        ProxyCommands::Show { config } => {
            let detail = proxy.show(&config).await?;
            if json {
                return print_json(&detail);
            }
            println!("{}", describe_config(&detail.item));
            println!("{}", detail.item.path.display());
            print!("{}", detail.contents);
            if !detail.contents.ends_with('\n') {
                println!();
            }
        }
        ProxyCommands::Remove { config } => {
            proxy.remove(&config).await?;
            if json {
                return print_json(&serde_json::json!({ "removed": config }));
            }
            println!("Removed {config}");
        }
    }
    Ok(())
}

fn describe_config(c: &ConfigItem) -> String {
    let mut line = c.name.clone();
    if c.is_default {
        line.push_str(" (default)");
    }
    match c.size {
        Some(size) if c.exists => line.push_str(&format!("\t{size} bytes")),
        _ => line.push_str("\tmissing"),
    }
    line
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), TunnelError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| TunnelError::Storage(format!("serialize output: {e}")))?;
    println!("{out}");
    Ok(())
}
