//! # devvm
//!
//! Command-line front end for a local development VM. Each invocation runs
//! one lifecycle operation against the machine named by `--profile`.
//!
//! ## Usage
//! ```bash
//! devvm start --vm-driver kvm2 --memory 4096
//! eval $(devvm docker-env)
//! devvm mount /devvm-host --port 5640
//! devvm stop
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use devvm_common::{init_logging, init_logging_json};
use devvm_driver::{DriverKind, DriverRegistry, MockDriverFactory, MockHypervisor};
use devvm_host::{
    exit_with, ExitCode, HostError, HostManager, HostServices, HostSettings, MountOptions,
};
use tracing::{debug, error, info, warn};

mod cli;
mod config;
mod console;
mod retry;

use cli::{Args, Command};
use config::{devvm_home, Config, CONFIG_FILE};
use console::ConsoleReporter;
use retry::RetryPolicy;

/// File holding simulated VM state in development mode.
const MOCK_STATE_FILE: &str = "mock-driver.json";

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { ExitCode::Usage } else { ExitCode::Success };
            let _ = e.print();
            std::process::exit(code.code());
        }
    };

    let logging = if args.log_json {
        init_logging_json(&args.log_level)
    } else {
        init_logging(&args.log_level)
    };
    if let Err(e) = logging {
        exit_with(ExitCode::Failure, e.to_string());
    }

    if let Err(e) = run(args).await {
        let code = e
            .downcast_ref::<HostError>()
            .map(ExitCode::for_error)
            .unwrap_or(ExitCode::Failure);
        error!(error = %e, code = code.code(), "Command failed");
        exit_with(code, format!("{:#}", e));
    }
}

async fn run(args: Args) -> Result<()> {
    let home = devvm_home()?;
    let config = load_config(&args, &home)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        profile = %config.profile,
        home = %home.display(),
        "devvm configured"
    );

    let registry = Arc::new(build_registry(config.dev, &home)?);
    debug!(drivers = ?registry.kinds(), "Driver registry ready");

    let settings = HostSettings {
        machine_name: config.profile.clone(),
        home_dir: home.clone(),
        show_driver_deprecation_notification: config.show_driver_deprecation_notification,
    };
    let services = HostServices::system(&home, registry, Arc::new(ConsoleReporter));
    let manager = HostManager::new(settings, services);

    match args.command {
        Command::Start(_) => {
            let manager = &manager;
            let machine_config = &config.machine;
            let machine = RetryPolicy::START
                .run(move || manager.start_host(machine_config))
                .await?;
            println!(
                "🏄 Done! {:?} is running on the {} driver",
                machine.name(),
                machine.kind()
            );
        }
        Command::Stop => {
            let manager = &manager;
            RetryPolicy::STOP.run(move || manager.stop_host()).await?;
            println!("🛑 {:?} stopped.", manager.machine_name());
        }
        Command::Delete => {
            manager.delete_host().await?;
            println!("💀 Removed all traces of {:?}.", manager.machine_name());
        }
        Command::Status => {
            println!("host: {}", manager.get_host_status().await?);
        }
        Command::Ssh { args } => {
            manager.ensure_running_or_exit(ExitCode::Unavailable).await;
            manager.create_ssh_shell(&args).await?;
        }
        Command::Mount(mount) => {
            manager.ensure_running_or_exit(ExitCode::Unavailable).await;
            let options = MountOptions {
                path: mount.path,
                port: mount.port,
                version: mount.protocol_version,
                uid: mount.uid,
                gid: mount.gid,
                msize: mount.msize,
            };
            manager.mount_host(mount.ip, &options).await?;
            println!("📁 Mounted at {}", options.path);
        }
        Command::Ip => {
            manager.ensure_running_or_exit(ExitCode::Unavailable).await;
            println!("{}", manager.get_host_driver_ip().await?);
        }
        Command::DockerEnv => {
            manager.ensure_running_or_exit(ExitCode::Unavailable).await;
            for (key, value) in manager.get_host_docker_env().await? {
                println!("export {}=\"{}\"", key, value);
            }
            println!("# Run this command to configure your shell:");
            println!("# eval $(devvm docker-env)");
        }
    }

    Ok(())
}

/// Load the config file, falling back to CLI arguments and defaults.
fn load_config(args: &Args, home: &Path) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        info!(config_path = %config_path, "Configuration loaded");
        return Ok(config.with_cli_overrides(args));
    }

    let default_path = home.join(CONFIG_FILE);
    if default_path.exists() {
        let config = Config::load(&default_path)?;
        info!(config_path = %default_path.display(), "Configuration loaded from default location");
        Ok(config.with_cli_overrides(args))
    } else {
        debug!("No config file found, using CLI arguments and defaults");
        Ok(Config::default_with_cli(args))
    }
}

/// Registry with the built-in drivers, plus simulated hypervisors in dev mode.
fn build_registry(dev: bool, home: &Path) -> Result<DriverRegistry> {
    let mut registry = DriverRegistry::with_builtin();

    if dev {
        warn!("Development mode: VM drivers are simulated");
        let backend = Arc::new(MockHypervisor::with_state_file(home.join(MOCK_STATE_FILE))?);
        for kind in DriverKind::ALL.into_iter().filter(|kind| !kind.is_none()) {
            registry.register(Arc::new(MockDriverFactory::new(kind, backend.clone())));
        }
    }

    Ok(registry)
}
