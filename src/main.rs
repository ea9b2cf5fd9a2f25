use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use zonexfrd::config::Config;
use zonexfrd::difflog::FileDiffLog;
use zonexfrd::ipc;
use zonexfrd::log::Logger;
use zonexfrd::statefile;
use zonexfrd::zone::{Registry, Zone};
use zonexfrd::Coordinator;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "zonexfrd", version, about = "Secondary DNS zone-transfer coordinator")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Utf8PathBuf,

    /// Parse and validate the configuration, then exit.
    #[arg(long)]
    check_config: bool,
}

/// Seed zones that came with an `initial-soa` in configuration and weren't
/// already hydrated from the state file: both `soa_nsd` and `soa_disk` start
/// from it with `acquired = now`, and the zone is armed to refresh right
/// away, since data this old may itself be stale.
fn seed_initial_soas(config: &Config, registry: &Registry) {
    use zonexfrd::soa::TimedSoa;

    let now = zonexfrd::util::now_secs();
    for zone_config in &config.zones {
        let Some(initial_soa) = &zone_config.initial_soa else {
            continue;
        };
        let Some(zone) = registry.get(&zone_config.name) else {
            continue;
        };
        let mut state = zone.state.lock().unwrap();
        if state.soa_disk.is_acquired() {
            continue;
        }
        let snapshot = initial_soa.to_snapshot();
        state.soa_nsd = TimedSoa { acquired: now, soa: snapshot.clone() };
        state.soa_disk = TimedSoa { acquired: now, soa: snapshot };
        zonexfrd::retry::schedule_refresh_now(&mut state, now);
        info!(zone = %zone.apex_str, "seeded initial SOA from configuration");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("couldn't load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check_config {
        return ExitCode::SUCCESS;
    }

    let logger = match Logger::launch(&config.logging) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("couldn't start logging: {err}");
            return ExitCode::FAILURE;
        }
    };
    let _ = logger;

    let mut registry = Registry::new();
    for zone in &config.zones {
        registry.insert(Arc::new(Zone::new(zone.name.clone(), zone.masters.clone())));
    }
    if registry.is_empty() {
        warn!("no zones configured; the coordinator has nothing to keep current");
    }

    match statefile::read(&config.state_file) {
        Ok((state, statefile::ReadOutcome::Clean)) => {
            info!("loaded state file {}", config.state_file);
            statefile::apply_to_registry(&state, &registry);
        }
        Ok((state, statefile::ReadOutcome::Corrupt)) => {
            warn!(
                "state file {} was corrupt; applying what could be salvaged",
                config.state_file
            );
            statefile::apply_to_registry(&state, &registry);
        }
        Err(err) if err.is_not_found() => {
            info!("no state file found at {}; starting cold", config.state_file);
        }
        Err(err) => {
            error!("couldn't read state file {}: {err}", config.state_file);
            return ExitCode::FAILURE;
        }
    }

    seed_initial_soas(&config, &registry);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("couldn't start Tokio: {err}");
            return ExitCode::FAILURE;
        }
    };

    let diff_log: Arc<dyn zonexfrd::difflog::DiffLog> =
        Arc::new(FileDiffLog::new(config.diff_log.clone()));
    let coordinator = Coordinator::new(
        registry,
        config.tcp.max_connections,
        config.tcp.timeout,
        diff_log,
    );

    let result = runtime.block_on(async {
        let channel = match ipc::Channel::open(&config.ipc).await {
            Ok(channel) => channel,
            Err(err) => {
                error!("couldn't open parent IPC channel: {err}");
                return ExitCode::FAILURE;
            }
        };

        coordinator.run(channel).await;
        ExitCode::SUCCESS
    });

    if let Err(err) = statefile::write(&config.state_file, &coordinator.registry) {
        error!("couldn't persist state file {}: {err}", config.state_file);
        return ExitCode::FAILURE;
    }

    result
}
