//! Logging for the coordinator.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogTarget, LoggingConfig};

//----------- Logger -----------------------------------------------------------

/// A handle onto the process-global logger.
///
/// Reconfiguring the filter at runtime (e.g. on a config-reload signal) is
/// out of scope here — signal handling is a low-level primitive this crate
/// treats as an external collaborator — so this is just a marker that
/// [`Logger::launch`] has run, kept around for callers that want to assert
/// logging was initialized.
pub struct Logger {
    _private: (),
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    /// Launch the global logger according to `config`.
    ///
    /// # Panics
    ///
    /// Panics if a global [`tracing`] subscriber has already been set.
    pub fn launch(config: &LoggingConfig) -> Result<&'static Logger, String> {
        let filter = make_env_filter(config)?;

        match &config.target {
            LogTarget::File { path } => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|err| format!("could not open log file {path}: {err}"))?;
                let layer = FmtLayer::new().with_ansi(false).with_writer(file);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .init();
            }
            LogTarget::Stdout => {
                let layer = FmtLayer::new()
                    .with_ansi(supports_color::on(supports_color::Stream::Stdout).is_some())
                    .with_writer(std::io::stdout);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .init();
            }
            LogTarget::Stderr => {
                let layer = FmtLayer::new()
                    .with_ansi(supports_color::on(supports_color::Stream::Stderr).is_some())
                    .with_writer(std::io::stderr);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .init();
            }
        }

        Ok(Box::leak(Box::new(Self { _private: () })))
    }
}

/// Build an [`EnvFilter`], honoring `RUST_LOG` as an override of the
/// configured level.
fn make_env_filter(config: &LoggingConfig) -> Result<EnvFilter, String> {
    if let Ok(from_env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        return from_env
            .parse()
            .map_err(|err| format!("invalid {}: {err}", EnvFilter::DEFAULT_ENV));
    }

    let mut filter = EnvFilter::default();
    filter = filter.add_directive(LevelFilter::from(config.level).into());
    Ok(filter)
}
