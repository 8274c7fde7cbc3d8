//! Tracing subscriber setup.

use tracing::debug;

/// Verbosity chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            _ => Verbosity::Normal,
        }
    }

    fn level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Install the global subscriber. Logs go to stderr; stdout is kept for reports.
///
/// `RUST_LOG` wins, then `LOG_LEVEL`, then the command-line verbosity.
/// Calling this twice is harmless (the second install is ignored).
pub fn init(verbosity: Verbosity) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbosity {
        Verbosity::Normal => std::env::var("LOG_LEVEL")
            .map(|l| l.to_lowercase())
            .unwrap_or_else(|_| verbosity.level().to_string()),
        other => other.level().to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("faen_cde={level}")));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init();

    if installed.is_ok() {
        debug!(level = %level, "logging initialized");
    }
}
