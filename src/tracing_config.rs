//! Tracing subscriber setup for the command-line front end
//!
//! The library only emits events and spans; installing a subscriber is left
//! to the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Where and how log lines are written (always stderr)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Compact, colored lines for terminals
    #[default]
    Console,
    /// One JSON object per event, with span context
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Subscriber settings derived from the command line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConfig {
    /// Number of `-v` flags
    pub verbosity: u8,
    pub format: TracingFormat,
}

impl TracingConfig {
    #[must_use]
    pub fn new(verbosity: u8, format: TracingFormat) -> Self {
        Self { verbosity, format }
    }

    /// Default filter for the verbosity: this crate one level chattier than
    /// its dependencies
    #[must_use]
    pub fn default_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,bg_refine=info",
            1 => "info,bg_refine=debug",
            _ => "debug,bg_refine=trace",
        }
    }

    /// Install the global subscriber; `RUST_LOG` overrides the verbosity
    pub fn init(self) -> anyhow::Result<()> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(from_env) => from_env,
            Err(_) => EnvFilter::try_new(self.default_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .compact(),
                )
                .try_init()?,
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_list(true),
                )
                .try_init()?,
        }
        Ok(())
    }
}

/// Install the CLI subscriber for `-v` count and `--json-logs`
pub fn init_cli_tracing(verbosity: u8, json: bool) -> anyhow::Result<()> {
    #[cfg(feature = "tracing-json")]
    let format = if json {
        TracingFormat::Json
    } else {
        TracingFormat::Console
    };
    #[cfg(not(feature = "tracing-json"))]
    let format = {
        if json {
            eprintln!("JSON logs need the 'tracing-json' feature; using console output");
        }
        TracingFormat::Console
    };

    TracingConfig::new(verbosity, format).init()
}
