//! Tracing subscriber set-up. Logs go to stderr so the transcript on stdout
//! stays readable.

use shared::config::{Config, LogFormat};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt};

pub fn initialize_tracing(config: &Config) {
    let env_filter = build_env_filter(&config.log_level);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    // A subscriber may already be installed when commands run in-process.
    let _ = if matches!(config.log_format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
}

fn build_env_filter(level: &str) -> EnvFilter {
    let default_level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}
