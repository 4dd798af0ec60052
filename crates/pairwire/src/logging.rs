use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Overrides `--log-level` with a full filter directive, e.g.
/// `PAIRWIRE_LOG=pairwire_peer=trace,info`.
pub const LOG_ENV: &str = "PAIRWIRE_LOG";

/// Crates whose events follow `--log-level`. Everything else stays at warn.
const PAIRWIRE_TARGETS: [&str; 5] = [
    "pairwire",
    "pairwire_transport",
    "pairwire_frame",
    "pairwire_peer",
    "pairwire_router",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Default directive: `warn` globally, `level` for the pairwire crates.
pub fn default_directive(level: LogLevel) -> String {
    let level = level.as_str();
    let mut directive = String::from("warn");
    for target in PAIRWIRE_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

fn build_filter(env_override: Option<&str>, level: LogLevel) -> EnvFilter {
    if let Some(directive) = env_override {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring {LOG_ENV}={directive}: {err}"),
        }
    }
    EnvFilter::new(default_directive(level))
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env_override = std::env::var(LOG_ENV).ok();
    let filter = build_filter(env_override.as_deref(), level);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_scopes_level_to_pairwire_crates() {
        assert_eq!(
            default_directive(LogLevel::Debug),
            "warn,pairwire=debug,pairwire_transport=debug,pairwire_frame=debug,\
             pairwire_peer=debug,pairwire_router=debug"
        );
    }

    #[test]
    fn env_override_wins_and_bad_directive_falls_back() {
        let filter = build_filter(Some("pairwire_peer=trace"), LogLevel::Error);
        assert_eq!(filter.to_string(), "pairwire_peer=trace");

        let fallback = build_filter(Some("pairwire=[bad"), LogLevel::Info);
        assert!(fallback.to_string().contains("pairwire_router=info"));
    }
}
