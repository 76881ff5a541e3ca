//! Logger initialization for the proxy binary.

use std::{fmt::Write, str::FromStr, sync::Once};

use jiff::{Zoned, tz::TimeZone};
use logforth::{append::Stderr, diagnostic::Diagnostic, filter::EnvFilter, layout::Layout};

static INIT: Once = Once::new();

/// Custom layout that formats timestamps in UTC.
#[derive(Debug)]
struct UtcLayout;

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Diagnostic],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();

        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let color = match record.level() {
            log::Level::Error => "\x1b[31m",
            log::Level::Warn => "\x1b[33m",
            log::Level::Info => "\x1b[32m",
            log::Level::Debug => "\x1b[34m",
            log::Level::Trace => "\x1b[35m",
        };
        write!(output, "{color}{:>5}\x1b[0m  ", record.level())?;

        write!(output, "{}", record.args())?;

        Ok(output.into_bytes())
    }
}

/// Initialize the stderr logger. The filter uses `env_logger` syntax, e.g.
/// `info` or `llm=debug,info`.
pub fn init(log_filter: &str) {
    INIT.call_once(|| {
        logforth::builder()
            .dispatch(|dispatch| {
                let filter = EnvFilter::from_str(log_filter).unwrap_or_else(|_| {
                    EnvFilter::from_str("info").expect("default filter should be valid")
                });

                dispatch
                    .filter(filter)
                    .append(Stderr::default().with_layout(UtcLayout))
            })
            .apply();
    });
}
