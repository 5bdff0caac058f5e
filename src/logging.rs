use crate::config::DiagnosticFormat;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILTER_ENV_VAR: &str = "SMS_PROXY_LOG";
const DEFAULT_FILTER: &str = "sms_gateway_proxy=info";

pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
    pub diag_format: DiagnosticFormat,
}

impl LoggingConfig {
    /// Install the global tracing subscriber. May be called only once per
    /// process; panics (via `tracing_subscriber`) if called again.
    pub fn init(&self) -> anyhow::Result<()> {
        let (non_blocking, _guard);
        let log_writer = if let Some(log_dir) = &self.log_dir {
            let file_appender = tracing_appender::rolling::hourly(log_dir, "log");
            (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
            // Leak the guard: it must outlive the process for buffered
            // writes to flush, and this is only ever constructed once at
            // startup.
            Box::leak(Box::new(_guard));
            BoxMakeWriter::new(non_blocking)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        };

        let layer = fmt::layer().with_thread_names(true).with_writer(log_writer);
        let layer = match self.diag_format {
            DiagnosticFormat::Pretty => layer.pretty().boxed(),
            DiagnosticFormat::Full => layer.boxed(),
            DiagnosticFormat::Compact => layer.compact().boxed(),
            DiagnosticFormat::Json => layer.json().boxed(),
        };

        let env_filter = EnvFilter::try_new(
            std::env::var(LOG_FILTER_ENV_VAR)
                .as_deref()
                .unwrap_or(DEFAULT_FILTER),
        )?;

        tracing_subscriber::registry().with(layer).with(env_filter).init();

        Ok(())
    }
}
