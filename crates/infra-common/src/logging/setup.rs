use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, TestWriter};
use tracing_subscriber::EnvFilter;

use crate::errors::types::{Error, Result};

/// Subscriber settings for the bridge and fork services
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level for every target
    pub level: Level,
    /// Per-target overrides such as `sipfork_fork_context=trace` or `sqlx=warn`
    pub directives: Vec<String>,
    pub json: bool,
    pub file_info: bool,
    /// Log span open/close; provider and fork spans carry the call-id
    pub log_spans: bool,
    /// Write through the test harness so output is captured per test
    pub test_writer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            // sqlx logs every statement at info
            directives: vec!["sqlx=warn".to_string()],
            json: false,
            file_info: false,
            log_spans: false,
            test_writer: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    /// Output captured by `cargo test`, spans included
    pub fn for_tests(level: Level) -> Self {
        LoggingConfig {
            level,
            log_spans: true,
            test_writer: true,
            ..Default::default()
        }
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env_lossy();
        for directive in &self.directives {
            let parsed: Directive = directive
                .parse()
                .map_err(|e| Error::Config(format!("invalid log directive '{}': {}", directive, e)))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` is read first and the configured directives go on top. Fails
/// on a malformed directive or when a subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.filter()?;
    let span_events = if config.log_spans { FmtSpan::NEW | FmtSpan::CLOSE } else { FmtSpan::NONE };
    let writer = if config.test_writer {
        BoxMakeWriter::new(TestWriter::new())
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_writer(writer);

    let installed = if config.json { subscriber.json().try_init() } else { subscriber.try_init() };
    installed.map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))
}
