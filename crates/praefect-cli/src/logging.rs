//! Logging setup shared by the `praefect` binary's subcommands.

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// The log verbosity. Can be one of trace|debug|info|warn|error|off
    #[arg(
        long = "log.level",
        default_value_t = LogLevel::Info,
        group = "logging",
        ignore_case = true,
        value_enum,
        global = true
    )]
    pub level: LogLevel,

    #[arg(long = "log.format", value_enum, global = true, group = "logging")]
    pub format: Option<LogFormat>,
}

#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The format for logs. A running proxy is typically scraped by a log
/// collector rather than read by a human, so JSON is the default
/// outside of interactive terminals.
#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    Json,
    Text,
    Color,
}

fn default_log_format() -> LogFormat {
    if atty::is(atty::Stream::Stderr) {
        LogFormat::Color
    } else {
        LogFormat::Json
    }
}

/// Initializes the global tracing subscriber. Panics if called twice.
pub fn init_logging(args: &LogArgs) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(args.level.to_string())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match args.format.unwrap_or_else(default_log_format) {
        LogFormat::Json => {
            builder.json().flatten_event(true).with_current_span(true).with_span_list(false).init();
        }
        LogFormat::Text => {
            builder.compact().with_ansi(false).init();
        }
        LogFormat::Color => {
            builder.compact().with_ansi(true).init();
        }
    }
}
