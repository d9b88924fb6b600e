use calib_frames::core::MonotonicClock;
use calib_frames::protocol::Output;
use calib_frames::{
    CalibrationService, ConfigError, ConfigIoError, JsonLinesWriter, StartupConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "calib-frames", version, about = "Calibration target frame broadcaster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a startup config and print the resolved mounting offset.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Read detections and registry requests from stdin as JSON lines and
    /// broadcast transforms to stdout until EOF.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_enum, default_value_t = LogLevel::Info)]
        log_level: LogLevel,
        /// Emit structured JSON logs. Only honoured with the `tracing` feature.
        #[arg(long)]
        json_logs: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] ConfigIoError),
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to install logger: {0}")]
    Logger(log::SetLoggerError),
    #[error(transparent)]
    Sink(#[from] calib_frames::registry::SinkError),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::ConfigIo(_) | CliError::Config(_) => 2,
            _ => 1,
        }
    }
}

fn init_logging(level: LogLevel, json_logs: bool) -> Result<(), CliError> {
    #[cfg(feature = "tracing")]
    {
        // The subscriber reads its filter from RUST_LOG.
        let _ = level;
        calib_frames::core::init_tracing(json_logs);
    }
    #[cfg(not(feature = "tracing"))]
    {
        calib_frames::core::init_with_level(level.into()).map_err(CliError::Logger)?;
        if json_logs {
            log::warn!("--json-logs needs the `tracing` feature; using plain logs");
        }
    }
    Ok(())
}

fn validate(config: PathBuf) -> Result<(), CliError> {
    let validated = StartupConfig::load_json(&config)?.validate()?;
    let offset = validated.offset.offset().clone();
    // Also checks static transforms against the reserved edges.
    CalibrationService::new(validated, Arc::new(MonotonicClock::new()))?;
    println!("{}", serde_json::to_string_pretty(&offset)?);
    Ok(())
}

fn run(config: PathBuf) -> Result<(), CliError> {
    let validated = StartupConfig::load_json(&config)?.validate()?;
    let service = CalibrationService::new(validated, Arc::new(MonotonicClock::new()))?;
    let out = JsonLinesWriter::new(io::stdout());
    let broadcaster = service.start_broadcast(out.clone())?;

    // Lines are raw bytes; invalid UTF-8 gets an invalid_request reply.
    let mut stdin = io::stdin().lock();
    let mut line = Vec::new();
    loop {
        line.clear();
        if stdin.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.trim_ascii().is_empty() {
            continue;
        }
        if let Some(response) = service.handle_line(&line) {
            out.write(&Output::Response(&response))?;
        }
    }

    let stats = broadcaster.shutdown();
    let intake = service.listener_stats();
    info!(
        "shutdown: {} ticks, {} published, {} dropped, {} sink errors; {} detections accepted, {} rejected",
        stats.ticks,
        stats.published,
        stats.dropped,
        stats.sink_errors,
        intake.accepted,
        intake.rejected()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Validate { config } => validate(config),
        Command::Run {
            config,
            log_level,
            json_logs,
        } => init_logging(log_level, json_logs).and_then(|()| run(config)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
