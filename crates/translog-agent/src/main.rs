// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use translog::config::{parse_log_level, Config};
use translog::parser::EventParser;
use translog::pid_file::PidFile;
use translog::pipeline::{build_sinks, Pipeline};

enum Signal {
    Shutdown(&'static str),
    Reload,
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Shutdown("SIGINT"),
            _ = self.terminate.recv() => Signal::Shutdown("SIGTERM"),
            _ = self.hangup.recv() => Signal::Reload,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {e}");
            return std::future::pending().await;
        }
        Signal::Shutdown("Ctrl+C")
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::new() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);
    info!("Starting translog");

    let Some(input) = config.input_file.clone() else {
        error!("TRANSLOG_INPUT_FILE is not set, nothing to tail");
        return ExitCode::FAILURE;
    };

    let pid_file = match PidFile::create(&config.pid_file, config.pid_overwrite) {
        Ok(pid_file) => Some(pid_file),
        Err(e) => {
            warn!("Unable to create PID file {}: {e}", config.pid_file.display());
            None
        }
    };

    let code = run(input, &config).await;

    if let Some(pid_file) = pid_file {
        pid_file.remove();
    }
    info!("Exiting translog");
    code
}

async fn run(input: std::path::PathBuf, config: &Config) -> ExitCode {
    let parser = match EventParser::new(&config.parse) {
        Ok(parser) => Arc::new(parser),
        Err(e) => {
            error!("Invalid parse pattern: {e}");
            return ExitCode::FAILURE;
        }
    };
    let sinks = match build_sinks(config).await {
        Ok(sinks) => sinks,
        Err(e) => {
            error!("Unable to create {} sink: {e}", config.sink);
            return ExitCode::FAILURE;
        }
    };
    let mut signals = match Signals::new() {
        Ok(signals) => signals,
        Err(e) => {
            error!("Unable to listen for signals: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut pipeline = Pipeline::start(input, config, parser, sinks);
    eprintln!(
        "Logging at {}. Send SIGINT or SIGTERM to {} to stop.",
        config.log_level,
        std::process::id()
    );

    let mut code = ExitCode::SUCCESS;
    loop {
        tokio::select! {
            signal = signals.next() => match signal {
                Signal::Shutdown(name) => {
                    info!("Stopping: caught {name}");
                    break;
                }
                Signal::Reload => reload_pattern(&pipeline, config),
            },
            result = pipeline.tailer_exit() => {
                if let Err(e) = result {
                    error!("Tailer failed: {e}");
                    code = ExitCode::FAILURE;
                }
                break;
            }
        }
    }

    pipeline.shutdown().await;
    code
}

fn reload_pattern(pipeline: &Pipeline, config: &Config) {
    let pattern = match config.parse.current_pattern() {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Unable to reload parse pattern: {e}");
            return;
        }
    };
    match pipeline.parser().reload(&pattern) {
        Ok(true) => info!("Reloaded parse pattern {pattern}"),
        Ok(false) => debug!("Parse pattern unchanged"),
        // already logged by the parser
        Err(_) => {}
    }
}

fn init_logging(config: &Config) {
    let (level, invalid_level) = match parse_log_level(&config.log_level) {
        Ok(level) => (level, None),
        Err(e) => (LevelFilter::DEBUG, Some(e)),
    };
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{level}");
    let filter =
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let mut log_file_error = None;
    let (writer, ansi) = match &config.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
            Err(e) => {
                log_file_error = Some(format!(
                    "Unable to open log file {}, using stderr: {e}",
                    path.display()
                ));
                (BoxMakeWriter::new(std::io::stderr), true)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting the default subscriber failed: {e}");
        return;
    }
    debug!("Logging subsystem enabled");

    if let Some(e) = invalid_level {
        warn!("{e}; logging at DEBUG");
    }
    if let Some(message) = log_file_error {
        warn!("{message}");
    }
}
