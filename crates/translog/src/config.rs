// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process configuration, read once at startup from `TRANSLOG_*` environment
//! variables and handed to each component.

use crate::channel::FullQueuePolicy;
use crate::errors::ConfigError;
use crate::parser::DEFAULT_PARSE_PATTERN;
use crate::sink::elasticsearch::FailurePolicy;
use derive_more::Display;
use std::env;
use std::fmt::Display as FmtDisplay;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

const DEFAULT_ES_HOST: &str = "localhost";
const DEFAULT_ES_PORT: u16 = 9200;
const DEFAULT_ES_SCHEME: &str = "http";
const DEFAULT_ES_MAX: usize = 500;
const DEFAULT_ES_INDEX: &str = "analytics";
const DEFAULT_ES_DOCUMENT_TYPE: &str = "event";
const DEFAULT_ES_REPORT_EVERY: u64 = 10_000;
const DEFAULT_TAIL_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_FILE_OUTPUT: &str = "output.jsonl";
const DEFAULT_PID_FILE: &str = "/var/translog.pid";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Which sink consumes the parsed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SinkKind {
    #[display("elastic")]
    Elastic,
    #[display("stdout")]
    Stdout,
    #[display("file")]
    File,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elastic" | "elasticsearch" => Ok(SinkKind::Elastic),
            "stdout" => Ok(SinkKind::Stdout),
            "file" => Ok(SinkKind::File),
            other => Err(format!("unknown sink {other}, expected elastic, stdout or file")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseConfig {
    pub pattern: String,
    /// When set, the pattern is read from this file, and re-read on reload.
    pub pattern_file: Option<PathBuf>,
    pub keys_to_ignore: Vec<String>,
    /// chrono format strings tried before the built-in timestamp layouts
    pub time_patterns: Vec<String>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PARSE_PATTERN.to_string(),
            pattern_file: None,
            keys_to_ignore: Vec::new(),
            time_patterns: Vec::new(),
        }
    }
}

impl ParseConfig {
    /// Returns the pattern from `pattern_file` if configured, the inline
    /// pattern otherwise.
    pub fn current_pattern(&self) -> Result<String, ConfigError> {
        match &self.pattern_file {
            Some(path) => read_pattern_file(path),
            None => Ok(self.pattern.clone()),
        }
    }
}

fn read_pattern_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|contents| contents.trim_end_matches(['\r', '\n']).to_string())
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    pub from_beginning: bool,
    /// Follow the path across rotation (`tail -F`)
    pub reopen: bool,
    pub poll_interval: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            from_beginning: false,
            reopen: false,
            poll_interval: Duration::from_millis(DEFAULT_TAIL_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticsearchConfig {
    pub hosts: Vec<String>,
    pub port: u16,
    pub scheme: String,
    /// events per bulk request
    pub max: usize,
    pub index: String,
    pub document_type: String,
    /// items between throughput reports, 0 disables periodic reports
    pub report_every: u64,
    pub mocking: bool,
    pub use_date_suffix: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_ES_HOST.to_string()],
            port: DEFAULT_ES_PORT,
            scheme: DEFAULT_ES_SCHEME.to_string(),
            max: DEFAULT_ES_MAX,
            index: DEFAULT_ES_INDEX.to_string(),
            document_type: DEFAULT_ES_DOCUMENT_TYPE.to_string(),
            report_every: DEFAULT_ES_REPORT_EVERY,
            mocking: false,
            use_date_suffix: false,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub full_queue_policy: FullQueuePolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            full_queue_policy: FullQueuePolicy::Block,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input_file: Option<PathBuf>,
    pub sink: SinkKind,
    pub parse: ParseConfig,
    pub tail: TailConfig,
    pub elasticsearch: ElasticsearchConfig,
    pub file_output: PathBuf,
    pub runtime: RuntimeConfig,
    pub pid_file: PathBuf,
    pub pid_overwrite: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_file: None,
            sink: SinkKind::Elastic,
            parse: ParseConfig::default(),
            tail: TailConfig::default(),
            elasticsearch: ElasticsearchConfig::default(),
            file_output: PathBuf::from(DEFAULT_FILE_OUTPUT),
            runtime: RuntimeConfig::default(),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            pid_overwrite: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn new() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = Config::default();

        let mut parse = ParseConfig {
            pattern: vars
                .string("TRANSLOG_PARSE_PATTERN")
                .unwrap_or(defaults.parse.pattern),
            pattern_file: vars.string("TRANSLOG_PARSE_PATTERN_FILE").map(PathBuf::from),
            keys_to_ignore: vars.list("TRANSLOG_PARSE_KEYS_TO_IGNORE", ','),
            time_patterns: vars.list("TRANSLOG_PARSE_TIME_PATTERNS", ';'),
        };
        if parse.pattern_file.is_some() {
            parse.pattern = parse.current_pattern()?;
        }

        let tail = TailConfig {
            from_beginning: vars.bool("TRANSLOG_TAIL_FROM_BEGINNING", false)?,
            reopen: vars.bool("TRANSLOG_TAIL_REOPEN", false)?,
            poll_interval: Duration::from_millis(vars.parse(
                "TRANSLOG_TAIL_POLL_INTERVAL_MS",
                DEFAULT_TAIL_POLL_INTERVAL_MS,
            )?),
        };

        let hosts = vars.list("TRANSLOG_ES_HOSTS", ',');
        let report_every = match vars.string("TRANSLOG_ES_REPORT_EVERY") {
            Some(_) => vars.parse("TRANSLOG_ES_REPORT_EVERY", DEFAULT_ES_REPORT_EVERY)?,
            None => vars.parse("TRANSLOG_ES_FLUSH_EVERY", DEFAULT_ES_REPORT_EVERY)?,
        };
        let elasticsearch = ElasticsearchConfig {
            hosts: if hosts.is_empty() {
                defaults.elasticsearch.hosts
            } else {
                hosts
            },
            port: vars.parse("TRANSLOG_ES_PORT", DEFAULT_ES_PORT)?,
            scheme: vars
                .string("TRANSLOG_ES_SCHEME")
                .unwrap_or(defaults.elasticsearch.scheme),
            max: vars.parse("TRANSLOG_ES_MAX", DEFAULT_ES_MAX)?.max(1),
            index: vars
                .string("TRANSLOG_ES_INDEX")
                .unwrap_or(defaults.elasticsearch.index),
            document_type: vars
                .string("TRANSLOG_ES_DOCUMENT_TYPE")
                .unwrap_or(defaults.elasticsearch.document_type),
            report_every,
            mocking: vars.bool("TRANSLOG_ES_MOCKING", false)?,
            use_date_suffix: vars.bool("TRANSLOG_ES_USE_DATE_SUFFIX", false)?,
            failure_policy: vars
                .string("TRANSLOG_ES_SPOOL_PATH")
                .map_or(FailurePolicy::Drop, |path| {
                    FailurePolicy::Spool(PathBuf::from(path))
                }),
        };

        let runtime = RuntimeConfig {
            workers: vars.parse("TRANSLOG_RUNTIME_WORKERS", 1usize)?.max(1),
            queue_capacity: vars
                .parse("TRANSLOG_RUNTIME_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?
                .max(1),
            full_queue_policy: vars
                .parse("TRANSLOG_RUNTIME_FULL_QUEUE_POLICY", FullQueuePolicy::Block)?,
        };

        Ok(Config {
            input_file: vars.string("TRANSLOG_INPUT_FILE").map(PathBuf::from),
            sink: vars.parse("TRANSLOG_SINK", SinkKind::Elastic)?,
            parse,
            tail,
            elasticsearch,
            file_output: vars
                .string("TRANSLOG_FILE_OUTPUT")
                .map_or(defaults.file_output, PathBuf::from),
            runtime,
            pid_file: vars
                .string("TRANSLOG_PID_FILE")
                .map_or(defaults.pid_file, PathBuf::from),
            pid_overwrite: vars.bool("TRANSLOG_PID_OVERWRITE", true)?,
            log_level: vars
                .string("TRANSLOG_LOG_LEVEL")
                .unwrap_or(defaults.log_level),
            log_file: vars.string("TRANSLOG_LOG_FILE").map(PathBuf::from),
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn list(&self, key: &str, separator: char) -> Vec<String> {
        self.string(key)
            .map(|value| {
                value
                    .split(separator)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(default);
        };
        match value.to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected true or false".to_string(),
            }),
        }
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: FmtDisplay,
    {
        let Some(value) = self.string(key) else {
            return Ok(default);
        };
        value.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
    }
}

/// Interprets a log level name. `fatal` is accepted as an alias of `error`.
pub fn parse_log_level(level: &str) -> Result<LevelFilter, ConfigError> {
    match level.trim().to_lowercase().as_str() {
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" | "fatal" => Ok(LevelFilter::ERROR),
        _ => Err(ConfigError::Invalid {
            key: "TRANSLOG_LOG_LEVEL",
            value: level.to_string(),
            reason: "expected debug, info, warn, error or fatal".to_string(),
        }),
    }
}
