// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning a log line into an event.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line did not match pattern: {0}")]
    NoMatch(String),
    #[error("could not compile pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Failures that prevent a sink from being constructed.
#[derive(Debug, Error)]
pub enum Creation {
    #[error("invalid bulk endpoint {url}: {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unable to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("unable to open output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while shipping a bulk payload.
#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("failed to send payload: {0}")]
    Payload(String),
    #[error("destination answered {0:?}: {1}")]
    Destination(Option<StatusCode>, String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("PID file already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TailError {
    #[error("input file {path} could not be opened: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("event channel disconnected")]
    Disconnected,
}
