// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails a log file, turns each appended line into a typed [`Event`] and
//! ships events to bulk-indexing or JSON-lines sinks.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod channel;
pub mod config;
pub mod errors;
pub mod event;
pub mod parser;
pub mod pid_file;
pub mod pipeline;
pub mod sink;
pub mod tailer;
pub mod value;

pub use config::Config;
pub use event::Event;
pub use parser::EventParser;
pub use pipeline::Pipeline;
pub use value::Value;
