// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumers of the event channel.

use crate::channel::EventReceiver;
use async_trait::async_trait;
use derive_more::Display;
use tokio_util::sync::CancellationToken;

pub mod buffer;
pub mod elasticsearch;
pub mod endpoint;
pub mod json_lines;
pub mod report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SinkState {
    Idle,
    Working,
    Stopped,
}

#[async_trait]
pub trait Sink: Send {
    /// Short label used in log lines.
    fn name(&self) -> String;

    fn state(&self) -> SinkState;

    /// Consumes events until `cancel` fires or every sender is gone, then
    /// flushes whatever is still buffered.
    async fn run(&mut self, events: EventReceiver, cancel: CancellationToken);
}
