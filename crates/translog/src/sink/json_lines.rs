// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::channel::EventReceiver;
use crate::errors::Creation;
use crate::event::Event;
use crate::sink::{Sink, SinkState};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Writes each event as one JSON object per line.
pub struct JsonLinesSink {
    label: String,
    out: Box<dyn AsyncWrite + Unpin + Send>,
    written: u64,
    state: SinkState,
}

impl JsonLinesSink {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new("stdout", Box::new(tokio::io::stdout()))
    }

    /// Appends to `path`, creating it if needed.
    pub async fn file(path: &Path) -> Result<Self, Creation> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| Creation::Output {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(
            format!("file {}", path.display()),
            Box::new(file),
        ))
    }

    fn new(label: impl Into<String>, out: Box<dyn AsyncWrite + Unpin + Send>) -> Self {
        Self {
            label: label.into(),
            out,
            written: 0,
            state: SinkState::Idle,
        }
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_event(&mut self, event: &Event) {
        let mut line = match serde_json::to_vec(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("{}: unable to serialize event: {e}", self.label);
                return;
            }
        };
        line.push(b'\n');
        match self.out.write_all(&line).await {
            Ok(()) => self.written += 1,
            Err(e) => warn!("{}: unable to write event: {e}", self.label),
        }
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> SinkState {
        self.state
    }

    async fn run(&mut self, events: EventReceiver, cancel: CancellationToken) {
        self.state = SinkState::Working;
        info!("{} sink starting work", self.label);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("{} sink received quit", self.label);
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.write_event(&event).await,
                    None => {
                        debug!("{}: event channel closed", self.label);
                        break;
                    }
                }
            }
        }
        while let Some(event) = events.try_recv() {
            self.write_event(&event).await;
        }
        if let Err(e) = self.out.flush().await {
            warn!("{}: unable to flush output: {e}", self.label);
        }
        self.state = SinkState::Stopped;
    }
}
