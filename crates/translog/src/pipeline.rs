// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires one tailer and any number of sinks to a shared bounded channel.

use crate::channel::{bounded, EventSender};
use crate::config::{Config, SinkKind};
use crate::errors::{Creation, TailError};
use crate::parser::EventParser;
use crate::sink::elasticsearch::ElasticsearchSink;
use crate::sink::json_lines::JsonLinesSink;
use crate::sink::Sink;
use crate::tailer::LogTailer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Builds the sinks selected by `config.sink`. Elasticsearch gets one
/// instance per configured worker, the JSON-lines sinks a single one.
pub async fn build_sinks(config: &Config) -> Result<Vec<Box<dyn Sink>>, Creation> {
    let sinks: Vec<Box<dyn Sink>> = match config.sink {
        SinkKind::Elastic => (0..config.runtime.workers)
            .map(|worker_number| {
                ElasticsearchSink::new(worker_number, config.elasticsearch.clone())
                    .map(|sink| Box::new(sink) as Box<dyn Sink>)
            })
            .collect::<Result<_, _>>()?,
        SinkKind::Stdout => vec![Box::new(JsonLinesSink::stdout()) as Box<dyn Sink>],
        SinkKind::File => {
            vec![Box::new(JsonLinesSink::file(&config.file_output).await?) as Box<dyn Sink>]
        }
    };
    Ok(sinks)
}

pub struct Pipeline {
    parser: Arc<EventParser>,
    events: EventSender,
    tailer_cancel: CancellationToken,
    sinks_cancel: CancellationToken,
    tailer: Option<JoinHandle<Result<(), TailError>>>,
    sinks: Vec<JoinHandle<Box<dyn Sink>>>,
}

impl Pipeline {
    /// Spawns the sinks and the tailer of `input`.
    pub fn start(
        input: impl Into<PathBuf>,
        config: &Config,
        parser: Arc<EventParser>,
        sinks: Vec<Box<dyn Sink>>,
    ) -> Self {
        let (events, receiver) = bounded(
            config.runtime.queue_capacity,
            config.runtime.full_queue_policy,
        );
        let tailer_cancel = CancellationToken::new();
        let sinks_cancel = CancellationToken::new();

        let sinks = sinks
            .into_iter()
            .map(|mut sink| {
                let receiver = receiver.clone();
                let cancel = sinks_cancel.clone();
                tokio::spawn(async move {
                    sink.run(receiver, cancel).await;
                    sink
                })
            })
            .collect::<Vec<_>>();
        info!(
            "Started {} sink(s), queue capacity {} ({} when full)",
            sinks.len(),
            config.runtime.queue_capacity,
            config.runtime.full_queue_policy
        );

        let mut tailer = LogTailer::new(
            input,
            config.tail.clone(),
            Arc::clone(&parser),
            events.clone(),
        );
        let cancel = tailer_cancel.clone();
        let tailer = tokio::spawn(async move { tailer.run(cancel).await });

        Self {
            parser,
            events,
            tailer_cancel,
            sinks_cancel,
            tailer: Some(tailer),
            sinks,
        }
    }

    /// The parser shared with the tailer, for pattern reloads.
    #[must_use]
    pub fn parser(&self) -> &Arc<EventParser> {
        &self.parser
    }

    /// Events discarded because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Events waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.events.len()
    }

    /// Resolves when the tailer stops on its own, which only happens when the
    /// input cannot be opened or every sink is gone. Never resolves after
    /// `shutdown` has taken the tailer.
    pub async fn tailer_exit(&mut self) -> Result<(), TailError> {
        let Some(handle) = self.tailer.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.tailer = None;
        flatten(result)
    }

    /// Stops the tailer, then the sinks. Each sink consumes what is still
    /// queued and flushes before it stops. Returns the stopped sinks.
    pub async fn shutdown(mut self) -> Vec<Box<dyn Sink>> {
        self.tailer_cancel.cancel();
        if let Some(handle) = self.tailer.take() {
            if let Err(e) = flatten(handle.await) {
                warn!("Tailer stopped with an error: {e}");
            }
        }
        debug!("Tailer stopped, stopping sinks");

        let dropped = self.events.dropped();
        // last sender, sinks see the channel close once the queue is drained
        drop(self.events);
        self.sinks_cancel.cancel();
        let mut stopped = Vec::with_capacity(self.sinks.len());
        for handle in self.sinks {
            match handle.await {
                Ok(sink) => {
                    debug!("{} stopped", sink.name());
                    stopped.push(sink);
                }
                Err(e) => error!("Sink task failed: {e}"),
            }
        }
        if dropped > 0 {
            warn!("{dropped} events were dropped because the queue was full");
        }
        stopped
    }
}

fn flatten(
    result: Result<Result<(), TailError>, tokio::task::JoinError>,
) -> Result<(), TailError> {
    match result {
        Ok(result) => result,
        Err(e) => {
            error!("Tailer task failed: {e}");
            Ok(())
        }
    }
}
