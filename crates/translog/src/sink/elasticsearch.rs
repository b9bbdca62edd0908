// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk-indexing sink. Events are buffered as NDJSON index operations and
//! POSTed to the next Elasticsearch host once the buffer is full.

use crate::channel::EventReceiver;
use crate::config::ElasticsearchConfig;
use crate::errors::{Creation, ShippingError};
use crate::event::Event;
use crate::sink::buffer::BatchBuffer;
use crate::sink::endpoint::EndpointPool;
use crate::sink::report::{last_created_id, ThroughputCounters, ThroughputReport};
use crate::sink::{Sink, SinkState};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happens to a batch whose upload failed. The buffer is cleared either
/// way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Drop,
    /// Append the failed payload to this file.
    Spool(PathBuf),
}

#[derive(Serialize)]
struct IndexDirective<'a> {
    create: IndexTarget<'a>,
}

#[derive(Serialize)]
struct IndexTarget<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    document_type: &'a str,
}

pub struct ElasticsearchSink {
    worker_number: usize,
    config: ElasticsearchConfig,
    endpoints: EndpointPool,
    buffer: BatchBuffer,
    counters: ThroughputCounters,
    client: reqwest::Client,
    mock_output: Box<dyn Write + Send>,
    last_item_created: Option<String>,
    flushes: u64,
    state: SinkState,
}

impl ElasticsearchSink {
    /// Validates the endpoint URLs and allocates the buffer.
    pub fn new(worker_number: usize, config: ElasticsearchConfig) -> Result<Self, Creation> {
        let endpoints = EndpointPool::new(config.hosts.clone(), config.scheme.clone(), config.port);
        endpoints.validate()?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            worker_number,
            buffer: BatchBuffer::new(config.max),
            endpoints,
            counters: ThroughputCounters::new(),
            client,
            mock_output: Box::new(std::io::stdout()),
            last_item_created: None,
            flushes: 0,
            state: SinkState::Idle,
            config,
        })
    }

    /// Replaces standard output as the destination of mock-mode payloads.
    #[must_use]
    pub fn with_mock_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.mock_output = output;
        self
    }

    /// Lines currently buffered, two per event.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.counter()
    }

    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.counters.total_items()
    }

    /// Target index, suffixed with the current UTC date when configured.
    #[must_use]
    pub fn index_name(&self) -> String {
        if self.config.use_date_suffix {
            format!("{}{}", self.config.index, Utc::now().format("%Y.%m.%d"))
        } else {
            self.config.index.clone()
        }
    }

    pub async fn handle_event(&mut self, event: &Event) {
        debug!(
            "Worker #{} received event, current count is {}",
            self.worker_number,
            self.buffer.counter()
        );
        if self.buffer.is_full() || self.config.mocking {
            self.flush(false).await;
        }

        let document = match serde_json::to_string(event) {
            Ok(document) => document,
            Err(e) => {
                warn!("Worker #{}: unable to serialize event: {e}", self.worker_number);
                return;
            }
        };
        let index = self.index_name();
        let directive = IndexDirective {
            create: IndexTarget {
                index: &index,
                document_type: &self.config.document_type,
            },
        };
        match serde_json::to_string(&directive) {
            Ok(directive) => self.buffer.push(directive, document),
            Err(e) => warn!(
                "Worker #{}: unable to serialize index directive: {e}",
                self.worker_number
            ),
        }
    }

    /// Ships the buffered events and clears the buffer, whatever the upload
    /// outcome. Returns the throughput report when one was due.
    pub async fn flush(&mut self, force_report: bool) -> Option<ThroughputReport> {
        if self.buffer.is_empty() {
            return None;
        }
        self.flushes += 1;
        let payload = self.buffer.payload();
        let items = self.buffer.items() as u64;

        if self.config.mocking {
            if let Err(e) = self
                .mock_output
                .write_all(payload.as_bytes())
                .and_then(|()| self.mock_output.flush())
            {
                warn!("Worker #{}: unable to write mock payload: {e}", self.worker_number);
            }
        } else {
            let url = self.endpoints.next_url();
            match ship(&self.client, &url, payload.clone()).await {
                Ok(body) => {
                    info!(
                        "Worker #{}: POST to {url} succeeded on flush {}",
                        self.worker_number, self.flushes
                    );
                    if let Some(id) = last_created_id(&body) {
                        self.last_item_created = Some(id);
                    }
                }
                Err(ShippingError::Destination(status, body)) => {
                    warn!(
                        "Worker #{}: on flush {}, POST to {url} failed with status {status:?}: {body}",
                        self.worker_number, self.flushes
                    );
                    handle_failure(
                        self.worker_number,
                        &self.config.failure_policy,
                        &payload,
                        items,
                    )
                    .await;
                }
                Err(ShippingError::Payload(reason)) => {
                    warn!(
                        "Worker #{}: POST to {url} failed: {reason}",
                        self.worker_number
                    );
                    handle_failure(
                        self.worker_number,
                        &self.config.failure_policy,
                        &payload,
                        items,
                    )
                    .await;
                }
            }
            debug!("Worker #{}: bulk upload is complete", self.worker_number);
        }

        self.counters.record(items);
        self.buffer.clear();

        if self
            .counters
            .should_report(force_report, self.config.report_every)
        {
            let report = self
                .counters
                .report(self.worker_number, self.last_item_created.take());
            report.log();
            Some(report)
        } else {
            None
        }
    }
}

async fn handle_failure(worker_number: usize, policy: &FailurePolicy, payload: &str, items: u64) {
    match policy {
        FailurePolicy::Drop => {
            warn!("Worker #{worker_number}: dropping {items} events");
        }
        FailurePolicy::Spool(path) => match spool(path, payload).await {
            Ok(()) => info!(
                "Worker #{worker_number}: spooled {items} events to {}",
                path.display()
            ),
            Err(e) => error!(
                "Worker #{worker_number}: unable to spool {items} events to {}: {e}",
                path.display()
            ),
        },
    }
}

async fn ship(
    client: &reqwest::Client,
    url: &str,
    payload: String,
) -> Result<String, ShippingError> {
    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(payload)
        .send()
        .await
        .map_err(|e| ShippingError::Payload(e.to_string()))?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(ShippingError::Destination(Some(status), body))
    }
}

async fn spool(path: &Path, payload: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(payload.as_bytes()).await?;
    file.flush().await
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn name(&self) -> String {
        format!("elasticsearch #{}", self.worker_number)
    }

    fn state(&self) -> SinkState {
        self.state
    }

    async fn run(&mut self, events: EventReceiver, cancel: CancellationToken) {
        self.state = SinkState::Working;
        self.counters = ThroughputCounters::new();
        info!("Elasticsearch worker #{} starting work", self.worker_number);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Elasticsearch worker #{} received quit", self.worker_number);
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event).await,
                    None => {
                        debug!(
                            "Elasticsearch worker #{}: event channel closed",
                            self.worker_number
                        );
                        break;
                    }
                }
            }
        }
        let mut drained = 0usize;
        while let Some(event) = events.try_recv() {
            self.handle_event(&event).await;
            drained += 1;
        }
        if drained > 0 {
            debug!(
                "Elasticsearch worker #{}: drained {drained} queued events",
                self.worker_number
            );
        }
        self.flush(true).await;
        self.state = SinkState::Stopped;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::{bounded, FullQueuePolicy};
    use crate::value::Value;
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl SharedOutput {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn unreachable_config(max: usize) -> ElasticsearchConfig {
        ElasticsearchConfig {
            hosts: vec!["127.0.0.1".to_string()],
            port: 1,
            max,
            ..ElasticsearchConfig::default()
        }
    }

    fn event(n: i64) -> Event {
        [("n", Value::Integer(n))].into_iter().collect()
    }

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        let config = ElasticsearchConfig {
            hosts: vec!["not a host".to_string()],
            ..ElasticsearchConfig::default()
        };
        assert!(matches!(
            ElasticsearchSink::new(0, config),
            Err(Creation::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_index_name_date_suffix() {
        let plain = ElasticsearchSink::new(0, ElasticsearchConfig::default()).unwrap();
        assert_eq!(plain.index_name(), "analytics");

        let config = ElasticsearchConfig {
            index: "es-prod-analytics-".to_string(),
            use_date_suffix: true,
            ..ElasticsearchConfig::default()
        };
        let suffixed = ElasticsearchSink::new(0, config).unwrap();
        let name = suffixed.index_name();
        assert!(name.starts_with("es-prod-analytics-"));
        let suffix = &name["es-prod-analytics-".len()..];
        assert_eq!(suffix.len(), "2016.04.01".len());
        assert!(chrono::NaiveDate::parse_from_str(suffix, "%Y.%m.%d").is_ok());
    }

    #[tokio::test]
    async fn test_buffers_directive_and_document() {
        let output = SharedOutput::default();
        let config = ElasticsearchConfig {
            mocking: true,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(0, config)
            .unwrap()
            .with_mock_output(Box::new(output.clone()));

        sink.handle_event(&event(1)).await;
        assert_eq!(sink.buffered(), 2);
        sink.flush(true).await;
        assert_eq!(
            output.contents(),
            "{\"create\":{\"_index\":\"analytics\",\"_type\":\"event\"}}\n{\"n\":1}\n"
        );
    }

    #[tokio::test]
    async fn test_mock_mode_flushes_before_every_event() {
        let output = SharedOutput::default();
        let config = ElasticsearchConfig {
            mocking: true,
            report_every: 0,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(0, config)
            .unwrap()
            .with_mock_output(Box::new(output.clone()));

        for n in 0..3 {
            sink.handle_event(&event(n)).await;
            assert_eq!(sink.buffered(), 2);
        }
        assert_eq!(sink.total_items(), 2);
        assert_eq!(output.contents().lines().count(), 4);
    }

    #[tokio::test]
    async fn test_flush_triggers_when_buffer_full() {
        let output = SharedOutput::default();
        let mut sink = ElasticsearchSink::new(0, unreachable_config(2))
            .unwrap()
            .with_mock_output(Box::new(output.clone()));

        sink.handle_event(&event(1)).await;
        sink.handle_event(&event(2)).await;
        assert_eq!(sink.buffered(), 4);
        assert_eq!(sink.total_items(), 0);

        sink.handle_event(&event(3)).await;
        assert_eq!(sink.buffered(), 2);
        assert_eq!(sink.total_items(), 2);
        assert!(output.contents().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_upload_still_clears_buffer() {
        let mut sink = ElasticsearchSink::new(3, unreachable_config(10)).unwrap();
        sink.handle_event(&event(1)).await;
        let report = sink.flush(false).await;
        assert!(report.is_none());
        assert_eq!(sink.buffered(), 0);
        assert!(logs_contain("Worker #3: POST to http://127.0.0.1:1/_bulk failed"));
        assert!(logs_contain("dropping 1 events"));
    }

    #[tokio::test]
    async fn test_failed_upload_is_spooled() {
        let dir = tempfile::tempdir().unwrap();
        let spool_path = dir.path().join("spool.ndjson");
        let config = ElasticsearchConfig {
            failure_policy: FailurePolicy::Spool(spool_path.clone()),
            ..unreachable_config(10)
        };
        let mut sink = ElasticsearchSink::new(0, config).unwrap();
        sink.handle_event(&event(1)).await;
        sink.flush(false).await;
        sink.handle_event(&event(2)).await;
        sink.flush(false).await;

        let spooled = std::fs::read_to_string(&spool_path).unwrap();
        assert_eq!(spooled.lines().count(), 4);
        assert!(spooled.ends_with("{\"n\":2}\n"));
    }

    #[tokio::test]
    async fn test_forced_flush_always_reports() {
        let config = ElasticsearchConfig {
            mocking: true,
            report_every: 1000,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(7, config)
            .unwrap()
            .with_mock_output(Box::new(SharedOutput::default()));

        sink.handle_event(&event(1)).await;
        let report = sink.flush(true).await.unwrap();
        assert_eq!(report.worker_number, 7);
        assert_eq!(report.item_count, 1);
        assert_eq!(report.items_flushed, 1);

        assert!(sink.flush(true).await.is_none());
    }

    #[tokio::test]
    async fn test_periodic_report() {
        let config = ElasticsearchConfig {
            mocking: true,
            report_every: 2,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(0, config)
            .unwrap()
            .with_mock_output(Box::new(SharedOutput::default()));

        sink.handle_event(&event(1)).await;
        assert!(sink.flush(false).await.is_none());
        sink.handle_event(&event(2)).await;
        let report = sink.flush(false).await.unwrap();
        assert_eq!(report.item_count, 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unserializable_event_is_dropped() {
        let mut sink = ElasticsearchSink::new(0, ElasticsearchConfig::default()).unwrap();
        let bad: Event = [("ratio", Value::Float(f64::INFINITY))].into_iter().collect();
        sink.handle_event(&bad).await;
        assert_eq!(sink.buffered(), 0);
        assert!(logs_contain("unable to serialize event"));
    }

    #[tokio::test]
    async fn test_run_flushes_on_cancel() {
        let output = SharedOutput::default();
        let config = ElasticsearchConfig {
            max: 100,
            mocking: true,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(0, config)
            .unwrap()
            .with_mock_output(Box::new(output.clone()));
        let (tx, rx) = bounded(16, FullQueuePolicy::Block);
        let cancel = CancellationToken::new();

        for n in 0..3 {
            tx.send(event(n)).await.unwrap();
        }
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sink.run(rx, cancel).await;
                sink
            })
        };
        while !tx.is_empty() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        let sink = handle.await.unwrap();

        assert_eq!(sink.state(), SinkState::Stopped);
        assert_eq!(sink.total_items(), 3);
        assert_eq!(output.contents().lines().count(), 6);
    }

    #[tokio::test]
    async fn test_run_drains_queue_on_cancel() {
        let output = SharedOutput::default();
        let config = ElasticsearchConfig {
            mocking: true,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(0, config)
            .unwrap()
            .with_mock_output(Box::new(output.clone()));
        let (tx, rx) = bounded(16, FullQueuePolicy::Block);
        for n in 0..5 {
            tx.send(event(n)).await.unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        sink.run(rx, cancel).await;

        assert!(tx.is_empty());
        assert_eq!(sink.total_items(), 5);
        assert_eq!(output.contents().lines().count(), 10);
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let config = ElasticsearchConfig {
            mocking: true,
            ..ElasticsearchConfig::default()
        };
        let mut sink = ElasticsearchSink::new(0, config)
            .unwrap()
            .with_mock_output(Box::new(SharedOutput::default()));
        let (tx, rx) = bounded(4, FullQueuePolicy::Block);
        tx.send(event(1)).await.unwrap();
        drop(tx);

        sink.run(rx, CancellationToken::new()).await;
        assert_eq!(sink.state(), SinkState::Stopped);
        assert_eq!(sink.total_items(), 1);
    }
}
