// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Cumulative flush statistics of one sink instance.
#[derive(Debug)]
pub struct ThroughputCounters {
    total_items: u64,
    last_count: u64,
    started: Instant,
    last_flush: Instant,
}

impl Default for ThroughputCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputCounters {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            total_items: 0,
            last_count: 0,
            started: now,
            last_flush: now,
        }
    }

    /// Adds the items of one flush, returning the new cumulative count.
    pub fn record(&mut self, items: u64) -> u64 {
        self.total_items += items;
        self.total_items
    }

    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    #[must_use]
    pub fn should_report(&self, force: bool, report_every: u64) -> bool {
        force || (report_every > 0 && self.total_items % report_every == 0)
    }

    /// Builds the report covering everything since the previous one and
    /// restarts the per-report window.
    pub fn report(
        &mut self,
        worker_number: usize,
        last_item_created: Option<String>,
    ) -> ThroughputReport {
        let now = Instant::now();
        let total_elapsed_time = now.duration_since(self.started).as_secs_f64();
        let time_since_last_flush = now.duration_since(self.last_flush).as_secs_f64();
        let items_flushed = self.total_items - self.last_count;
        let items_per_second = if time_since_last_flush > 0.0 {
            items_flushed as f64 / time_since_last_flush
        } else {
            0.0
        };
        self.last_flush = now;
        self.last_count = self.total_items;

        ThroughputReport {
            worker_number,
            item_count: self.total_items,
            total_elapsed_time,
            time_since_last_flush,
            items_flushed,
            items_per_second,
            last_item_created,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputReport {
    pub worker_number: usize,
    pub item_count: u64,
    /// seconds since the sink started
    pub total_elapsed_time: f64,
    /// seconds since the previous report
    pub time_since_last_flush: f64,
    pub items_flushed: u64,
    pub items_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_item_created: Option<String>,
}

impl ThroughputReport {
    pub fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        info!(
            worker_number = self.worker_number,
            item_count = self.item_count,
            items_flushed = self.items_flushed,
            items_per_second = self.items_per_second,
            "Throughput report {json}"
        );
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Deserialize)]
struct BulkItem {
    create: Option<BulkItemResult>,
}

#[derive(Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id")]
    id: Option<String>,
}

/// Extracts the `_id` of the last item created by a bulk request from the
/// response body.
#[must_use]
pub fn last_created_id(body: &str) -> Option<String> {
    let response: BulkResponse = serde_json::from_str(body).ok()?;
    response
        .items
        .into_iter()
        .rev()
        .find_map(|item| item.create.and_then(|created| created.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_report_condition() {
        let mut counters = ThroughputCounters::new();
        counters.record(5);
        assert!(!counters.should_report(false, 10));
        assert!(counters.should_report(true, 10));
        counters.record(5);
        assert!(counters.should_report(false, 10));
        assert!(!counters.should_report(false, 0));
    }

    #[test]
    fn test_report_window() {
        let mut counters = ThroughputCounters::new();
        counters.record(7);
        let first = counters.report(1, None);
        assert_eq!(first.item_count, 7);
        assert_eq!(first.items_flushed, 7);

        counters.record(3);
        let second = counters.report(1, Some("abc".to_string()));
        assert_eq!(second.item_count, 10);
        assert_eq!(second.items_flushed, 3);
        assert!(second.total_elapsed_time >= first.total_elapsed_time);
        assert_eq!(second.last_item_created.as_deref(), Some("abc"));
    }

    #[test]
    fn test_report_json_fields() {
        let report = ThroughputReport {
            worker_number: 2,
            item_count: 10,
            total_elapsed_time: 1.5,
            time_since_last_flush: 0.5,
            items_flushed: 4,
            items_per_second: 8.0,
            last_item_created: None,
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["worker_number"], 2);
        assert_eq!(json["items_per_second"], 8.0);
        assert!(json.get("last_item_created").is_none());
    }

    #[test]
    fn test_last_created_id() {
        let body = r#"{"took":68,"errors":false,"items":[
            {"create":{"_index":"analytics","_type":"event","_id":"AVPTILBJZqnc5MImoVd8","status":201}},
            {"create":{"_index":"analytics","_type":"event","_id":"AVPTILBJZqnc5MImoVd9","status":201}}
        ]}"#;
        assert_eq!(
            last_created_id(body).as_deref(),
            Some("AVPTILBJZqnc5MImoVd9")
        );
        assert_eq!(last_created_id("not json"), None);
        assert_eq!(last_created_id(r#"{"items":[]}"#), None);
    }
}
