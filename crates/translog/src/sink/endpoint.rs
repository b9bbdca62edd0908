// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::Creation;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

const FALLBACK_HOST: &str = "localhost";

/// Hosts of the bulk endpoint, visited in configuration order.
#[derive(Debug)]
pub struct EndpointPool {
    hosts: Vec<String>,
    scheme: String,
    port: u16,
    cursor: AtomicUsize,
}

impl EndpointPool {
    #[must_use]
    pub fn new(hosts: Vec<String>, scheme: impl Into<String>, port: u16) -> Self {
        Self {
            hosts,
            scheme: scheme.into(),
            port,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the host under the cursor and advances it by one, wrapping at
    /// the end of the pool.
    pub fn next_host(&self) -> &str {
        let len = self.hosts.len();
        if len == 0 {
            return FALLBACK_HOST;
        }
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|current| current);
        &self.hosts[index % len]
    }

    pub fn next_url(&self) -> String {
        self.url_for(self.next_host())
    }

    fn url_for(&self, host: &str) -> String {
        format!("{}://{}:{}/_bulk", self.scheme, host, self.port)
    }

    /// Checks that every host forms a well-formed bulk URL without moving the
    /// cursor.
    pub fn validate(&self) -> Result<(), Creation> {
        let sample: Vec<&str> = if self.hosts.is_empty() {
            vec![FALLBACK_HOST]
        } else {
            self.hosts.iter().map(String::as_str).collect()
        };
        for host in sample {
            let url = self.url_for(host);
            if let Err(source) = Url::parse(&url) {
                return Err(Creation::InvalidEndpoint { url, source });
            }
        }
        Ok(())
    }
}
