// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line to event conversion.
//!
//! Every named capture group of the active pattern becomes an event field whose
//! value is typed by [`TypeInference`]. A group named `uri` is additionally
//! parsed as a URI and its query parameters are merged into the event without
//! ever overwriting an existing field.

use crate::config::ParseConfig;
use crate::errors::ParseError;
use crate::event::Event;
use crate::value::TypeInference;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Pattern used when none is configured: the whole line in one field.
pub const DEFAULT_PARSE_PATTERN: &str = r"(?P<line>.*)";

/// Pattern for the common web server access log format.
pub const ACCESS_LOG_PATTERN: &str = r#"(?P<host>\S+) (?P<client>\S+) (?P<user>\S+) \[(?P<created>[^\]]+)\] "((?P<method>[A-Z]+) )?(?P<uri>\S+).*""#;

const URI_FIELD: &str = "uri";

// Relative references such as `/0.gif?count=7` are resolved against this.
const RELATIVE_URI_BASE: &str = "http://localhost/";

struct CompiledPattern {
    source: String,
    regex: Regex,
    group_names: Vec<String>,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Result<Self, ParseError> {
        let source = if pattern.is_empty() {
            DEFAULT_PARSE_PATTERN
        } else {
            pattern
        };
        let regex = Regex::new(source)?;
        let group_names = regex
            .capture_names()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(Self {
            source: source.to_string(),
            regex,
            group_names,
        })
    }
}

/// Parses log lines into events.
///
/// Safe to share between tasks; [`EventParser::reload`] swaps the pattern
/// atomically so a concurrent parse sees either the old or the new pattern.
pub struct EventParser {
    pattern: RwLock<Arc<CompiledPattern>>,
    keys_to_ignore: HashSet<String>,
    inference: TypeInference,
}

impl EventParser {
    /// Compiles the configured pattern. An invalid pattern is fatal for the
    /// caller.
    pub fn new(config: &ParseConfig) -> Result<Self, ParseError> {
        let compiled = CompiledPattern::compile(&config.pattern)?;
        debug!("Compiled parse pattern: {}", compiled.source);
        Ok(Self {
            pattern: RwLock::new(Arc::new(compiled)),
            keys_to_ignore: config.keys_to_ignore.iter().cloned().collect(),
            inference: TypeInference::new(config.time_patterns.clone()),
        })
    }

    /// Source of the active pattern.
    #[must_use]
    pub fn pattern(&self) -> String {
        self.current().source.clone()
    }

    /// Replaces the active pattern.
    ///
    /// Returns `Ok(false)` when `pattern` is already active. On a compile
    /// failure the previous pattern stays active.
    pub fn reload(&self, pattern: &str) -> Result<bool, ParseError> {
        let requested = if pattern.is_empty() {
            DEFAULT_PARSE_PATTERN
        } else {
            pattern
        };
        if self.current().source == requested {
            return Ok(false);
        }
        match CompiledPattern::compile(requested) {
            Ok(compiled) => {
                info!("Resetting parse pattern: {}", compiled.source);
                *self
                    .pattern
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Arc::new(compiled);
                Ok(true)
            }
            Err(e) => {
                warn!("Could not compile pattern, keeping the previous one: {e}");
                Err(e)
            }
        }
    }

    /// Matches `line` against the active pattern and builds its event.
    pub fn parse_line(&self, line: &str) -> Result<Event, ParseError> {
        let pattern = self.current();
        let Some(captures) = pattern.regex.captures(line) else {
            debug!("Line {line} did not match pattern");
            return Err(ParseError::NoMatch(line.to_string()));
        };

        let mut event = Event::with_capacity(pattern.group_names.len());
        let mut uri = None;
        for name in &pattern.group_names {
            // groups that did not participate in the match count as empty
            let raw = captures.name(name).map_or("", |m| m.as_str());
            if name == URI_FIELD {
                uri = Some(raw);
            }
            if !self.should_ignore(name) {
                event.insert(name.clone(), self.inference.infer(raw));
            }
        }
        if let Some(uri) = uri {
            self.expand_uri(uri, &mut event);
        }
        Ok(event)
    }

    /// Adds the query parameters of `uri` to `event`.
    ///
    /// Only the first value of a repeated parameter is used. A parameter whose
    /// name is already taken is stored under the name prefixed with
    /// underscores. Empty or unparseable URIs leave the event untouched.
    pub fn expand_uri(&self, uri: &str, event: &mut Event) {
        if uri.is_empty() {
            return;
        }
        let Some(url) = parse_uri(uri) else {
            debug!("Unable to parse uri {uri}");
            return;
        };
        let mut seen = HashSet::new();
        for (key, value) in url.query_pairs() {
            if !seen.insert(key.clone()) || self.should_ignore(&key) {
                continue;
            }
            let name = event.unique_name(&key);
            if self.should_ignore(&name) {
                continue;
            }
            event.insert(name, self.inference.infer(&value));
        }
    }

    fn should_ignore(&self, key: &str) -> bool {
        key.is_empty() || self.keys_to_ignore.contains(key)
    }

    fn current(&self) -> Arc<CompiledPattern> {
        Arc::clone(&self.pattern.read().unwrap_or_else(PoisonError::into_inner))
    }
}

fn parse_uri(uri: &str) -> Option<Url> {
    match Url::parse(uri) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(RELATIVE_URI_BASE).ok()?.join(uri).ok()
        }
        Err(_) => None,
    }
}
