// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Follows a growing log file and publishes one event per parsed line.

use crate::channel::EventSender;
use crate::config::TailConfig;
use crate::errors::TailError;
use crate::parser::EventParser;
use derive_more::Display;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TailerState {
    Idle,
    Running,
    Stopped,
}

/// Identity of the file behind a path, used to notice rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    device: u64,
    inode: u64,
}

impl FileId {
    #[cfg(unix)]
    fn of(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

pub struct LogTailer {
    path: PathBuf,
    config: TailConfig,
    parser: Arc<EventParser>,
    events: EventSender,
    state: TailerState,
    lines_read: u64,
    lines_dropped: u64,
}

impl LogTailer {
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        config: TailConfig,
        parser: Arc<EventParser>,
        events: EventSender,
    ) -> Self {
        Self {
            path: path.into(),
            config,
            parser,
            events,
            state: TailerState::Idle,
            lines_read: 0,
            lines_dropped: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> TailerState {
        self.state
    }

    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Lines that did not match the pattern.
    #[must_use]
    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// Follows the file until `cancel` fires or the event channel has no
    /// receiver left. Only failing to open the file is an error.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), TailError> {
        let (mut file, mut file_id) = open(&self.path).await?;
        let mut offset = if self.config.from_beginning {
            0
        } else {
            file.seek(SeekFrom::End(0)).await?
        };
        self.state = TailerState::Running;
        info!(
            "Tailing {} from offset {offset} (reopen: {})",
            self.path.display(),
            self.config.reopen
        );

        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        'follow: loop {
            if cancel.is_cancelled() {
                break;
            }

            let read = file.read(&mut chunk).await?;
            if read > 0 {
                offset += read as u64;
                pending.extend_from_slice(&chunk[..read]);
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    if !self.dispatch(&line).await {
                        break 'follow;
                    }
                }
                continue;
            }

            match tokio::fs::metadata(&self.path).await {
                Ok(metadata) => {
                    let current_id = FileId::of(&metadata);
                    if self.config.reopen && current_id != file_id {
                        info!("{} was rotated, reopening", self.path.display());
                        match open(&self.path).await {
                            Ok((reopened, id)) => {
                                file = reopened;
                                file_id = id;
                                offset = 0;
                                pending.clear();
                                continue;
                            }
                            Err(e) => debug!("Could not reopen yet: {e}"),
                        }
                    } else if current_id == file_id && metadata.len() < offset {
                        warn!(
                            "{} was truncated from {offset} to {} bytes, reading from the start",
                            self.path.display(),
                            metadata.len()
                        );
                        offset = file.seek(SeekFrom::Start(0)).await?;
                        pending.clear();
                        continue;
                    }
                }
                Err(e) => debug!("{} is unavailable: {e}", self.path.display()),
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.state = TailerState::Stopped;
        info!(
            "Stopped tailing {} after {} lines ({} dropped)",
            self.path.display(),
            self.lines_read,
            self.lines_dropped
        );
        Ok(())
    }

    /// Parses one raw line and publishes the event. Returns false once the
    /// channel is disconnected.
    async fn dispatch(&mut self, raw: &[u8]) -> bool {
        self.lines_read += 1;
        let line = String::from_utf8_lossy(raw);
        let event = match self.parser.parse_line(line.trim()) {
            Ok(event) => event,
            Err(_) => {
                self.lines_dropped += 1;
                return true;
            }
        };
        match self.events.send(event).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Stopping tailer: {e}");
                false
            }
        }
    }
}

async fn open(path: &Path) -> Result<(File, Option<FileId>), TailError> {
    let file = File::open(path).await.map_err(|source| TailError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let metadata = file.metadata().await?;
    Ok((file, FileId::of(&metadata)))
}
