// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::PidFileError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// PID file written at startup and removed on clean shutdown.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id to `path`. Refuses to replace an
    /// existing file unless `overwrite` is set.
    pub fn create(path: impl Into<PathBuf>, overwrite: bool) -> Result<Self, PidFileError> {
        let path = path.into();
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(&path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => PidFileError::AlreadyExists(path.clone()),
            _ => PidFileError::Io(e),
        })?;
        writeln!(file, "{}", std::process::id())?;
        debug!("Wrote PID file {}", path.display());
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed PID file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("PID file {} was already gone", self.path.display());
            }
            Err(e) => warn!("Unable to remove PID file {}: {e}", self.path.display()),
        }
    }
}
