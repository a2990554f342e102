// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Host-side file-change events and their protocol translation.

use std::path::{Path, PathBuf};

use lsp_types::{FileChangeType, FileEvent};

use crate::error::{Error, Result};

/// Kind of change the host file watcher observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// The file was created.
    Created,
    /// The file's contents changed.
    Modified,
    /// The file was deleted.
    Deleted,
}

impl FileChangeKind {
    /// The protocol change-kind for this host-side kind.
    #[must_use]
    pub const fn to_protocol(self) -> FileChangeType {
        match self {
            Self::Created => FileChangeType::CREATED,
            Self::Modified => FileChangeType::CHANGED,
            Self::Deleted => FileChangeType::DELETED,
        }
    }
}

/// One changed path in a watcher batch.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Absolute path that changed.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: FileChangeKind,
}

impl FileChange {
    /// Creates a change record.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Translates this change into a protocol `FileEvent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if the path cannot be expressed as a
    /// `file://` URI (relative paths, invalid encoding).
    pub fn to_file_event(&self) -> Result<FileEvent> {
        Ok(FileEvent {
            uri: path_to_uri(&self.path)?,
            typ: self.kind.to_protocol(),
        })
    }
}

/// Builds a percent-encoded `file://` URI from an absolute path.
///
/// # Errors
///
/// Returns [`Error::Payload`] for paths that cannot be expressed as a
/// file URI.
pub fn path_to_uri(path: &Path) -> Result<lsp_types::Uri> {
    let url = url::Url::from_file_path(path).map_err(|()| Error::Payload {
        method: "<uri>".to_string(),
        message: format!("path is not absolute: {}", path.display()),
    })?;
    url.as_str().parse().map_err(|e| Error::Payload {
        method: "<uri>".to_string(),
        message: format!("invalid file URI for {}: {e}", path.display()),
    })
}
