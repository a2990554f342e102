// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Minimal host-document surface.
//!
//! The bridge core never sees editor buffers. A document here is just a
//! routable handle: a stable id, an optional on-disk path, and the
//! language it belongs to. Binding to a real editor's document type is
//! the orchestrating layer's job.

use std::path::{Path, PathBuf};

/// Stable identity of an open host document.
///
/// The host assigns ids; the manager only uses them as routing-table
/// keys and never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);

/// A routable view of one open document.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    id: DocumentId,
    path: Option<PathBuf>,
    language_id: String,
}

impl DocumentHandle {
    /// Creates a handle for a document with an on-disk path.
    #[must_use]
    pub fn new(id: DocumentId, path: impl Into<PathBuf>, language_id: impl Into<String>) -> Self {
        Self {
            id,
            path: Some(path.into()),
            language_id: language_id.into(),
        }
    }

    /// Creates a handle for a document that has never been saved.
    /// Such documents are not routable to any session.
    #[must_use]
    pub fn unsaved(id: DocumentId, language_id: impl Into<String>) -> Self {
        Self {
            id,
            path: None,
            language_id: language_id.into(),
        }
    }

    /// The host-assigned document id.
    #[must_use]
    pub const fn id(&self) -> DocumentId {
        self.id
    }

    /// The document's on-disk path, if it has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The grammar/language the document belongs to.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }
}
