// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Capability probing for adapter attachment.
//!
//! Adapters are polymorphic over the server's advertised capability
//! set: each one tests its feature against the session's snapshot
//! before registering. The manager guarantees the snapshot exists and
//! is immutable by the time adapters run; it never arbitrates which
//! adapters attach.

use lsp_types::{OneOf, ServerCapabilities};

/// LSP feature families an adapter can gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerFeature {
    /// `textDocument/completion`.
    Completion,
    /// `textDocument/hover`.
    Hover,
    /// `textDocument/definition`.
    Definition,
    /// `textDocument/references`.
    References,
    /// `textDocument/documentSymbol`.
    DocumentSymbols,
    /// `workspace/symbol`.
    WorkspaceSymbols,
    /// `textDocument/formatting`.
    Formatting,
    /// `textDocument/rangeFormatting`.
    RangeFormatting,
    /// `textDocument/rename`.
    Rename,
    /// `textDocument/codeAction`.
    CodeActions,
    /// `textDocument/signatureHelp`.
    SignatureHelp,
}

/// True if the capability snapshot advertises support for `feature`.
///
/// This is the `can_adapt` predicate adapters consult before attaching
/// to a session.
#[must_use]
pub fn supports(capabilities: &ServerCapabilities, feature: ServerFeature) -> bool {
    match feature {
        ServerFeature::Completion => capabilities.completion_provider.is_some(),
        ServerFeature::Hover => flag(capabilities.hover_provider.as_ref().map(|p| match p {
            lsp_types::HoverProviderCapability::Simple(enabled) => *enabled,
            lsp_types::HoverProviderCapability::Options(_) => true,
        })),
        ServerFeature::Definition => one_of(capabilities.definition_provider.as_ref()),
        ServerFeature::References => one_of(capabilities.references_provider.as_ref()),
        ServerFeature::DocumentSymbols => one_of(capabilities.document_symbol_provider.as_ref()),
        ServerFeature::WorkspaceSymbols => one_of(capabilities.workspace_symbol_provider.as_ref()),
        ServerFeature::Formatting => one_of(capabilities.document_formatting_provider.as_ref()),
        ServerFeature::RangeFormatting => {
            one_of(capabilities.document_range_formatting_provider.as_ref())
        }
        ServerFeature::Rename => capabilities
            .rename_provider
            .as_ref()
            .is_some_and(|p| match p {
                OneOf::Left(enabled) => *enabled,
                OneOf::Right(_) => true,
            }),
        ServerFeature::CodeActions => capabilities
            .code_action_provider
            .as_ref()
            .is_some_and(|p| match p {
                lsp_types::CodeActionProviderCapability::Simple(enabled) => *enabled,
                lsp_types::CodeActionProviderCapability::Options(_) => true,
            }),
        ServerFeature::SignatureHelp => capabilities.signature_help_provider.is_some(),
    }
}

fn flag(value: Option<bool>) -> bool {
    value.unwrap_or(false)
}

fn one_of<O>(value: Option<&OneOf<bool, O>>) -> bool {
    value.is_some_and(|p| match p {
        OneOf::Left(enabled) => *enabled,
        OneOf::Right(_) => true,
    })
}
