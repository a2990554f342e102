// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Layered configuration: defaults, user config file, explicit file,
//! then `TRESTLE_*` environment variables, later layers winning.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::launch::ServerOptions;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Server definitions keyed by language ID (e.g. "rust", "python").
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,
}

/// One language server's launch definition.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g. "rust-analyzer").
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Initialization options forwarded verbatim in the handshake.
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

impl ServerConfig {
    /// Launch options for this server definition.
    #[must_use]
    pub fn to_options(&self) -> ServerOptions {
        ServerOptions {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            initialization_options: self.initialization_options.clone(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

impl Config {
    /// Loads configuration from standard paths, then `explicit_file`,
    /// then the environment.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be read or the merged result does not
    /// deserialize.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder =
            config::Config::builder().set_default("request_timeout", 30)?;

        // ~/.config/trestle/config.toml, when present.
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("trestle").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("TRESTLE"));

        let config = builder.build().context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The server definition for `language_id`, if one is configured.
    #[must_use]
    pub fn server_for(&self, language_id: &str) -> Option<&ServerConfig> {
        self.server.get(language_id)
    }
}
