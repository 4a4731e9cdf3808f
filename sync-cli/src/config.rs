//! Configuration resolution for proper-sync.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::ClientConfig;

/// Looked up in the working directory when no file is named.
const DEFAULT_CONFIG_FILE: &str = "proper.toml";

/// Load the client configuration and apply command-line overrides.
///
/// A named file must exist. Without one, `proper.toml` is read if present and
/// defaults are used otherwise.
pub fn load(path: Option<&Path>, server: Option<String>, realm: Option<String>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                ClientConfig::from_file(fallback).context("Invalid proper.toml")?
            } else {
                ClientConfig::default()
            }
        }
    };

    if let Some(server) = server {
        config.connection.server = server;
    }
    if let Some(realm) = realm {
        config.connection.realm = realm;
    }
    Ok(config)
}
