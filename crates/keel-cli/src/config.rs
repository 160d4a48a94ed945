//! CLI state stored at `~/.keel/`.
//!
//! - `~/.keel/state.json` holds the simulated cloud inventory
//! - `~/.keel/secrets/` holds certificate and kubeconfig material

use std::path::PathBuf;

use anyhow::Context;

const CONFIG_DIR_NAME: &str = ".keel";
const STATE_FILE_NAME: &str = "state.json";
const SECRETS_DIR_NAME: &str = "secrets";

/// Returns `~/.keel/`, creating it if it doesn't exist.
pub fn keel_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let dir = home.join(CONFIG_DIR_NAME);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(dir)
}

/// Path to `~/.keel/state.json`.
pub fn state_path() -> anyhow::Result<PathBuf> {
    Ok(keel_dir()?.join(STATE_FILE_NAME))
}

/// Path to `~/.keel/secrets/`.
pub fn secrets_dir() -> anyhow::Result<PathBuf> {
    Ok(keel_dir()?.join(SECRETS_DIR_NAME))
}

/// Default substrate name: the local user, falling back to "keel".
pub fn default_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "keel".to_string())
}
