//! CLI subcommands

pub mod bootstrap;
pub mod delete;

use std::sync::Arc;

use keel_pki::FileSecretStore;
use keel_substrate::{Engine, LocalCloud};

use crate::config;

/// Build a convergence engine backed by `~/.keel/` state.
pub(crate) fn local_engine() -> anyhow::Result<Engine> {
    let cloud = Arc::new(LocalCloud::with_state_file(config::state_path()?)?);
    let store = Arc::new(FileSecretStore::new(config::secrets_dir()?));
    Ok(Engine::new(cloud, store))
}
