//! Delete command - tear down a bootstrapped substrate

use std::time::Instant;

use clap::Args;
use tracing::info;

use keel_common::crd::{NetworkSpec, Substrate, SubstrateSpec};

use crate::config;

/// Tear down a previously bootstrapped substrate
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Substrate name; defaults to the local user name
    pub name: Option<String>,
}

pub async fn run(args: DeleteArgs) -> anyhow::Result<()> {
    let name = args.name.unwrap_or_else(config::default_name);
    let engine = super::local_engine()?;

    // teardown discovers resources by owner tag, so only the name matters
    let mut substrate = Substrate::named(
        &name,
        SubstrateSpec {
            network: NetworkSpec {
                cidrs: vec!["10.0.0.0/16".to_string()],
            },
            ..Default::default()
        },
    );
    substrate.mark_deleted();

    info!(substrate = %name, "deleting");
    let start = Instant::now();
    engine.converge(&substrate).await?;
    info!(substrate = %name, elapsed = ?start.elapsed(), "delete complete");
    println!("substrate {name} deleted");
    Ok(())
}
