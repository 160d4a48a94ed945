//! Keel operator - control plane provisioning for keel clusters

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keel_common::crd::{ControlPlane, DataPlane, Substrate};
use keel_operator::runner;

/// Keel - CRD-driven operator provisioning Kubernetes control planes
#[derive(Parser, Debug)]
#[command(name = "keel-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Skip installing CRDs on startup
    #[arg(long)]
    no_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let substrate = serde_yaml::to_string(&Substrate::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize Substrate CRD: {e}"))?;
        let control_plane = serde_yaml::to_string(&ControlPlane::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize ControlPlane CRD: {e}"))?;
        let data_plane = serde_yaml::to_string(&DataPlane::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize DataPlane CRD: {e}"))?;
        println!("{substrate}---\n{control_plane}---\n{data_plane}");
        return Ok(());
    }

    let client = Client::try_default().await?;

    if !cli.no_crd_install {
        runner::ensure_crds(client.clone()).await?;
    }

    runner::run(client).await?;
    Ok(())
}
