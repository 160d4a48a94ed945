//! Bootstrap command - converge a local cluster substrate from scratch

use std::time::Instant;

use clap::Args;
use tracing::info;

use keel_common::crd::{NetworkSpec, SubnetSpec, Substrate, SubstrateSpec};

use crate::config;

/// Provision a cluster substrate and its control plane material
#[derive(Args, Debug)]
pub struct BootstrapArgs {
    /// Substrate name; defaults to the local user name
    pub name: Option<String>,

    /// Instance type for the compute fleet
    #[arg(long)]
    pub instance_type: Option<String>,
}

pub async fn run(args: BootstrapArgs) -> anyhow::Result<()> {
    let name = args.name.unwrap_or_else(config::default_name);
    let engine = super::local_engine()?;

    let substrate = Substrate::named(&name, default_spec(args.instance_type));
    info!(substrate = %name, "bootstrapping");
    let start = Instant::now();

    let converged = engine.converge(&substrate).await?;

    let status = converged.status.unwrap_or_default();
    info!(
        substrate = %name,
        elapsed = ?start.elapsed(),
        endpoint = status.cluster.endpoint.as_deref().unwrap_or(""),
        "bootstrap complete"
    );
    println!("substrate {name} ready");
    if let Some(endpoint) = status.cluster.endpoint {
        println!("  endpoint:   {endpoint}");
    }
    println!("  secrets:    {}", config::secrets_dir()?.display());
    Ok(())
}

/// Three-zone topology with a private and a public subnet per zone.
fn default_spec(instance_type: Option<String>) -> SubstrateSpec {
    let zones = ["us-west-2a", "us-west-2b", "us-west-2c"];
    let mut subnets = Vec::with_capacity(zones.len() * 2);
    for (i, zone) in zones.iter().enumerate() {
        subnets.push(SubnetSpec {
            zone: zone.to_string(),
            cidr: format!("10.0.{}.0/24", i + 1),
            public: false,
        });
        subnets.push(SubnetSpec {
            zone: zone.to_string(),
            cidr: format!("10.0.{}.0/24", i + 100),
            public: true,
        });
    }
    SubstrateSpec {
        instance_type,
        network: NetworkSpec {
            cidrs: vec!["10.0.0.0/16".to_string()],
        },
        subnets,
        version: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_valid_and_balanced() {
        let spec = default_spec(Some("t3.large".to_string()));
        spec.validate().unwrap();
        assert_eq!(spec.subnets.len(), 6);
        assert_eq!(spec.subnets.iter().filter(|s| s.public).count(), 3);
        let cidrs: Vec<_> = spec.subnets.iter().map(|s| s.cidr.as_str()).collect();
        assert!(cidrs.contains(&"10.0.1.0/24"));
        assert!(cidrs.contains(&"10.0.100.0/24"));
    }
}
