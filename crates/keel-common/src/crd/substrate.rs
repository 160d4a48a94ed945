//! Substrate Custom Resource Definition
//!
//! A Substrate is the cloud environment a cluster runs on: network,
//! subnets, routing, security group, machine identity and a compute
//! fleet. Its status accumulates external identifiers as independent
//! reconcilers make progress; downstream reconcilers read those fields as
//! preconditions, which is the only dependency ordering in the system.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, Conditioned};

/// Specification for a Substrate
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keel.dev",
    version = "v1alpha1",
    kind = "Substrate",
    plural = "substrates",
    status = "SubstrateStatus",
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".status.infrastructure.networkId"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.cluster.endpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateSpec {
    /// Instance type for the compute fleet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// Network configuration
    pub network: NetworkSpec,

    /// Subnet topology
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,

    /// Kubernetes version to provision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Network-level configuration for a Substrate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// CIDR blocks for the network; the first is the primary block
    pub cidrs: Vec<String>,
}

/// One subnet of the Substrate network
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Availability zone the subnet lives in
    pub zone: String,

    /// CIDR block for the subnet
    pub cidr: String,

    /// Whether instances in this subnet get public addresses
    #[serde(default)]
    pub public: bool,
}

/// Status for a Substrate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateStatus {
    /// Conditions representing the substrate state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Identifiers of provisioned infrastructure, written incrementally
    /// by independent reconcilers
    #[serde(default)]
    pub infrastructure: InfrastructureStatus,

    /// Cluster-facing results (endpoint, kubeconfig)
    #[serde(default)]
    pub cluster: ClusterStatus,
}

/// Accumulated infrastructure identifiers.
///
/// Each field is owned by exactly one resource reconciler; everyone else
/// only reads it. An unset field means "not provisioned yet, requeue".
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// Network identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Route table serving public subnets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_route_table_id: Option<String>,

    /// Route table serving private subnets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_route_table_id: Option<String>,

    /// Public subnet identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_subnet_ids: Vec<String>,

    /// Private subnet identifiers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_subnet_ids: Vec<String>,

    /// Internet gateway identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_gateway_id: Option<String>,

    /// NAT gateway identifier, present when private subnets exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,

    /// Security group identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,

    /// Machine identity (role) identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,

    /// Instance profile bound to the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile_id: Option<String>,

    /// Compute fleet identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,

    /// Instances launched by the fleet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<String>,
}

/// Cluster-facing results of a substrate run
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// API server endpoint of the provisioned cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Name of the secret holding the root CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret: Option<String>,

    /// Name of the secret holding the admin kubeconfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret: Option<String>,
}

impl Substrate {
    /// Build a named substrate with the given spec
    pub fn named(name: &str, spec: SubstrateSpec) -> Self {
        Substrate::new(name, spec)
    }

    /// Set the deletion marker, switching reconcilers to their delete path
    pub fn mark_deleted(&mut self) {
        self.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    }

    /// Whether this substrate is being torn down
    pub fn deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// The object name; substrates are always named
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

impl Conditioned for Substrate {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl SubstrateSpec {
    /// Validate the substrate specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.network.cidrs.is_empty() {
            return Err(crate::Error::validation("network.cidrs cannot be empty"));
        }
        for subnet in &self.subnets {
            if subnet.zone.is_empty() {
                return Err(crate::Error::validation("subnet zone cannot be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletion_marker_selects_delete_path() {
        let mut substrate = Substrate::named("demo", SubstrateSpec::default());
        assert!(!substrate.deleting());
        substrate.mark_deleted();
        assert!(substrate.deleting());
    }

    #[test]
    fn empty_cidrs_are_rejected() {
        let spec = SubstrateSpec::default();
        assert!(spec.validate().is_err());
        let spec = SubstrateSpec {
            network: NetworkSpec {
                cidrs: vec!["10.0.0.0/16".into()],
            },
            ..Default::default()
        };
        assert!(spec.validate().is_ok());
    }
}
