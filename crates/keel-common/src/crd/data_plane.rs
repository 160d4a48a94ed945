//! DataPlane Custom Resource Definition
//!
//! A DataPlane is the worker-node fleet for a cluster. Its reconciler
//! launches instances into the substrate's private subnets once the
//! substrate has published the infrastructure identifiers workers need.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, Conditioned};

/// Specification for a DataPlane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keel.dev",
    version = "v1alpha1",
    kind = "DataPlane",
    plural = "dataplanes",
    shortname = "dp",
    namespaced,
    status = "DataPlaneStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".spec.nodeCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneSpec {
    /// Name of the substrate whose cluster these workers join
    pub cluster_name: String,

    /// Desired number of worker nodes
    #[serde(default = "default_node_count")]
    pub node_count: u32,

    /// Instance types in order of preference; the first is used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_types: Vec<String>,
}

fn default_node_count() -> u32 {
    1
}

impl DataPlaneSpec {
    /// The preferred instance type, or the worker default
    pub fn instance_type(&self) -> &str {
        self.instance_types
            .first()
            .map(String::as_str)
            .unwrap_or("t3.xlarge")
    }
}

/// Status for a DataPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneStatus {
    /// Conditions representing the data plane state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Identifier of the worker fleet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,

    /// Identifiers of the launched worker instances
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<String>,
}

impl Conditioned for DataPlane {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_defaults_to_one() {
        let spec: DataPlaneSpec =
            serde_json::from_str(r#"{"clusterName": "demo"}"#).unwrap();
        assert_eq!(spec.node_count, 1);
        assert_eq!(spec.instance_type(), "t3.xlarge");
    }

    #[test]
    fn first_instance_type_wins() {
        let spec = DataPlaneSpec {
            cluster_name: "demo".to_string(),
            instance_types: vec!["m5.large".to_string(), "t3.xlarge".to_string()],
            ..Default::default()
        };
        assert_eq!(spec.instance_type(), "m5.large");
    }
}
