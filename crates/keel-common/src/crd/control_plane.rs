//! ControlPlane Custom Resource Definition
//!
//! A ControlPlane is a hosted Kubernetes control plane. Its reconciler
//! issues the certificate tree and admin kubeconfig; the endpoint it needs
//! for API server SANs is supplied by the substrate (or directly in the
//! spec) and gated on with a requeue until present.

use chrono::Utc;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, Conditioned};

/// Specification for a ControlPlane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keel.dev",
    version = "v1alpha1",
    kind = "ControlPlane",
    plural = "controlplanes",
    shortname = "cp",
    namespaced,
    status = "ControlPlaneStatus",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Number of control plane replicas
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Kubernetes version to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// API server endpoint (hostname or address) used in certificate SANs.
    /// When unset the reconciler waits for the substrate to publish one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Time-to-live in seconds; once elapsed the control plane and its
    /// sub-resources are torn down automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

fn default_replicas() -> u32 {
    3
}

/// Status for a ControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    /// Conditions representing the control plane state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// API server endpoint the certificates were issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Name of the secret holding the admin kubeconfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret: Option<String>,
}

impl ControlPlane {
    /// Whether the TTL has elapsed since creation
    pub fn ttl_expired(&self) -> bool {
        let Some(ttl) = self.spec.ttl_seconds else {
            return false;
        };
        let Some(created) = self.metadata.creation_timestamp.as_ref() else {
            return false;
        };
        let age = Utc::now().signed_duration_since(created.0);
        // a ttl beyond i64 seconds means "practically never"
        age.num_seconds() >= i64::try_from(ttl).unwrap_or(i64::MAX)
    }
}

impl Conditioned for ControlPlane {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn control_plane(ttl: Option<u64>, age_seconds: i64) -> ControlPlane {
        let mut cp = ControlPlane::new(
            "demo",
            ControlPlaneSpec {
                ttl_seconds: ttl,
                ..Default::default()
            },
        );
        cp.metadata.creation_timestamp =
            Some(Time(Utc::now() - chrono::Duration::seconds(age_seconds)));
        cp
    }

    #[test]
    fn ttl_expires_after_elapsed() {
        assert!(control_plane(Some(60), 120).ttl_expired());
        assert!(!control_plane(Some(60), 10).ttl_expired());
    }

    #[test]
    fn missing_ttl_never_expires() {
        assert!(!control_plane(None, 1_000_000).ttl_expired());
    }

    #[test]
    fn oversized_ttl_means_far_future_not_instant_expiry() {
        assert!(!control_plane(Some(u64::MAX), 1_000_000).ttl_expired());
    }
}
