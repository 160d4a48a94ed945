//! Cloud provider abstraction
//!
//! Every infrastructure primitive is discovered and created through this
//! trait, keyed by an ownership tag so repeated runs find what earlier
//! runs made. Reconcilers receive the provider by injection; there is no
//! global client.

mod local;

pub use local::LocalCloud;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_common::Error;

/// Classified provider failures. Reconcilers branch on the kind, never
/// on message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloudErrorKind {
    /// The referenced primitive does not exist
    NotFound,
    /// A primitive with the same identity already exists
    AlreadyExists,
    /// The association being created is already in place
    AlreadyAssociated,
    /// The primitive still has dependents and cannot be deleted yet
    DependencyViolation,
    /// The provider is temporarily unable to act on the primitive
    Busy,
    /// The provider did not answer in time
    Timeout,
    /// The provider endpoint refused the connection
    ConnectionRefused,
    /// The provider endpoint could not be resolved
    Dns,
    /// The request was understood and permanently refused
    Rejected,
}

#[derive(Clone, Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub message: String,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, message)
    }

    pub fn dependency_violation(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::DependencyViolation, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == CloudErrorKind::NotFound
    }

    /// Deletion must be retried later
    pub fn is_dependency_violation(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::DependencyViolation | CloudErrorKind::Busy
        )
    }

    pub fn is_already_associated(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::AlreadyAssociated | CloudErrorKind::AlreadyExists
        )
    }

    /// Network-layer failures that resolve on their own
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            CloudErrorKind::Busy
                | CloudErrorKind::Timeout
                | CloudErrorKind::ConnectionRefused
                | CloudErrorKind::Dns
        )
    }
}

impl From<CloudError> for Error {
    fn from(err: CloudError) -> Self {
        if err.is_transient() {
            Error::waiting(err.to_string())
        } else {
            Error::provider(err.to_string())
        }
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub cidrs: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub zone: String,
    pub cidr: String,
    pub public: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gateway {
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
}

/// Role plus the instance profile the fleet launches under
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub role_id: String,
    pub instance_profile_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fleet {
    pub id: String,
    pub instance_ids: Vec<String>,
    /// DNS name fronting the fleet's API servers
    pub endpoint: String,
}

/// Launch parameters for a compute fleet
#[derive(Clone, Debug)]
pub struct FleetRequest {
    pub instance_type: String,
    pub subnet_ids: Vec<String>,
    pub security_group_id: String,
    pub instance_profile_id: String,
    /// Desired instance count; None means one per subnet
    pub count: Option<usize>,
}

/// Provider operations, all discovery-scoped to the owning substrate.
///
/// `find_*` returns `None` when nothing tagged for the substrate exists.
/// `delete_*` of an id that is already gone returns `NotFound`, which
/// callers treat as success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cloud: Send + Sync {
    async fn find_network(&self, substrate: &str) -> CloudResult<Option<Network>>;
    async fn create_network(&self, substrate: &str, cidrs: &[String]) -> CloudResult<Network>;
    async fn delete_network(&self, id: &str) -> CloudResult<()>;

    async fn find_route_table(&self, substrate: &str, name: &str)
        -> CloudResult<Option<RouteTable>>;
    async fn create_route_table(
        &self,
        substrate: &str,
        name: &str,
        network_id: &str,
    ) -> CloudResult<RouteTable>;
    async fn list_route_tables(&self, substrate: &str) -> CloudResult<Vec<RouteTable>>;
    async fn delete_route_table(&self, id: &str) -> CloudResult<()>;

    async fn find_subnet(&self, substrate: &str, name: &str) -> CloudResult<Option<Subnet>>;
    async fn create_subnet(
        &self,
        substrate: &str,
        name: &str,
        network_id: &str,
        zone: &str,
        cidr: &str,
        public: bool,
    ) -> CloudResult<Subnet>;
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
        -> CloudResult<()>;
    async fn list_subnets(&self, substrate: &str) -> CloudResult<Vec<Subnet>>;
    async fn delete_subnet(&self, id: &str) -> CloudResult<()>;

    async fn find_gateway(&self, substrate: &str) -> CloudResult<Option<Gateway>>;
    async fn create_gateway(&self, substrate: &str, network_id: &str) -> CloudResult<Gateway>;
    async fn delete_gateway(&self, id: &str) -> CloudResult<()>;

    async fn find_nat_gateway(&self, substrate: &str) -> CloudResult<Option<Gateway>>;
    async fn create_nat_gateway(&self, substrate: &str, subnet_id: &str) -> CloudResult<Gateway>;
    async fn delete_nat_gateway(&self, id: &str) -> CloudResult<()>;

    /// Route all external traffic on a route table through a gateway.
    /// Re-routing to the same gateway returns `AlreadyAssociated`.
    async fn attach_gateway_route(
        &self,
        route_table_id: &str,
        gateway_id: &str,
    ) -> CloudResult<()>;

    async fn find_security_group(&self, substrate: &str) -> CloudResult<Option<SecurityGroup>>;
    async fn create_security_group(
        &self,
        substrate: &str,
        network_id: &str,
    ) -> CloudResult<SecurityGroup>;
    async fn delete_security_group(&self, id: &str) -> CloudResult<()>;

    async fn find_identity(&self, substrate: &str) -> CloudResult<Option<Identity>>;
    async fn create_identity(&self, substrate: &str) -> CloudResult<Identity>;
    async fn delete_identity(&self, substrate: &str) -> CloudResult<()>;

    async fn find_fleet(&self, substrate: &str) -> CloudResult<Option<Fleet>>;
    async fn create_fleet(&self, substrate: &str, request: &FleetRequest) -> CloudResult<Fleet>;
    async fn delete_fleet(&self, id: &str) -> CloudResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_map_to_waiting() {
        let err: Error = CloudError::new(CloudErrorKind::ConnectionRefused, "refused").into();
        assert!(err.is_waiting());
        let err: Error = CloudError::new(CloudErrorKind::Rejected, "nope").into();
        assert!(!err.is_waiting());
    }

    #[test]
    fn busy_counts_as_dependency_violation_for_deletes() {
        assert!(CloudError::new(CloudErrorKind::Busy, "busy").is_dependency_violation());
        assert!(CloudError::dependency_violation("in use").is_dependency_violation());
        assert!(!CloudError::not_found("gone").is_dependency_violation());
    }
}
