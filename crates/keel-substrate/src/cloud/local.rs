//! In-memory cloud provider
//!
//! Backs `keelctl` when no real provider is configured and stands in for
//! one in tests. Honors the same discovery and dependency rules a real
//! provider enforces: primitives are found by owning substrate, and a
//! delete fails with `DependencyViolation` while dependents exist.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use super::{
    Cloud, CloudError, CloudErrorKind, CloudResult, Fleet, FleetRequest, Gateway, Identity,
    Network, RouteTable, SecurityGroup, Subnet,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct NetworkRecord {
    substrate: String,
    network: Network,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RouteTableRecord {
    substrate: String,
    network_id: String,
    table: RouteTable,
    #[serde(default)]
    gateway_route: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SubnetRecord {
    substrate: String,
    network_id: String,
    subnet: Subnet,
    route_table_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GatewayRecord {
    substrate: String,
    network_id: String,
    gateway: Gateway,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct NatGatewayRecord {
    substrate: String,
    subnet_id: String,
    gateway: Gateway,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SecurityGroupRecord {
    substrate: String,
    network_id: String,
    group: SecurityGroup,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FleetRecord {
    substrate: String,
    subnet_ids: Vec<String>,
    security_group_id: String,
    fleet: Fleet,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct State {
    next_id: u64,
    networks: HashMap<String, NetworkRecord>,
    route_tables: HashMap<String, RouteTableRecord>,
    subnets: HashMap<String, SubnetRecord>,
    gateways: HashMap<String, GatewayRecord>,
    nat_gateways: HashMap<String, NatGatewayRecord>,
    security_groups: HashMap<String, SecurityGroupRecord>,
    identities: HashMap<String, Identity>,
    fleets: HashMap<String, FleetRecord>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }
}

/// In-memory provider, optionally persisted to a JSON state file so a
/// later `keelctl delete` sees what `keelctl bootstrap` created.
pub struct LocalCloud {
    state: Mutex<State>,
    state_file: Option<PathBuf>,
    api_calls: AtomicUsize,
}

impl Default for LocalCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            state_file: None,
            api_calls: AtomicUsize::new(0),
        }
    }

    /// Load state from `path` if it exists; mutations are written back.
    pub fn with_state_file(path: impl Into<PathBuf>) -> CloudResult<Self> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CloudError::new(
                    CloudErrorKind::Rejected,
                    format!("unreadable state file {}: {}", path.display(), e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => {
                return Err(CloudError::new(
                    CloudErrorKind::Rejected,
                    format!("reading state file {}: {}", path.display(), e),
                ))
            }
        };
        Ok(Self {
            state: Mutex::new(state),
            state_file: Some(path),
            api_calls: AtomicUsize::new(0),
        })
    }

    /// Total provider calls made, for bounded-retry assertions
    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::Relaxed)
    }

    /// True when nothing remains for any substrate
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.networks.is_empty()
            && state.route_tables.is_empty()
            && state.subnets.is_empty()
            && state.gateways.is_empty()
            && state.nat_gateways.is_empty()
            && state.security_groups.is_empty()
            && state.identities.is_empty()
            && state.fleets.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &State) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    debug!(path = %path.display(), error = %e, "failed to persist state");
                }
            }
            Err(e) => debug!(error = %e, "failed to serialize state"),
        }
    }
}

#[async_trait]
impl Cloud for LocalCloud {
    async fn find_network(&self, substrate: &str) -> CloudResult<Option<Network>> {
        let state = self.lock();
        Ok(state
            .networks
            .values()
            .find(|r| r.substrate == substrate)
            .map(|r| r.network.clone()))
    }

    async fn create_network(&self, substrate: &str, cidrs: &[String]) -> CloudResult<Network> {
        let mut state = self.lock();
        let id = state.next_id("net");
        let network = Network {
            id: id.clone(),
            cidrs: cidrs.to_vec(),
        };
        state.networks.insert(
            id,
            NetworkRecord {
                substrate: substrate.to_string(),
                network: network.clone(),
            },
        );
        self.persist(&state);
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if !state.networks.contains_key(id) {
            return Err(CloudError::not_found(format!("network {}", id)));
        }
        let has_dependents = state.route_tables.values().any(|r| r.network_id == id)
            || state.subnets.values().any(|r| r.network_id == id)
            || state.gateways.values().any(|r| r.network_id == id)
            || state.security_groups.values().any(|r| r.network_id == id);
        if has_dependents {
            return Err(CloudError::dependency_violation(format!(
                "network {} has dependents",
                id
            )));
        }
        state.networks.remove(id);
        self.persist(&state);
        Ok(())
    }

    async fn find_route_table(
        &self,
        substrate: &str,
        name: &str,
    ) -> CloudResult<Option<RouteTable>> {
        let state = self.lock();
        Ok(state
            .route_tables
            .values()
            .find(|r| r.substrate == substrate && r.table.name == name)
            .map(|r| r.table.clone()))
    }

    async fn create_route_table(
        &self,
        substrate: &str,
        name: &str,
        network_id: &str,
    ) -> CloudResult<RouteTable> {
        let mut state = self.lock();
        if !state.networks.contains_key(network_id) {
            return Err(CloudError::not_found(format!("network {}", network_id)));
        }
        let id = state.next_id("rtb");
        let table = RouteTable {
            id: id.clone(),
            name: name.to_string(),
        };
        state.route_tables.insert(
            id,
            RouteTableRecord {
                substrate: substrate.to_string(),
                network_id: network_id.to_string(),
                table: table.clone(),
                gateway_route: None,
            },
        );
        self.persist(&state);
        Ok(table)
    }

    async fn list_route_tables(&self, substrate: &str) -> CloudResult<Vec<RouteTable>> {
        let state = self.lock();
        Ok(state
            .route_tables
            .values()
            .filter(|r| r.substrate == substrate)
            .map(|r| r.table.clone())
            .collect())
    }

    async fn delete_route_table(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if !state.route_tables.contains_key(id) {
            return Err(CloudError::not_found(format!("route table {}", id)));
        }
        if state
            .subnets
            .values()
            .any(|r| r.route_table_id.as_deref() == Some(id))
        {
            return Err(CloudError::dependency_violation(format!(
                "route table {} still associated",
                id
            )));
        }
        state.route_tables.remove(id);
        self.persist(&state);
        Ok(())
    }

    async fn find_subnet(&self, substrate: &str, name: &str) -> CloudResult<Option<Subnet>> {
        let state = self.lock();
        Ok(state
            .subnets
            .values()
            .find(|r| r.substrate == substrate && r.subnet.name == name)
            .map(|r| r.subnet.clone()))
    }

    async fn create_subnet(
        &self,
        substrate: &str,
        name: &str,
        network_id: &str,
        zone: &str,
        cidr: &str,
        public: bool,
    ) -> CloudResult<Subnet> {
        let mut state = self.lock();
        if !state.networks.contains_key(network_id) {
            return Err(CloudError::not_found(format!("network {}", network_id)));
        }
        let id = state.next_id("subnet");
        let subnet = Subnet {
            id: id.clone(),
            name: name.to_string(),
            zone: zone.to_string(),
            cidr: cidr.to_string(),
            public,
        };
        state.subnets.insert(
            id,
            SubnetRecord {
                substrate: substrate.to_string(),
                network_id: network_id.to_string(),
                subnet: subnet.clone(),
                route_table_id: None,
            },
        );
        self.persist(&state);
        Ok(subnet)
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        if !state.route_tables.contains_key(route_table_id) {
            return Err(CloudError::not_found(format!(
                "route table {}",
                route_table_id
            )));
        }
        let Some(record) = state.subnets.get_mut(subnet_id) else {
            return Err(CloudError::not_found(format!("subnet {}", subnet_id)));
        };
        if record.route_table_id.as_deref() == Some(route_table_id) {
            return Err(CloudError::new(
                CloudErrorKind::AlreadyAssociated,
                format!("subnet {} already associated", subnet_id),
            ));
        }
        record.route_table_id = Some(route_table_id.to_string());
        self.persist(&state);
        Ok(())
    }

    async fn list_subnets(&self, substrate: &str) -> CloudResult<Vec<Subnet>> {
        let state = self.lock();
        Ok(state
            .subnets
            .values()
            .filter(|r| r.substrate == substrate)
            .map(|r| r.subnet.clone())
            .collect())
    }

    async fn delete_subnet(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if !state.subnets.contains_key(id) {
            return Err(CloudError::not_found(format!("subnet {}", id)));
        }
        let has_dependents = state.nat_gateways.values().any(|r| r.subnet_id == id)
            || state
                .fleets
                .values()
                .any(|r| r.subnet_ids.iter().any(|s| s == id));
        if has_dependents {
            return Err(CloudError::dependency_violation(format!(
                "subnet {} has dependents",
                id
            )));
        }
        state.subnets.remove(id);
        self.persist(&state);
        Ok(())
    }

    async fn find_gateway(&self, substrate: &str) -> CloudResult<Option<Gateway>> {
        let state = self.lock();
        Ok(state
            .gateways
            .values()
            .find(|r| r.substrate == substrate)
            .map(|r| r.gateway.clone()))
    }

    async fn create_gateway(&self, substrate: &str, network_id: &str) -> CloudResult<Gateway> {
        let mut state = self.lock();
        if !state.networks.contains_key(network_id) {
            return Err(CloudError::not_found(format!("network {}", network_id)));
        }
        let id = state.next_id("igw");
        let gateway = Gateway { id: id.clone() };
        state.gateways.insert(
            id,
            GatewayRecord {
                substrate: substrate.to_string(),
                network_id: network_id.to_string(),
                gateway: gateway.clone(),
            },
        );
        self.persist(&state);
        Ok(gateway)
    }

    async fn delete_gateway(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if state.gateways.remove(id).is_none() {
            return Err(CloudError::not_found(format!("gateway {}", id)));
        }
        self.persist(&state);
        Ok(())
    }

    async fn find_nat_gateway(&self, substrate: &str) -> CloudResult<Option<Gateway>> {
        let state = self.lock();
        Ok(state
            .nat_gateways
            .values()
            .find(|r| r.substrate == substrate)
            .map(|r| r.gateway.clone()))
    }

    async fn create_nat_gateway(&self, substrate: &str, subnet_id: &str) -> CloudResult<Gateway> {
        let mut state = self.lock();
        if !state.subnets.contains_key(subnet_id) {
            return Err(CloudError::not_found(format!("subnet {}", subnet_id)));
        }
        let id = state.next_id("nat");
        let gateway = Gateway { id: id.clone() };
        state.nat_gateways.insert(
            id,
            NatGatewayRecord {
                substrate: substrate.to_string(),
                subnet_id: subnet_id.to_string(),
                gateway: gateway.clone(),
            },
        );
        self.persist(&state);
        Ok(gateway)
    }

    async fn delete_nat_gateway(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if state.nat_gateways.remove(id).is_none() {
            return Err(CloudError::not_found(format!("nat gateway {}", id)));
        }
        self.persist(&state);
        Ok(())
    }

    async fn attach_gateway_route(
        &self,
        route_table_id: &str,
        gateway_id: &str,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        if !state.gateways.contains_key(gateway_id) && !state.nat_gateways.contains_key(gateway_id)
        {
            return Err(CloudError::not_found(format!("gateway {}", gateway_id)));
        }
        let Some(record) = state.route_tables.get_mut(route_table_id) else {
            return Err(CloudError::not_found(format!(
                "route table {}",
                route_table_id
            )));
        };
        if record.gateway_route.as_deref() == Some(gateway_id) {
            return Err(CloudError::new(
                CloudErrorKind::AlreadyAssociated,
                format!("route table {} already routes to {}", route_table_id, gateway_id),
            ));
        }
        record.gateway_route = Some(gateway_id.to_string());
        self.persist(&state);
        Ok(())
    }

    async fn find_security_group(&self, substrate: &str) -> CloudResult<Option<SecurityGroup>> {
        let state = self.lock();
        Ok(state
            .security_groups
            .values()
            .find(|r| r.substrate == substrate)
            .map(|r| r.group.clone()))
    }

    async fn create_security_group(
        &self,
        substrate: &str,
        network_id: &str,
    ) -> CloudResult<SecurityGroup> {
        let mut state = self.lock();
        if !state.networks.contains_key(network_id) {
            return Err(CloudError::not_found(format!("network {}", network_id)));
        }
        let id = state.next_id("sg");
        let group = SecurityGroup { id: id.clone() };
        state.security_groups.insert(
            id,
            SecurityGroupRecord {
                substrate: substrate.to_string(),
                network_id: network_id.to_string(),
                group: group.clone(),
            },
        );
        self.persist(&state);
        Ok(group)
    }

    async fn delete_security_group(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if !state.security_groups.contains_key(id) {
            return Err(CloudError::not_found(format!("security group {}", id)));
        }
        if state
            .fleets
            .values()
            .any(|r| r.security_group_id == id)
        {
            return Err(CloudError::dependency_violation(format!(
                "security group {} in use",
                id
            )));
        }
        state.security_groups.remove(id);
        self.persist(&state);
        Ok(())
    }

    async fn find_identity(&self, substrate: &str) -> CloudResult<Option<Identity>> {
        let state = self.lock();
        Ok(state.identities.get(substrate).cloned())
    }

    async fn create_identity(&self, substrate: &str) -> CloudResult<Identity> {
        let mut state = self.lock();
        let role_id = state.next_id("role");
        let instance_profile_id = state.next_id("profile");
        let identity = Identity {
            role_id,
            instance_profile_id,
        };
        state
            .identities
            .insert(substrate.to_string(), identity.clone());
        self.persist(&state);
        Ok(identity)
    }

    async fn delete_identity(&self, substrate: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if state.identities.remove(substrate).is_none() {
            return Err(CloudError::not_found(format!("identity {}", substrate)));
        }
        self.persist(&state);
        Ok(())
    }

    async fn find_fleet(&self, substrate: &str) -> CloudResult<Option<Fleet>> {
        let state = self.lock();
        Ok(state
            .fleets
            .values()
            .find(|r| r.substrate == substrate)
            .map(|r| r.fleet.clone()))
    }

    async fn create_fleet(&self, substrate: &str, request: &FleetRequest) -> CloudResult<Fleet> {
        let mut state = self.lock();
        for subnet_id in &request.subnet_ids {
            if !state.subnets.contains_key(subnet_id) {
                return Err(CloudError::not_found(format!("subnet {}", subnet_id)));
            }
        }
        if !state
            .security_groups
            .contains_key(&request.security_group_id)
        {
            return Err(CloudError::not_found(format!(
                "security group {}",
                request.security_group_id
            )));
        }
        let id = state.next_id("fleet");
        let instances = request.count.unwrap_or(request.subnet_ids.len());
        let instance_ids = (0..instances).map(|_| state.next_id("i")).collect();
        let fleet = Fleet {
            id: id.clone(),
            instance_ids,
            endpoint: format!("{}-api.keel.local", substrate),
        };
        state.fleets.insert(
            id,
            FleetRecord {
                substrate: substrate.to_string(),
                subnet_ids: request.subnet_ids.clone(),
                security_group_id: request.security_group_id.clone(),
                fleet: fleet.clone(),
            },
        );
        self.persist(&state);
        Ok(fleet)
    }

    async fn delete_fleet(&self, id: &str) -> CloudResult<()> {
        let mut state = self.lock();
        if state.fleets.remove(id).is_none() {
            return Err(CloudError::not_found(format!("fleet {}", id)));
        }
        self.persist(&state);
        Ok(())
    }
}
