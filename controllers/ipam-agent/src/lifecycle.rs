//! IP lifecycle management.
//!
//! Owns the node's delegated IP pool. Every IP the allocator has handed to
//! this node lives here in exactly one state, and every pod assignment maps
//! back to an IP that is Assigned with a matching owner. All transitions take
//! the writer side of one lock; snapshot reads take the shared side. No lock
//! is held across I/O.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Stable key of a pod network interface, unique within the node.
pub type PodKey = String;

/// Lifecycle state of a delegated IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpState {
    /// Programmed and free for assignment.
    Available,
    /// Held by a pod.
    Assigned,
    /// Delegated, but the dataplane has not caught up to its NC version.
    PendingProgramming,
    /// Marked for reclamation by the allocator.
    PendingRelease,
}

impl fmt::Display for IpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IpState::Available => "Available",
            IpState::Assigned => "Assigned",
            IpState::PendingProgramming => "PendingProgramming",
            IpState::PendingRelease => "PendingRelease",
        };
        f.write_str(name)
    }
}

/// A delegated IP and its current lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfigStatus {
    pub id: String,
    pub address: IpAddr,
    /// Network container the IP belongs to.
    pub nc_id: String,
    /// Container version the IP was delegated at.
    pub nc_version: i64,
    pub state: IpState,
    /// Owning pod; Some iff the state is Assigned.
    pub owner: Option<PodKey>,
}

/// Failures of a pod IP request.
#[derive(Debug, Error)]
pub enum AssignError {
    /// No Available IP in the pool; the pool monitor grows it on the next tick.
    #[error("no available IPs in pool")]
    NoCapacity,

    /// The requested IP is held by a different pod.
    #[error("IP {address} is already assigned to pod {owner}")]
    Conflict { address: IpAddr, owner: PodKey },

    /// The requested IP exists but is in a state that cannot be assigned.
    #[error("IP {address} is {state} and cannot be assigned")]
    Unavailable { address: IpAddr, state: IpState },

    /// The requested IP is not part of this node's pool.
    #[error("requested IP {0} not found in pool")]
    NotFound(IpAddr),
}

/// Store-level failures. Callers must treat these as programmer errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The pod-to-IP index references an id missing from the store.
    #[error("pod {pod} maps to IP id {id} which is not in the store")]
    StoreCorruption { pod: PodKey, id: String },

    /// An assigned IP must not be unilaterally reclaimed.
    #[error("IP {id} is assigned and cannot be marked pending release")]
    InvariantViolation { id: String },
}

/// Partial result of `mark_n_pending_release`: fewer IPs were eligible than
/// requested. The transitioned IPs stay transitioned; the caller publishes
/// what was actually achieved.
#[derive(Debug, Error)]
#[error("marked {got} of {want} requested IPs as pending release")]
pub struct ShortfallError {
    pub got: usize,
    pub want: usize,
    /// The IPs that were transitioned before the pool ran dry.
    pub marked: HashMap<String, IpConfigStatus>,
}

#[derive(Default)]
struct StoreState {
    ips: HashMap<String, IpConfigStatus>,
    pod_assignments: HashMap<PodKey, String>,
}

/// The IP lifecycle manager.
#[derive(Default)]
pub struct IpStateService {
    state: RwLock<StoreState>,
}

impl IpStateService {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().expect("ip store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().expect("ip store lock poisoned")
    }

    /// Assigns an IP to a pod.
    ///
    /// A pod that already holds an assignment gets it back unchanged. With a
    /// desired address, the request succeeds only if that address is free or
    /// already held by the same pod. Without one, any Available IP is taken.
    #[allow(dead_code)] // pod RPC surface
    pub fn assign(
        &self,
        pod: &str,
        desired: Option<IpAddr>,
    ) -> Result<IpConfigStatus, AssignError> {
        let mut state = self.write();
        if let Some(id) = state.pod_assignments.get(pod) {
            if let Some(ip) = state.ips.get(id) {
                debug!(pod, id = %ip.id, "pod already holds an assignment");
                return Ok(ip.clone());
            }
        }
        match desired {
            Some(address) => Self::assign_desired(&mut state, pod, address),
            None => Self::assign_any(&mut state, pod),
        }
    }

    fn assign_desired(
        state: &mut StoreState,
        pod: &str,
        address: IpAddr,
    ) -> Result<IpConfigStatus, AssignError> {
        let id = match state.ips.values().find(|ip| ip.address == address) {
            Some(ip) => ip.id.clone(),
            None => return Err(AssignError::NotFound(address)),
        };
        let ip = state
            .ips
            .get_mut(&id)
            .ok_or(AssignError::NotFound(address))?;
        match ip.state {
            IpState::Assigned if ip.owner.as_deref() == Some(pod) => Ok(ip.clone()),
            IpState::Assigned => Err(AssignError::Conflict {
                address,
                owner: ip.owner.clone().unwrap_or_default(),
            }),
            IpState::Available | IpState::PendingProgramming => {
                ip.state = IpState::Assigned;
                ip.owner = Some(pod.to_string());
                let assigned = ip.clone();
                state.pod_assignments.insert(pod.to_string(), id);
                info!(pod, id = %assigned.id, %address, "assigned requested IP to pod");
                Ok(assigned)
            }
            IpState::PendingRelease => Err(AssignError::Unavailable {
                address,
                state: ip.state,
            }),
        }
    }

    fn assign_any(state: &mut StoreState, pod: &str) -> Result<IpConfigStatus, AssignError> {
        let id = match state.ips.values().find(|ip| ip.state == IpState::Available) {
            Some(ip) => ip.id.clone(),
            None => return Err(AssignError::NoCapacity),
        };
        let ip = state.ips.get_mut(&id).ok_or(AssignError::NoCapacity)?;
        ip.state = IpState::Assigned;
        ip.owner = Some(pod.to_string());
        let assigned = ip.clone();
        state.pod_assignments.insert(pod.to_string(), id);
        info!(pod, id = %assigned.id, address = %assigned.address, "assigned IP to pod");
        Ok(assigned)
    }

    /// Releases a pod's assignment. A pod with no assignment is a no-op.
    #[allow(dead_code)] // pod RPC surface
    pub fn release(&self, pod: &str) -> Result<(), LifecycleError> {
        let mut state = self.write();
        let id = match state.pod_assignments.get(pod) {
            Some(id) => id.clone(),
            None => {
                warn!(pod, "release for pod with no assignment, nothing to do");
                return Ok(());
            }
        };
        let ip = match state.ips.get_mut(&id) {
            Some(ip) => ip,
            None => {
                return Err(LifecycleError::StoreCorruption {
                    pod: pod.to_string(),
                    id,
                })
            }
        };
        ip.state = IpState::Available;
        ip.owner = None;
        let address = ip.address;
        state.pod_assignments.remove(pod);
        info!(pod, id = %id, %address, "released IP from pod");
        Ok(())
    }

    /// Transitions up to `want` IPs to PendingRelease, PendingProgramming
    /// first since those are not dataplane-useful yet. Returns the set that
    /// was actually transitioned; a shortfall does not revert.
    pub fn mark_n_pending_release(
        &self,
        want: usize,
    ) -> Result<HashMap<String, IpConfigStatus>, ShortfallError> {
        let mut state = self.write();
        let mut candidates: Vec<String> = state
            .ips
            .values()
            .filter(|ip| ip.state == IpState::PendingProgramming)
            .map(|ip| ip.id.clone())
            .collect();
        candidates.extend(
            state
                .ips
                .values()
                .filter(|ip| ip.state == IpState::Available)
                .map(|ip| ip.id.clone()),
        );

        let mut marked = HashMap::new();
        for id in candidates.into_iter().take(want) {
            if let Some(ip) = state.ips.get_mut(&id) {
                ip.state = IpState::PendingRelease;
                marked.insert(id, ip.clone());
            }
        }
        info!(marked = marked.len(), want, "marked IPs as pending release");
        if marked.len() < want {
            let got = marked.len();
            return Err(ShortfallError { got, want, marked });
        }
        Ok(marked)
    }

    /// Boot-time helper: re-marks IPs the previous agent incarnation had
    /// already promised to the allocator. The whole batch is validated before
    /// any transition; an Assigned id fails everything.
    pub fn mark_existing_as_pending(&self, ids: &[String]) -> Result<(), LifecycleError> {
        let mut state = self.write();
        for id in ids {
            if let Some(ip) = state.ips.get(id) {
                if ip.state == IpState::Assigned {
                    return Err(LifecycleError::InvariantViolation { id: id.clone() });
                }
            }
        }
        for id in ids {
            match state.ips.get_mut(id) {
                Some(ip) => {
                    info!(id = %id, from = %ip.state, "marking existing IP as pending release");
                    ip.state = IpState::PendingRelease;
                }
                None => {
                    warn!(id = %id, "IP marked pending release upstream but missing from the store");
                }
            }
        }
        Ok(())
    }

    /// Promotes PendingProgramming IPs of the container to Available once the
    /// locally programmed version has reached their NC version. Returns the
    /// number promoted.
    #[allow(dead_code)] // driven by the dataplane version reconciler
    pub fn reconcile_programmed_version(&self, nc_id: &str, host_version: i64) -> usize {
        let mut state = self.write();
        let mut promoted = 0;
        for ip in state.ips.values_mut() {
            if ip.nc_id == nc_id
                && ip.state == IpState::PendingProgramming
                && ip.nc_version <= host_version
            {
                ip.state = IpState::Available;
                promoted += 1;
            }
        }
        if promoted > 0 {
            info!(nc_id, host_version, promoted, "promoted pending-programming IPs to available");
        }
        promoted
    }

    /// Ingests IPs delegated by the allocator. Existing entries keep their
    /// current state.
    #[allow(dead_code)] // driven by the network container ingest path
    pub fn apply_ip_configs(&self, configs: impl IntoIterator<Item = IpConfigStatus>) {
        let mut state = self.write();
        for ip in configs {
            state.ips.entry(ip.id.clone()).or_insert(ip);
        }
    }

    /// Removes IPs the allocator has reclaimed. Only PendingRelease entries
    /// are eligible. Returns the number removed.
    #[allow(dead_code)] // driven by the network container ingest path
    pub fn remove_ip_configs(&self, ids: &[String]) -> usize {
        let mut state = self.write();
        let mut removed = 0;
        for id in ids {
            match state.ips.get(id).map(|ip| ip.state) {
                Some(IpState::PendingRelease) => {
                    state.ips.remove(id);
                    removed += 1;
                }
                Some(other) => {
                    warn!(id = %id, state = %other, "refusing to remove IP that is not pending release");
                }
                None => {}
            }
        }
        removed
    }

    /// Copy of the full IP map.
    pub fn pod_ip_config_state(&self) -> HashMap<String, IpConfigStatus> {
        self.read().ips.clone()
    }

    /// Number of IPs currently in the given state.
    pub fn count_in_state(&self, state: IpState) -> usize {
        self.read().ips.values().filter(|ip| ip.state == state).count()
    }

    /// Number of IPs delegated to the node, in any state.
    pub fn total_ips(&self) -> usize {
        self.read().ips.len()
    }

    /// IDs currently in PendingRelease, sorted for deterministic publishes.
    pub fn pending_release_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .ips
            .values()
            .filter(|ip| ip.state == IpState::PendingRelease)
            .map(|ip| ip.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The IP currently assigned to the pod, if any.
    #[allow(dead_code)] // pod RPC surface
    pub fn assignment_of(&self, pod: &str) -> Option<IpConfigStatus> {
        let state = self.read();
        let id = state.pod_assignments.get(pod)?;
        state.ips.get(id).cloned()
    }
}
