//! Unit tests for the IP lifecycle manager.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use crate::lifecycle::{AssignError, IpState, IpStateService, LifecycleError};
use crate::test_utils::{seeded_service, test_ip};

fn addr(suffix: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 240, 0, suffix))
}

/// Store invariants: one state per id, owner set iff Assigned, and every pod
/// mapping pointing at an Assigned IP owned by that pod.
fn assert_invariants(service: &IpStateService) {
    let ips = service.pod_ip_config_state();
    let mut owners: HashMap<String, String> = HashMap::new();
    for ip in ips.values() {
        match ip.state {
            IpState::Assigned => {
                let owner = ip.owner.clone().expect("assigned IP must have an owner");
                owners.insert(owner, ip.id.clone());
            }
            _ => assert!(
                ip.owner.is_none(),
                "IP {} is {} but has owner {:?}",
                ip.id,
                ip.state,
                ip.owner
            ),
        }
    }
    for (pod, id) in owners {
        let assigned = service
            .assignment_of(&pod)
            .expect("pod mapping must resolve");
        assert_eq!(assigned.id, id);
        assert_eq!(assigned.state, IpState::Assigned);
    }
}

#[test]
fn assign_any_takes_an_available_ip() {
    let service = seeded_service(2, 0, 0, 0);
    let assigned = service.assign("pod-a", None).unwrap();
    assert_eq!(assigned.state, IpState::Assigned);
    assert_eq!(assigned.owner.as_deref(), Some("pod-a"));
    assert_invariants(&service);
}

#[test]
fn assign_is_idempotent_per_pod() {
    let service = seeded_service(2, 0, 0, 0);
    let first = service.assign("pod-a", None).unwrap();
    let second = service.assign("pod-a", None).unwrap();
    assert_eq!(first, second);
    let state = service.pod_ip_config_state();
    assert_eq!(
        state.values().filter(|ip| ip.state == IpState::Assigned).count(),
        1
    );
}

#[test]
fn assign_with_empty_pool_reports_no_capacity() {
    let service = IpStateService::new();
    let err = service.assign("pod-a", None).unwrap_err();
    assert!(matches!(err, AssignError::NoCapacity));
}

#[test]
fn assign_desired_takes_the_named_ip() {
    let service = IpStateService::new();
    service.apply_ip_configs([
        test_ip("ip-0", 0, IpState::Available),
        test_ip("ip-1", 1, IpState::Available),
    ]);
    let assigned = service.assign("pod-a", Some(addr(1))).unwrap();
    assert_eq!(assigned.id, "ip-1");
    assert_invariants(&service);
}

#[test]
fn assign_desired_promotes_pending_programming() {
    let service = IpStateService::new();
    service.apply_ip_configs([test_ip("ip-0", 0, IpState::PendingProgramming)]);
    let assigned = service.assign("pod-a", Some(addr(0))).unwrap();
    assert_eq!(assigned.state, IpState::Assigned);
}

#[test]
fn assign_desired_conflicts_with_other_owner() {
    let service = IpStateService::new();
    service.apply_ip_configs([test_ip("ip-0", 0, IpState::Available)]);
    service.assign("pod-a", Some(addr(0))).unwrap();
    let err = service.assign("pod-b", Some(addr(0))).unwrap_err();
    match err {
        AssignError::Conflict { owner, .. } => assert_eq!(owner, "pod-a"),
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[test]
fn assign_desired_same_owner_is_idempotent() {
    let service = IpStateService::new();
    service.apply_ip_configs([test_ip("ip-0", 0, IpState::Available)]);
    let first = service.assign("pod-a", Some(addr(0))).unwrap();
    let second = service.assign("pod-a", Some(addr(0))).unwrap();
    assert_eq!(first, second);
}

#[test]
fn assign_desired_rejects_pending_release() {
    let service = IpStateService::new();
    service.apply_ip_configs([test_ip("ip-0", 0, IpState::PendingRelease)]);
    let err = service.assign("pod-a", Some(addr(0))).unwrap_err();
    assert!(matches!(err, AssignError::Unavailable { .. }));
}

#[test]
fn assign_desired_unknown_address_is_not_found() {
    let service = seeded_service(1, 0, 0, 0);
    let err = service.assign("pod-a", Some(addr(200))).unwrap_err();
    assert!(matches!(err, AssignError::NotFound(_)));
}

#[test]
fn release_returns_the_ip_to_available() {
    let service = seeded_service(1, 1, 0, 0);
    service.release("pod-0").unwrap();
    assert!(service.assignment_of("pod-0").is_none());
    let state = service.pod_ip_config_state();
    assert!(state.values().all(|ip| ip.state == IpState::Available));
    assert_invariants(&service);
}

#[test]
fn release_without_assignment_is_ok() {
    let service = seeded_service(1, 0, 0, 0);
    assert!(service.release("pod-unknown").is_ok());
}

#[test]
fn mark_n_prefers_pending_programming() {
    let service = seeded_service(3, 0, 2, 0);
    let marked = service.mark_n_pending_release(2).unwrap();
    assert_eq!(marked.len(), 2);
    assert!(marked.keys().all(|id| id.starts_with("prog-")));
    // the available IPs were untouched
    let state = service.pod_ip_config_state();
    assert_eq!(
        state.values().filter(|ip| ip.state == IpState::Available).count(),
        3
    );
}

#[test]
fn mark_n_spills_over_into_available() {
    let service = seeded_service(3, 0, 1, 0);
    let marked = service.mark_n_pending_release(3).unwrap();
    assert_eq!(marked.len(), 3);
    assert!(marked.keys().any(|id| id.starts_with("prog-")));
    assert!(marked.keys().any(|id| id.starts_with("avail-")));
}

#[test]
fn mark_n_shortfall_keeps_partial_set() {
    let service = seeded_service(2, 1, 0, 0);
    let err = service.mark_n_pending_release(5).unwrap_err();
    assert_eq!(err.got, 2);
    assert_eq!(err.want, 5);
    assert_eq!(err.marked.len(), 2);
    // the transitions stick
    assert_eq!(service.pending_release_ids().len(), 2);
    // the assigned IP was never a candidate
    let state = service.pod_ip_config_state();
    assert_eq!(
        state.values().filter(|ip| ip.state == IpState::Assigned).count(),
        1
    );
    assert_invariants(&service);
}

#[test]
fn mark_existing_transitions_non_assigned() {
    let service = seeded_service(2, 0, 1, 0);
    service
        .mark_existing_as_pending(&["avail-0".to_string(), "prog-0".to_string()])
        .unwrap();
    let ids = service.pending_release_ids();
    assert_eq!(ids, vec!["avail-0".to_string(), "prog-0".to_string()]);
}

#[test]
fn mark_existing_fails_whole_batch_on_assigned_ip() {
    let service = seeded_service(2, 1, 0, 0);
    let assigned_id = service.assignment_of("pod-0").unwrap().id;
    let err = service
        .mark_existing_as_pending(&["avail-1".to_string(), assigned_id])
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvariantViolation { .. }));
    // nothing transitioned
    assert!(service.pending_release_ids().is_empty());
}

#[test]
fn mark_existing_skips_unknown_ids() {
    let service = seeded_service(1, 0, 0, 0);
    service
        .mark_existing_as_pending(&["avail-0".to_string(), "ghost".to_string()])
        .unwrap();
    assert_eq!(service.pending_release_ids(), vec!["avail-0".to_string()]);
}

#[test]
fn reconcile_programmed_version_promotes_up_to_host_version() {
    let service = IpStateService::new();
    let mut old = test_ip("ip-old", 0, IpState::PendingProgramming);
    old.nc_version = 1;
    let mut new = test_ip("ip-new", 1, IpState::PendingProgramming);
    new.nc_version = 5;
    service.apply_ip_configs([old, new]);

    let promoted = service.reconcile_programmed_version("nc-0", 3);
    assert_eq!(promoted, 1);
    let state = service.pod_ip_config_state();
    assert_eq!(state["ip-old"].state, IpState::Available);
    assert_eq!(state["ip-new"].state, IpState::PendingProgramming);
}

#[test]
fn reconcile_programmed_version_ignores_other_containers() {
    let service = IpStateService::new();
    let mut other = test_ip("ip-0", 0, IpState::PendingProgramming);
    other.nc_id = "nc-other".to_string();
    service.apply_ip_configs([other]);
    assert_eq!(service.reconcile_programmed_version("nc-0", 10), 0);
}

#[test]
fn remove_only_reclaims_pending_release() {
    let service = seeded_service(1, 0, 0, 2);
    let removed = service.remove_ip_configs(&[
        "rel-0".to_string(),
        "avail-0".to_string(),
        "ghost".to_string(),
    ]);
    assert_eq!(removed, 1);
    let state = service.pod_ip_config_state();
    assert_eq!(state.len(), 2);
    assert!(state.contains_key("avail-0"));
}

/// Invariants hold across an interleaved sequence of every write operation.
#[test]
fn invariants_hold_across_operation_sequences() {
    let service = IpStateService::new();
    let mut configs = Vec::new();
    for i in 0..12u8 {
        let state = if i % 3 == 0 {
            IpState::PendingProgramming
        } else {
            IpState::Available
        };
        configs.push(test_ip(&format!("ip-{i}"), i, state));
    }
    service.apply_ip_configs(configs);
    assert_invariants(&service);

    for i in 0..6 {
        service.assign(&format!("pod-{i}"), None).unwrap();
        assert_invariants(&service);
    }
    service.release("pod-2").unwrap();
    assert_invariants(&service);
    service.release("pod-2").unwrap();
    assert_invariants(&service);

    let marked = match service.mark_n_pending_release(4) {
        Ok(marked) => marked,
        Err(shortfall) => shortfall.marked,
    };
    assert!(!marked.is_empty());
    assert_invariants(&service);

    service.reconcile_programmed_version("nc-0", 10);
    assert_invariants(&service);

    let pending = service.pending_release_ids();
    service.remove_ip_configs(&pending);
    assert_invariants(&service);

    // shrink never marked an assigned IP
    let state = service.pod_ip_config_state();
    for ip in state.values() {
        if ip.state == IpState::Assigned {
            assert!(ip.owner.is_some());
        }
    }
}
