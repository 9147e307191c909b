//! Pool accounting and scaling math.

use std::collections::HashMap;

use crate::lifecycle::{IpConfigStatus, IpState};

/// Tally of the node's IP pool by lifecycle state, plus the last requested
/// count. Derived; rebuilt from the lifecycle store every reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolState {
    /// IPs assigned to pods.
    pub assigned: i64,
    /// IPs in state Available.
    pub available: i64,
    /// IPs in state PendingProgramming.
    pub pending_programming: i64,
    /// IPs in state PendingRelease.
    pub pending_release: i64,
    /// NC primary IPs present in the NodeNetworkConfig.
    pub primary_ips: i64,
    /// Target pool size last requested from the allocator.
    pub requested: i64,
    /// All IPs delegated to the node.
    pub total: i64,
}

impl PoolState {
    /// Re-tallies from the live IP map. The requested count and primary IP
    /// count carry over; neither is derivable from the map.
    pub fn repopulate(&self, ips: &HashMap<String, IpConfigStatus>) -> PoolState {
        let mut next = PoolState {
            requested: self.requested,
            primary_ips: self.primary_ips,
            total: ips.len() as i64,
            ..PoolState::default()
        };
        for ip in ips.values() {
            match ip.state {
                IpState::Assigned => next.assigned += 1,
                IpState::Available => next.available += 1,
                IpState::PendingProgramming => next.pending_programming += 1,
                IpState::PendingRelease => next.pending_release += 1,
            }
        }
        next
    }

    /// Returns the pool with `requested` moved to the scaler's target,
    /// clamped at the scaler's max.
    pub fn scale(&self, scaler: &ScalerState) -> PoolState {
        let mut target = calculate_target_ip_count(self.assigned, scaler.batch, scaler.buffer);
        if target > scaler.max {
            target = scaler.max;
        }
        PoolState {
            requested: target,
            ..*self
        }
    }

    /// IPs that will be free once the allocator honors the requested count.
    pub fn expected_available(&self) -> i64 {
        self.requested - self.assigned
    }
}

/// Target pool size for the given demand: demand plus buffered headroom,
/// rounded up to the next batch boundary.
pub fn calculate_target_ip_count(demand: i64, batch: i64, buffer: f64) -> i64 {
    batch * (buffer + demand as f64 / batch as f64).ceil() as i64
}

/// Scaler parameters after ingress clamping, plus the exhaustion flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalerState {
    pub batch: i64,
    /// Target free-headroom fraction of a batch, in (0, 1].
    pub buffer: f64,
    pub max: i64,
    pub exhausted: bool,
}

impl ScalerState {
    /// Exhaustion flips the pool into minimum-batch, full-buffer mode: every
    /// assigned IP is kept plus one headroom slot.
    pub fn effective(&self) -> ScalerState {
        if self.exhausted {
            ScalerState {
                batch: 1,
                buffer: 1.0,
                ..*self
            }
        } else {
            *self
        }
    }
}

/// What the monitor should do with the pool this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    Grow,
    Shrink,
    CleanupOnly,
    Idle,
}

/// Decision for one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleDecision {
    pub target: i64,
    pub action: ScaleAction,
}

impl ScaleDecision {
    /// Evaluates the pool against the scaler. `published_not_in_use` is the
    /// ips-not-in-use length of the last spec that was successfully
    /// published; a mismatch with the store's pending-release count means the
    /// allocator has not yet seen every IP marked for reclamation.
    pub fn evaluate(
        pool: &PoolState,
        scaler: &ScalerState,
        published_not_in_use: usize,
    ) -> ScaleDecision {
        let target = pool.scale(scaler).requested;
        let action = if target > pool.requested && pool.requested < scaler.max {
            ScaleAction::Grow
        } else if target < pool.requested {
            ScaleAction::Shrink
        } else if pool.pending_release != published_not_in_use as i64 {
            ScaleAction::CleanupOnly
        } else {
            ScaleAction::Idle
        };
        ScaleDecision { target, action }
    }
}
