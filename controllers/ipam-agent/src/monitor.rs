//! IPAM pool monitor.
//!
//! Long-running loop that sizes the node's IP pool. It ingests
//! NodeNetworkConfig and ClusterSubnetState updates from the watchers,
//! re-tallies the pool from the lifecycle store each tick, and converges the
//! pool on the scaler's target by marking IPs for release and publishing a
//! new desired spec.
//!
//! Ticks are dropped until the first NodeNetworkConfig has been consumed: the
//! scaler parameters and the initial requested count both come from it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crds::{ClusterSubnetState, NcType, NetworkContainer, NodeNetworkConfig, NodeNetworkConfigSpec, Scaler};
use nnc_client::{PublishError, SpecPublisher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::lifecycle::{IpState, IpStateService};
use crate::metrics;
use crate::pool::{PoolState, ScaleAction, ScaleDecision, ScalerState};

/// Default reconcile tick.
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Default maximum allocatable IPs, used when the scaler does not carry one.
pub const DEFAULT_MAX_IPS: i64 = 250;

/// Margin below the tick interval for the publish deadline, so a hung API
/// server cannot stall reconciliation across ticks.
const PUBLISH_DEADLINE_MARGIN: Duration = Duration::from_millis(50);

/// Idle state dumps are emitted once per this many reconcile passes.
const STATE_LOG_DOWNSAMPLE: u32 = 30;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub refresh_delay: Duration,
    pub max_ips: i64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            refresh_delay: DEFAULT_REFRESH_DELAY,
            max_ips: DEFAULT_MAX_IPS,
        }
    }
}

impl MonitorOptions {
    fn sanitized(mut self) -> Self {
        if self.refresh_delay.is_zero() {
            self.refresh_delay = DEFAULT_REFRESH_DELAY;
        }
        if self.max_ips < 1 {
            self.max_ips = DEFAULT_MAX_IPS;
        }
        self
    }
}

/// Subnet identity, used only as metric and log labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetInfo {
    pub name: String,
    pub cidr: String,
    pub arm_id: String,
}

/// Externally readable monitor state: the last consistent
/// (scaler, subnet, spec) tuple, refreshed once per loop pass.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub minimum_free_ips: i64,
    pub maximum_free_ips: i64,
    pub updating_ips_not_in_use: usize,
    pub spec: NodeNetworkConfigSpec,
    pub subnet: SubnetInfo,
}

/// The IPAM pool monitor.
pub struct PoolMonitor<P> {
    opts: MonitorOptions,
    pool: PoolState,
    scaler: ScalerState,
    subnet: SubnetInfo,
    /// Last successfully published spec (seeded from the first NNC).
    published: NodeNetworkConfigSpec,
    /// IPs marked PendingRelease whose publish has not yet succeeded. A
    /// nonzero count suppresses further marking so a failed publish cannot
    /// drain the pool on retries.
    pending_unpublished: usize,
    publisher: P,
    ips: Arc<IpStateService>,
    nnc_rx: mpsc::Receiver<NodeNetworkConfig>,
    css_rx: mpsc::Receiver<ClusterSubnetState>,
    shared: Arc<RwLock<MonitorState>>,
    statelog_downsample: u32,
}

/// Producer-side handle to the monitor: watchers push resource updates
/// through this, and external readers take state snapshots.
#[derive(Clone)]
pub struct MonitorHandle {
    nnc_tx: mpsc::Sender<NodeNetworkConfig>,
    css_tx: mpsc::Sender<ClusterSubnetState>,
    ips: Arc<IpStateService>,
    max_ips: i64,
    shared: Arc<RwLock<MonitorState>>,
}

impl<P: SpecPublisher> PoolMonitor<P> {
    pub fn new(
        ips: Arc<IpStateService>,
        publisher: P,
        opts: MonitorOptions,
    ) -> (Self, MonitorHandle) {
        let opts = opts.sanitized();
        let (nnc_tx, nnc_rx) = mpsc::channel(1);
        let (css_tx, css_rx) = mpsc::channel(1);
        let shared = Arc::new(RwLock::new(MonitorState::default()));
        let handle = MonitorHandle {
            nnc_tx,
            css_tx,
            ips: ips.clone(),
            max_ips: opts.max_ips,
            shared: shared.clone(),
        };
        let monitor = Self {
            scaler: ScalerState {
                batch: 1,
                buffer: 1.0,
                max: opts.max_ips,
                exhausted: false,
            },
            opts,
            pool: PoolState::default(),
            subnet: SubnetInfo::default(),
            published: NodeNetworkConfigSpec::default(),
            pending_unpublished: 0,
            publisher,
            ips,
            nnc_rx,
            css_rx,
            shared,
            statelog_downsample: 0,
        };
        (monitor, handle)
    }

    /// Runs the pool reconcile loop until cancellation.
    ///
    /// Ticks are dropped and exhaustion updates are recorded but not acted
    /// upon until the first NodeNetworkConfig arrives. All reconcile errors
    /// are logged and absorbed; the next tick retries from fresh state.
    pub async fn start(mut self, shutdown: CancellationToken) -> Result<(), AgentError> {
        info!("starting IPAM pool monitor");
        let mut ticker = tokio::time::interval(self.opts.refresh_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut started = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("pool monitor shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if !started {
                        continue;
                    }
                }
                css = self.css_rx.recv() => {
                    let Some(css) = css else {
                        return Err(AgentError::Watch("cluster subnet state channel closed".to_string()));
                    };
                    self.ingest_subnet_state(&css);
                    if !started {
                        continue;
                    }
                }
                nnc = self.nnc_rx.recv() => {
                    let Some(nnc) = nnc else {
                        return Err(AgentError::Watch("node network config channel closed".to_string()));
                    };
                    if let Err(err) = self.ingest_nnc(&nnc, &mut started) {
                        error!(%err, "rejecting NodeNetworkConfig update");
                        continue;
                    }
                }
            }
            if let Err(err) = self.reconcile().await {
                warn!(%err, "reconcile failed, will retry next tick");
            }
            self.refresh_state_snapshot();
        }
    }

    fn ingest_subnet_state(&mut self, css: &ClusterSubnetState) {
        let exhausted = css.status.as_ref().map(|s| s.exhausted).unwrap_or_default();
        if exhausted != self.scaler.exhausted {
            info!(exhausted, "cluster subnet exhaustion state changed");
        }
        self.scaler.exhausted = exhausted;
        metrics::count_exhaustion_signal(&self.subnet, exhausted);
    }

    /// Extracts the scaler, subnet identity, and primary IP count from a
    /// NodeNetworkConfig. The first update additionally seeds the requested
    /// count and opens the startup gate.
    fn ingest_nnc(
        &mut self,
        nnc: &NodeNetworkConfig,
        started: &mut bool,
    ) -> Result<(), AgentError> {
        if let Some(status) = nnc.status.as_ref() {
            if let Some(nc) = status.network_containers.first() {
                self.subnet = SubnetInfo {
                    name: nc.subnet_name.clone(),
                    cidr: nc.subnet_address_space.clone(),
                    arm_id: generate_arm_id(nc),
                };
            }
            if !status.network_containers.is_empty() {
                let mut primary_ips = 0;
                for nc in &status.network_containers {
                    match nc.nc_type {
                        NcType::Unspecified | NcType::Vnet => primary_ips += 1,
                        NcType::VnetBlock => {
                            if nc.primary_ip.parse::<ipnet::IpNet>().is_err() {
                                return Err(AgentError::InvalidPrimaryIp(nc.primary_ip.clone()));
                            }
                            primary_ips += 1;
                        }
                    }
                }
                self.pool.primary_ips = primary_ips;
            }
            let scaler = &status.scaler;
            self.scaler.batch = scaler.batch_size;
            self.scaler.max = scaler.max_ip_count;
            self.scaler.buffer = scaler.request_threshold_percent as f64 / 100.0;
        }
        if !*started {
            // The initial requested count comes from the first update only;
            // from here on this monitor owns the value.
            self.pool.requested = nnc.spec.requested_ip_count;
            self.published = nnc.spec.clone();
            *started = true;
            info!(requested = self.pool.requested, "pool monitor started");
        }
        Ok(())
    }

    /// One reconcile pass: re-tally the pool, decide, act.
    pub(crate) async fn reconcile(&mut self) -> Result<(), AgentError> {
        let ips = self.ips.pod_ip_config_state();
        self.pool = self.pool.repopulate(&ips);
        metrics::observe_pool_state(&self.pool, &self.scaler, &self.subnet);

        let scaler = self.scaler.effective();
        let decision =
            ScaleDecision::evaluate(&self.pool, &scaler, self.published.ips_not_in_use.len());
        match decision.action {
            ScaleAction::Grow => {
                info!(pool = ?self.pool, target = decision.target, "increasing pool size");
                self.increase_pool_size(decision.target).await
            }
            ScaleAction::Shrink => {
                info!(pool = ?self.pool, target = decision.target, "decreasing pool size");
                self.decrease_pool_size(decision.target).await
            }
            ScaleAction::CleanupOnly => {
                info!(pool = ?self.pool, "republishing pending release IPs");
                self.clean_pending_release().await
            }
            ScaleAction::Idle => {
                self.statelog_downsample = (self.statelog_downsample + 1) % STATE_LOG_DOWNSAMPLE;
                if self.statelog_downsample == 0 {
                    if self.pool.assigned == 0 {
                        info!(pool = ?self.pool, "no IPs assigned to pods");
                    } else {
                        info!(pool = ?self.pool, "pool monitor state");
                    }
                }
                Ok(())
            }
        }
    }

    async fn increase_pool_size(&mut self, target: i64) -> Result<(), AgentError> {
        let spec = self.build_spec(target);
        self.publish(&spec).await?;
        info!(requested = spec.requested_ip_count, "increased pool size");
        metrics::start_pool_increase_timer();
        self.pool.requested = target;
        self.record_published(spec);
        Ok(())
    }

    async fn decrease_pool_size(&mut self, target: i64) -> Result<(), AgentError> {
        let decrease_by = (self.pool.requested - target) as usize;
        // Skip marking while a previous cycle's marks are still unpublished;
        // republishing those must not drain more of the pool.
        if self.pending_unpublished == 0 {
            info!(decrease_by, "marking IPs as pending release");
            let marked = match self.ips.mark_n_pending_release(decrease_by) {
                Ok(marked) => marked,
                Err(shortfall) => {
                    warn!(%shortfall, "fewer IPs eligible for release than requested");
                    shortfall.marked
                }
            };
            self.pending_unpublished = marked.len();
        }
        let new_requested = self.pool.requested - self.pending_unpublished as i64;
        let spec = self.build_spec(new_requested);
        if spec == self.published {
            // nothing eligible was marked and the allocator already has this
            // spec; wait for it to reclaim before stepping down further
            debug!(requested = new_requested, "no achievable decrease this tick");
            self.pending_unpublished = 0;
            return Ok(());
        }
        self.publish(&spec).await?;
        info!(
            requested = new_requested,
            released = self.pending_unpublished,
            "decreased pool size"
        );
        metrics::start_pool_decrease_timer();
        self.pool.requested = new_requested;
        self.record_published(spec);
        Ok(())
    }

    /// Republishes the current pending-release set under the unchanged
    /// requested count, after the allocator has reclaimed (or the store has
    /// gained) pending IPs since the last publish.
    async fn clean_pending_release(&mut self) -> Result<(), AgentError> {
        let spec = self.build_spec(self.pool.requested);
        self.publish(&spec).await?;
        info!(not_in_use = spec.ips_not_in_use.len(), "published pending release IPs");
        self.record_published(spec);
        Ok(())
    }

    /// Materializes a full desired spec: the requested count plus every IP
    /// currently pending release (set semantics, never a diff).
    fn build_spec(&self, requested: i64) -> NodeNetworkConfigSpec {
        NodeNetworkConfigSpec {
            requested_ip_count: requested,
            ips_not_in_use: self.ips.pending_release_ids(),
        }
    }

    fn record_published(&mut self, spec: NodeNetworkConfigSpec) {
        self.published = spec;
        self.pending_unpublished = 0;
    }

    async fn publish(&self, spec: &NodeNetworkConfigSpec) -> Result<(), AgentError> {
        let deadline = self
            .opts
            .refresh_delay
            .saturating_sub(PUBLISH_DEADLINE_MARGIN)
            .max(PUBLISH_DEADLINE_MARGIN);
        match tokio::time::timeout(deadline, self.publisher.update_spec(spec)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err @ PublishError::Permanent(_))) => {
                error!(%err, "desired spec rejected by the API server");
                Err(AgentError::Publish(err))
            }
            Ok(Err(err)) => Err(AgentError::Publish(err)),
            Err(_) => Err(AgentError::PublishTimeout(deadline)),
        }
    }

    fn refresh_state_snapshot(&self) {
        let spec = self.build_spec(self.pool.requested);
        let state = MonitorState {
            minimum_free_ips: (self.scaler.batch as f64 * self.scaler.buffer) as i64,
            maximum_free_ips: (self.scaler.batch as f64 * (self.scaler.buffer + 1.0)) as i64,
            updating_ips_not_in_use: spec.ips_not_in_use.len(),
            spec,
            subnet: self.subnet.clone(),
        };
        *self.shared.write().expect("monitor state lock poisoned") = state;
    }
}

impl MonitorHandle {
    /// Ingests a NodeNetworkConfig: clamps the scaler, observes scale latency
    /// if the pool has converged, and forwards it to the monitor loop. The
    /// first delivered update opens the monitor's startup gate.
    pub async fn update(&self, mut nnc: NodeNetworkConfig) -> Result<(), AgentError> {
        if let Some(status) = nnc.status.as_mut() {
            clamp_scaler(&mut status.scaler, self.max_ips);
        }
        let pending_release = self.ips.count_in_state(IpState::PendingRelease) as i64;
        let allocated = self.ips.total_ips() as i64 - pending_release;
        if nnc.spec.requested_ip_count == allocated {
            metrics::observe_pool_scale_latency();
        }
        debug!(allocated, "forwarding NodeNetworkConfig update to pool monitor");
        self.nnc_tx
            .send(nnc)
            .await
            .map_err(|_| AgentError::MonitorStopped)
    }

    /// Forwards a cluster subnet exhaustion update to the monitor loop.
    pub async fn update_exhaustion(&self, css: ClusterSubnetState) -> Result<(), AgentError> {
        self.css_tx
            .send(css)
            .await
            .map_err(|_| AgentError::MonitorStopped)
    }

    /// Latest consistent (scaler, subnet, spec) tuple.
    #[allow(dead_code)] // served by the state dump endpoint
    pub fn state_snapshot(&self) -> MonitorState {
        self.shared
            .read()
            .expect("monitor state lock poisoned")
            .clone()
    }
}

/// Coerces nonsensical control-plane scaler values into a safe, if
/// suboptimal, regime.
pub(crate) fn clamp_scaler(scaler: &mut Scaler, default_max: i64) {
    if scaler.max_ip_count < 1 {
        scaler.max_ip_count = default_max;
    }
    if scaler.batch_size < 1 {
        scaler.batch_size = 1;
    }
    if scaler.batch_size > scaler.max_ip_count {
        scaler.batch_size = scaler.max_ip_count;
    }
    if scaler.request_threshold_percent < 1 {
        scaler.request_threshold_percent = 1;
    }
    if scaler.request_threshold_percent > 100 {
        scaler.request_threshold_percent = 100;
    }
    if scaler.release_threshold_percent < scaler.request_threshold_percent + 100 {
        scaler.release_threshold_percent = scaler.request_threshold_percent + 100;
    }
}

/// Formats the subnet ARM ID used as a metric label. Empty if any component
/// of the identity is missing.
pub(crate) fn generate_arm_id(nc: &NetworkContainer) -> String {
    if nc.subscription_id.is_empty()
        || nc.resource_group_id.is_empty()
        || nc.vnet_id.is_empty()
        || nc.subnet_id.is_empty()
    {
        return String::new();
    }
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
        nc.subscription_id, nc.resource_group_id, nc.vnet_id, nc.subnet_id
    )
}
