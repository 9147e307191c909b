//! Prometheus metrics for the IPAM pool monitor.
//!
//! All pool gauges share the subnet identity label set so dashboards can
//! slice per subnet. The scale-latency histogram is fed by a start/observe
//! timer pair: a timer starts when the monitor resizes the pool and is
//! observed when the allocator converges on the requested count.

use std::sync::Mutex;
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::monitor::SubnetInfo;
use crate::pool::{PoolState, ScalerState};

const SUBNET_LABELS: &[&str] = &["subnet", "subnet_cidr", "podnet_arm_id"];

fn subnet_gauge(name: &str, help: &str) -> GaugeVec {
    let gauge = GaugeVec::new(Opts::new(name, help), SUBNET_LABELS).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

lazy_static! {
    /// Registry holding every IPAM metric; exposed through `export()`.
    pub static ref REGISTRY: Registry = Registry::new();

    static ref IPAM_ASSIGNED_IPS: GaugeVec =
        subnet_gauge("ipam_pod_assigned_ips", "Count of IPs assigned to pods.");
    static ref IPAM_AVAILABLE_IPS: GaugeVec =
        subnet_gauge("ipam_available_ips", "Available IP count.");
    static ref IPAM_BATCH_SIZE: GaugeVec =
        subnet_gauge("ipam_batch_size", "IP pool batch size.");
    static ref IPAM_EXPECTED_AVAILABLE_IPS: GaugeVec = subnet_gauge(
        "ipam_expected_available_ips",
        "Future available IP count assuming the requested count is honored.",
    );
    static ref IPAM_MAX_IPS: GaugeVec =
        subnet_gauge("ipam_max_ips", "Maximum IP count.");
    static ref IPAM_PENDING_PROGRAMMING_IPS: GaugeVec =
        subnet_gauge("ipam_pending_programming_ips", "Pending programming IP count.");
    static ref IPAM_PENDING_RELEASE_IPS: GaugeVec =
        subnet_gauge("ipam_pending_release_ips", "Pending release IP count.");
    static ref IPAM_PRIMARY_IPS: GaugeVec =
        subnet_gauge("ipam_primary_ips", "NC primary IP count.");
    static ref IPAM_REQUESTED_IPS: GaugeVec =
        subnet_gauge("ipam_requested_ips", "Requested IP count.");
    static ref IPAM_TOTAL_IPS: GaugeVec =
        subnet_gauge("ipam_total_ips", "Count of all IPs delegated to the node.");
    static ref IPAM_SUBNET_EXHAUSTION_STATE: GaugeVec = subnet_gauge(
        "ipam_subnet_exhaustion_state",
        "Pool monitor view of subnet exhaustion: 1 exhausted, 0 not.",
    );
    static ref IPAM_SUBNET_EXHAUSTION_COUNT: CounterVec = {
        let counter = CounterVec::new(
            Opts::new(
                "ipam_subnet_exhaustion_state_count_total",
                "Count of subnet exhaustion signals seen by the pool monitor.",
            ),
            &["subnet", "subnet_cidr", "podnet_arm_id", "subnet_exhaustion_state"],
        )
        .unwrap();
        REGISTRY.register(Box::new(counter.clone())).unwrap();
        counter
    };
    static ref IPAM_POOL_SCALE_LATENCY: HistogramVec = {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                "ipam_pool_scale_latency_seconds",
                "Elapsed time from a pool resize to allocator convergence.",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["operation"],
        )
        .unwrap();
        REGISTRY.register(Box::new(histogram.clone())).unwrap();
        histogram
    };

    static ref SCALE_TIMER: Mutex<Option<ScaleTimer>> = Mutex::new(None);
}

struct ScaleTimer {
    started: Instant,
    operation: &'static str,
}

/// Starts the scale-latency timer for a pool increase.
pub fn start_pool_increase_timer() {
    start_timer("grow");
}

/// Starts the scale-latency timer for a pool decrease.
pub fn start_pool_decrease_timer() {
    start_timer("shrink");
}

fn start_timer(operation: &'static str) {
    let mut timer = SCALE_TIMER.lock().expect("scale timer lock poisoned");
    // an in-flight timer keeps its original start: latency is measured from
    // the first divergence, not the most recent resize
    if timer.is_none() {
        *timer = Some(ScaleTimer {
            started: Instant::now(),
            operation,
        });
    }
}

/// Observes elapsed time since the pool last diverged, if it had.
pub fn observe_pool_scale_latency() {
    let timer = SCALE_TIMER
        .lock()
        .expect("scale timer lock poisoned")
        .take();
    if let Some(timer) = timer {
        IPAM_POOL_SCALE_LATENCY
            .with_label_values(&[timer.operation])
            .observe(timer.started.elapsed().as_secs_f64());
    }
}

/// Exports the pool tally and scaler as gauges, once per reconcile.
pub fn observe_pool_state(pool: &PoolState, scaler: &ScalerState, subnet: &SubnetInfo) {
    let labels = &[subnet.name.as_str(), subnet.cidr.as_str(), subnet.arm_id.as_str()];
    IPAM_ASSIGNED_IPS.with_label_values(labels).set(pool.assigned as f64);
    IPAM_AVAILABLE_IPS.with_label_values(labels).set(pool.available as f64);
    IPAM_BATCH_SIZE.with_label_values(labels).set(scaler.batch as f64);
    IPAM_EXPECTED_AVAILABLE_IPS
        .with_label_values(labels)
        .set(pool.expected_available() as f64);
    IPAM_MAX_IPS.with_label_values(labels).set(scaler.max as f64);
    IPAM_PENDING_PROGRAMMING_IPS
        .with_label_values(labels)
        .set(pool.pending_programming as f64);
    IPAM_PENDING_RELEASE_IPS
        .with_label_values(labels)
        .set(pool.pending_release as f64);
    IPAM_PRIMARY_IPS.with_label_values(labels).set(pool.primary_ips as f64);
    IPAM_REQUESTED_IPS.with_label_values(labels).set(pool.requested as f64);
    IPAM_TOTAL_IPS.with_label_values(labels).set(pool.total as f64);
    IPAM_SUBNET_EXHAUSTION_STATE
        .with_label_values(labels)
        .set(if scaler.exhausted { 1.0 } else { 0.0 });
}

/// Counts an exhaustion signal, labelled by the state it carried.
pub fn count_exhaustion_signal(subnet: &SubnetInfo, exhausted: bool) {
    IPAM_SUBNET_EXHAUSTION_COUNT
        .with_label_values(&[
            subnet.name.as_str(),
            subnet.cidr.as_str(),
            subnet.arm_id.as_str(),
            if exhausted { "true" } else { "false" },
        ])
        .inc();
}

/// Prometheus text exposition of the IPAM registry.
#[allow(dead_code)] // served by the metrics endpoint
pub fn export() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
