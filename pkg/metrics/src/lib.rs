use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonically increasing counter.
struct Counter {
    value: AtomicU64,
    help: &'static str,
}

/// Value that can go up or down.
struct Gauge {
    value: AtomicI64,
    help: &'static str,
}

/// Thread-safe self-metrics for the controller, rendered in Prometheus text
/// exposition format. All instruments are registered up front; recording is
/// lock-free on the hot path.
pub struct ControllerMetrics {
    counters: RwLock<BTreeMap<&'static str, Counter>>,
    gauges: RwLock<BTreeMap<&'static str, Gauge>>,
}

const TICKS_TOTAL: &str = "scalerd_ticks_total";
const TICK_SKIPS_TOTAL: &str = "scalerd_tick_skips_total";
const SCALE_UPS_TOTAL: &str = "scalerd_scale_ups_total";
const SCALE_DOWNS_TOTAL: &str = "scalerd_scale_downs_total";
const SCALE_FAILURES_TOTAL: &str = "scalerd_scale_failures_total";
const SYNC_ERRORS_TOTAL: &str = "scalerd_sync_errors_total";
const ACTIVE_INTENTS: &str = "scalerd_active_intents";
const INVALID_INTENTS: &str = "scalerd_invalid_intents";

impl ControllerMetrics {
    pub fn new() -> Self {
        let metrics = Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        };
        metrics.register_counter(TICKS_TOTAL, "Reconcile ticks executed");
        metrics.register_counter(TICK_SKIPS_TOTAL, "Ticks skipped before the write step");
        metrics.register_counter(SCALE_UPS_TOTAL, "Confirmed scale-up writes");
        metrics.register_counter(SCALE_DOWNS_TOTAL, "Confirmed scale-down writes");
        metrics.register_counter(SCALE_FAILURES_TOTAL, "Replica writes that failed");
        metrics.register_counter(SYNC_ERRORS_TOTAL, "Intent sync loop errors");
        metrics.register_gauge(ACTIVE_INTENTS, "Intents with a live binding");
        metrics.register_gauge(INVALID_INTENTS, "Intents rejected as InvalidConfig");
        metrics
    }

    fn register_counter(&self, name: &'static str, help: &'static str) {
        self.counters.write().unwrap().insert(
            name,
            Counter {
                value: AtomicU64::new(0),
                help,
            },
        );
    }

    fn register_gauge(&self, name: &'static str, help: &'static str) {
        self.gauges.write().unwrap().insert(
            name,
            Gauge {
                value: AtomicI64::new(0),
                help,
            },
        );
    }

    fn counter_inc(&self, name: &str) {
        let counters = self.counters.read().unwrap();
        if let Some(c) = counters.get(name) {
            c.value.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn gauge_set(&self, name: &str, val: i64) {
        let gauges = self.gauges.read().unwrap();
        if let Some(g) = gauges.get(name) {
            g.value.store(val, Ordering::Relaxed);
        }
    }

    pub fn record_tick(&self) {
        self.counter_inc(TICKS_TOTAL);
    }

    pub fn record_skip(&self) {
        self.counter_inc(TICK_SKIPS_TOTAL);
    }

    pub fn record_scale(&self, from: u32, to: u32) {
        if to > from {
            self.counter_inc(SCALE_UPS_TOTAL);
        } else {
            self.counter_inc(SCALE_DOWNS_TOTAL);
        }
    }

    pub fn record_scale_failure(&self) {
        self.counter_inc(SCALE_FAILURES_TOTAL);
    }

    pub fn record_sync_error(&self) {
        self.counter_inc(SYNC_ERRORS_TOTAL);
    }

    pub fn set_active_intents(&self, count: usize) {
        self.gauge_set(ACTIVE_INTENTS, count as i64);
    }

    pub fn set_invalid_intents(&self, count: usize) {
        self.gauge_set(INVALID_INTENTS, count as i64);
    }

    /// Render all instruments in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read().unwrap();
        for (name, counter) in counters.iter() {
            output.push_str(&format!("# HELP {} {}\n", name, counter.help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!(
                "{} {}\n",
                name,
                counter.value.load(Ordering::Relaxed)
            ));
        }

        let gauges = self.gauges.read().unwrap();
        for (name, gauge) in gauges.iter() {
            output.push_str(&format!("# HELP {} {}\n", name, gauge.help));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!(
                "{} {}\n",
                name,
                gauge.value.load(Ordering::Relaxed)
            ));
        }

        output
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
