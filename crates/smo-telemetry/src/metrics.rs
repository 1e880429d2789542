//! Prometheus metrics for the smart-order engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration failure
//! means duplicate metric names, which should crash at startup rather than
//! fail silently. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, GaugeVec, HistogramVec, IntGauge,
};

/// Orders submitted to the gateway.
/// Labels: symbol, step (entry/take_profit/stoploss/...).
pub static ORDERS_SUBMITTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "smo_orders_submitted_total",
        "Orders submitted to the trading gateway",
        &["symbol", "step"]
    )
    .unwrap()
});

/// Terminal order callbacks reconciled.
/// Labels: symbol, status (filled/canceled/closed/expired).
pub static ORDERS_RECONCILED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "smo_orders_reconciled_total",
        "Terminal order callbacks reconciled",
        &["symbol", "status"]
    )
    .unwrap()
});

/// Gateway retries by classified fault.
pub static GATEWAY_RETRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "smo_gateway_retries_total",
        "Retries against the trading gateway by fault kind",
        &["fault"]
    )
    .unwrap()
});

/// Phase transitions.
/// Labels: from, to.
pub static PHASE_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "smo_phase_transitions_total",
        "State machine phase transitions",
        &["from", "to"]
    )
    .unwrap()
});

/// Realized PnL per plan, in quote units.
pub static REALIZED_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "smo_realized_pnl",
        "Realized profit per plan in quote units",
        &["plan"]
    )
    .unwrap()
});

/// Gateway round-trip latency in milliseconds.
pub static GATEWAY_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "smo_gateway_latency_ms",
        "Gateway request latency in milliseconds",
        &["op"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]
    )
    .unwrap()
});

/// Plans currently running.
pub static ACTIVE_PLANS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("smo_active_plans", "Plan runtimes currently running").unwrap()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        // Touching each Lazy forces registration; duplicates would panic.
        ORDERS_SUBMITTED.with_label_values(&["BTC_USDT", "entry"]).inc();
        ORDERS_RECONCILED
            .with_label_values(&["BTC_USDT", "filled"])
            .inc();
        GATEWAY_RETRIES.with_label_values(&["invalid_json"]).inc();
        PHASE_TRANSITIONS
            .with_label_values(&["wait_for_entry", "in_entry"])
            .inc();
        REALIZED_PNL.with_label_values(&["plan-1"]).set(3.5);
        GATEWAY_LATENCY_MS.with_label_values(&["create"]).observe(12.0);
        ACTIVE_PLANS.set(1);
    }
}
