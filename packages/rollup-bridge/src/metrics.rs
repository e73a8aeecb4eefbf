//! Prometheus metrics for the bridge tracker
//!
//! Registered in the default registry.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};

use crate::error::BridgeError;

lazy_static! {
    pub static ref STATUS_OBSERVED: CounterVec = register_counter_vec!(
        "rollup_bridge_status_observed_total",
        "Message statuses observed by resolver polls",
        &["status"]
    ).unwrap();

    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "rollup_bridge_submissions_total",
        "Transfer flow submissions by outcome",
        &["flow", "outcome"]
    ).unwrap();

    pub static ref FLOW_STATE: GaugeVec = register_gauge_vec!(
        "rollup_bridge_flow_step",
        "Step index of the most recent transition of each flow",
        &["flow"]
    ).unwrap();

    pub static ref SCAN_RECORDS: CounterVec = register_counter_vec!(
        "rollup_bridge_scan_records_total",
        "Records produced by event log scans",
        &["outcome"]
    ).unwrap();

    pub static ref PENDING_TRANSFERS: Gauge = register_gauge!(
        "rollup_bridge_pending_transfers",
        "Number of locally recorded pending NFT transfers"
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "rollup_bridge_errors_total",
        "Errors by kind",
        &["kind"]
    ).unwrap();
}

pub fn record_status(status: &str) {
    STATUS_OBSERVED.with_label_values(&[status]).inc();
}

pub fn record_submission(flow: &str, outcome: &str) {
    SUBMISSIONS.with_label_values(&[flow, outcome]).inc();
}

pub fn record_flow_step(flow: &str, step: u8) {
    FLOW_STATE.with_label_values(&[flow]).set(step as f64);
}

pub fn record_scan_record(outcome: &str) {
    SCAN_RECORDS.with_label_values(&[outcome]).inc();
}

pub fn set_pending_transfers(count: usize) {
    PENDING_TRANSFERS.set(count as f64);
}

pub fn record_error(error: &BridgeError) {
    ERRORS.with_label_values(&[error.kind()]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn render() -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_render_includes_recorded_metrics() {
        record_submission("claim", "success");
        record_status("Claimable");
        set_pending_transfers(3);
        let text = render();
        assert!(text.contains("rollup_bridge_submissions_total"));
        assert!(text.contains("rollup_bridge_status_observed_total"));
        assert!(text.contains("rollup_bridge_pending_transfers"));
    }
}
