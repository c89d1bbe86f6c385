use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

pub static REQ_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "alb_stack_requests_total",
        "Requests seen by the preview listener",
        &["listener"]
    )
    .expect("register alb_stack_requests_total")
});

pub static INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("alb_stack_inflight", "In-flight requests")
        .expect("register alb_stack_inflight")
});

pub static REQ_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0];
    register_histogram_vec!(
        "alb_stack_request_duration_seconds",
        "End-to-end request duration in seconds",
        &["kind"],
        buckets
    )
    .expect("register alb_stack_request_duration_seconds")
});

pub static RESP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "alb_stack_responses_total",
        "Responses by status code",
        &["code"]
    )
    .expect("register alb_stack_responses_total")
});

/// One increment per evaluated request, labelled by the rule that matched
/// and what it decided.
pub static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "alb_stack_decisions_total",
        "Listener rule decisions",
        &["rule_id", "kind"]
    )
    .expect("register alb_stack_decisions_total")
});

pub static LOGIN_REDIRECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "alb_stack_login_redirects_total",
        "Unauthenticated requests sent to the hosted login page",
        &["provider"]
    )
    .expect("register alb_stack_login_redirects_total")
});

#[inline]
pub fn on_req_start(listener: &str) {
    REQ_TOTAL.with_label_values(&[listener]).inc();
    INFLIGHT.inc();
}

#[inline]
pub fn on_req_end(kind: &str, code: u16, secs: f64) {
    INFLIGHT.dec();
    REQ_DURATION.with_label_values(&[kind]).observe(secs);
    RESP_TOTAL.with_label_values(&[&code.to_string()]).inc();
}

#[inline]
pub fn inc_decision(rule_id: &str, kind: &str) {
    DECISIONS_TOTAL.with_label_values(&[rule_id, kind]).inc();
}

#[inline]
pub fn inc_login_redirect(provider: &str) {
    LOGIN_REDIRECTS_TOTAL.with_label_values(&[provider]).inc();
}
