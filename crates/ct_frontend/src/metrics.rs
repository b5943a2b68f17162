// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Metrics for the submission frontend.
use prometheus::{
    self, register_counter_vec_with_registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_vec_with_registry, Counter, CounterVec, Gauge,
    HistogramVec, Registry, TextEncoder,
};

// Reference: <https://github.com/FiloSottile/sunlight/blob/main/internal/ctlog/metrics.go>
#[derive(Debug)]
pub(crate) struct Metrics {
    pub(crate) registry: Registry,

    pub(crate) req_count: CounterVec,
    pub(crate) req_in_flight: Gauge,
    pub(crate) req_duration: HistogramVec,
    pub(crate) entry_count: CounterVec,
    pub(crate) issuer_count: Counter,
    pub(crate) seq_pushback: Counter,

    pub(crate) config_roots: Gauge,
    pub(crate) config_start: Gauge,
    pub(crate) config_end: Gauge,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        let r = Registry::new();
        let req_count = register_counter_vec_with_registry!(
            "http_requests_total",
            "Requests served by the frontend, by endpoint and status code.",
            &["endpoint", "code"],
            r
        )
        .unwrap();
        let req_in_flight = register_gauge_with_registry!(
            "http_in_flight_requests",
            "Requests currently being served by the frontend.",
            r
        )
        .unwrap();
        let req_duration = register_histogram_vec_with_registry!(
            "http_request_duration_seconds",
            "Request serving latencies in seconds, by endpoint.",
            &["endpoint"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0],
            r,
        )
        .unwrap();
        let entry_count = register_counter_vec_with_registry!(
            "entries_total",
            "Entries submitted to be sequenced, by type and source.",
            &["type", "source"],
            r
        )
        .unwrap();
        let issuer_count = register_counter_with_registry!(
            "issuers_uploaded_total",
            "Newly observed issuer certificates uploaded to storage.",
            r
        )
        .unwrap();
        let seq_pushback = register_counter_with_registry!(
            "sequencer_pushback_total",
            "Submissions refused due to sequencer backpressure.",
            r
        )
        .unwrap();
        let config_roots =
            register_gauge_with_registry!("config_roots_total", "Number of accepted roots.", r)
                .unwrap();
        let config_start = register_gauge_with_registry!(
            "config_notafter_start_timestamp_seconds",
            "Start of the NotAfter accepted period.",
            r
        )
        .unwrap();
        let config_end = register_gauge_with_registry!(
            "config_notafter_end_timestamp_seconds",
            "End of the NotAfter accepted period.",
            r
        )
        .unwrap();
        Self {
            registry: r,
            req_count,
            req_in_flight,
            req_duration,
            entry_count,
            issuer_count,
            seq_pushback,
            config_roots,
            config_start,
            config_end,
        }
    }

    pub(crate) fn encode(&self) -> String {
        let mut buffer = String::new();
        let encoder = TextEncoder::new();
        encoder
            .encode_utf8(&self.registry.gather(), &mut buffer)
            .unwrap();
        buffer
    }
}

// Perform a potentially-lossy conversion to f64 from the input type.
pub(crate) trait AsF64 {
    fn as_f64(&self) -> f64;
}

macro_rules! impl_as_f64 {
    ($($t:ty),*) => {
        $(
            #[allow(clippy::cast_precision_loss)]
            impl AsF64 for $t {
                fn as_f64(&self) -> f64 {
                    *self as f64
                }
            }
        )*
    };
}

impl_as_f64!(usize, u64);
