// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! HTTP handlers for the submission APIs.
//!
//! The handlers are framework-neutral: the embedding server parses the
//! request, strips the log's origin prefix from the path, and translates the
//! returned [`Response`] onto its own connection type.

use crate::ctlog::{AddChainError, DedupStore, IssuerStore, Log, Sequencer};
use ctlog_api::AddChainRequest;
use log::{debug, warn};
use std::fmt::Display;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::timeout;
use x509_path::UnixTimestamp;

/// A minimal HTTP response for the embedding server to translate.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    /// Retry-After value in seconds, set on backpressure responses.
    pub retry_after: Option<u32>,
    pub body: Vec<u8>,
}

impl Response {
    /// A 200 response with a JSON body.
    #[must_use]
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            retry_after: None,
            body,
        }
    }

    /// A plain-text error response.
    #[must_use]
    pub fn error(msg: impl Into<String>, status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            retry_after: None,
            body: msg.into().into_bytes(),
        }
    }
}

/// Dispatches a request to the appropriate endpoint handler.
///
/// `path` is relative to the log's origin prefix, which the embedding server
/// has already stripped.
pub async fn handle_request(
    log: &Log<impl Sequencer, impl IssuerStore, impl DedupStore>,
    method: &str,
    path: &str,
    body: &[u8],
) -> Response {
    let start = Instant::now();
    log.metrics.req_in_flight.inc();
    let (endpoint, resp) = match path {
        "/ct/v1/add-chain" => (
            "add-chain",
            add_chain_or_pre_chain(log, method, body, false).await,
        ),
        "/ct/v1/add-pre-chain" => (
            "add-pre-chain",
            add_chain_or_pre_chain(log, method, body, true).await,
        ),
        "/ct/v1/get-roots" => ("get-roots", get_roots(log, method)),
        "/metrics" => ("metrics", metrics(log, method)),
        _ => ("unknown", Response::error("Not found", 404)),
    };
    log.metrics.req_in_flight.dec();
    log.metrics
        .req_count
        .with_label_values(&[endpoint, &resp.status.to_string()])
        .inc();
    log.metrics
        .req_duration
        .with_label_values(&[endpoint])
        .observe(start.elapsed().as_secs_f64());
    resp
}

async fn add_chain_or_pre_chain(
    log: &Log<impl Sequencer, impl IssuerStore, impl DedupStore>,
    method: &str,
    body: &[u8],
    expect_precert: bool,
) -> Response {
    if method != "POST" {
        return Response::error("Method not allowed", 405);
    }
    let req: AddChainRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(e) => return bad_request(log, e),
    };

    // The whole pipeline runs under one deadline. In-flight storage calls
    // are cancelled with the future; repeating them later is safe.
    let deadline = Duration::from_secs(log.config().request_timeout);
    let Ok(result) = timeout(
        deadline,
        log.add_chain(&req.chain, expect_precert, now_millis()),
    )
    .await
    else {
        return internal_error(log, "submission timed out");
    };

    match result {
        Ok(sct) => match serde_json::to_vec(&sct) {
            Ok(body) => Response::json(body),
            Err(e) => internal_error(log, e),
        },
        Err(AddChainError::Chain(e)) => bad_request(log, e),
        Err(AddChainError::Pushback) => {
            let mut resp = Response::error("rate limited", 503);
            resp.retry_after = Some(1);
            resp
        }
        Err(AddChainError::Internal(e)) => internal_error(log, e),
    }
}

fn get_roots(
    log: &Log<impl Sequencer, impl IssuerStore, impl DedupStore>,
    method: &str,
) -> Response {
    if method != "GET" {
        return Response::error("Method not allowed", 405);
    }
    match serde_json::to_vec(&log.get_roots()) {
        Ok(body) => Response::json(body),
        Err(e) => internal_error(log, e),
    }
}

fn metrics(
    log: &Log<impl Sequencer, impl IssuerStore, impl DedupStore>,
    method: &str,
) -> Response {
    if method != "GET" {
        return Response::error("Method not allowed", 405);
    }
    Response {
        status: 200,
        content_type: prometheus::TEXT_FORMAT,
        retry_after: None,
        body: log.metrics.encode().into_bytes(),
    }
}

fn bad_request(
    log: &Log<impl Sequencer, impl IssuerStore, impl DedupStore>,
    reason: impl Display,
) -> Response {
    debug!("{}: Bad request: {reason}", log.origin());
    if log.config().mask_internal_errors {
        Response::error("Bad request", 400)
    } else {
        Response::error(format!("Bad request: {reason}"), 400)
    }
}

fn internal_error(
    log: &Log<impl Sequencer, impl IssuerStore, impl DedupStore>,
    reason: impl Display,
) -> Response {
    warn!("{}: Internal error: {reason}", log.origin());
    if log.config().mask_internal_errors {
        Response::error("Internal error", 500)
    } else {
        Response::error(format!("Internal error: {reason}"), 500)
    }
}

/// The current Unix timestamp at millisecond precision. A clock before the
/// epoch reads as the epoch.
fn now_millis() -> UnixTimestamp {
    u64::try_from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::ctlog::{MemoryDedupStore, MemoryIssuerStore, SequenceError};
    use anyhow::anyhow;
    use base64::prelude::*;
    use ctlog_api::{PendingEntry, SequenceMetadata};
    use p256::ecdsa::SigningKey as EcdsaSigningKey;
    use std::cell::Cell;
    use x509_cert::Certificate;
    use x509_path::{certs_to_bytes, CertPool};

    enum SequencerMode {
        Ok,
        Pushback,
        Fail,
        Stall,
    }

    struct TestSequencer {
        next_index: Cell<u64>,
        mode: SequencerMode,
    }

    impl TestSequencer {
        fn new(mode: SequencerMode) -> Self {
            Self {
                next_index: Cell::new(0),
                mode,
            }
        }
    }

    impl Sequencer for TestSequencer {
        async fn assign(&self, _entry: &PendingEntry) -> Result<SequenceMetadata, SequenceError> {
            match self.mode {
                SequencerMode::Ok => {
                    let index = self.next_index.get();
                    self.next_index.set(index + 1);
                    Ok((index, 1_714_000_000_000))
                }
                SequencerMode::Pushback => Err(SequenceError::Pushback),
                SequencerMode::Fail => Err(SequenceError::Other(anyhow!("sequencer failure"))),
                SequencerMode::Stall => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn test_log(
        config: LogConfig,
        mode: SequencerMode,
    ) -> Log<TestSequencer, MemoryIssuerStore, MemoryDedupStore> {
        let roots = CertPool::new(
            Certificate::load_pem_chain(include_bytes!("../tests/test-root-ca-cert.pem")).unwrap(),
        )
        .unwrap();
        Log::new(
            config,
            roots,
            EcdsaSigningKey::from_slice(&[42u8; 32]).unwrap(),
            TestSequencer::new(mode),
            MemoryIssuerStore::default(),
            MemoryDedupStore::default(),
        )
        .unwrap()
    }

    fn test_config() -> LogConfig {
        LogConfig {
            origin: "ct.example.com/logs/test".to_string(),
            ..Default::default()
        }
    }

    fn add_chain_body() -> Vec<u8> {
        let mut certs =
            Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem")).unwrap();
        certs.append(
            &mut Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                .unwrap(),
        );
        let chain = certs_to_bytes(&certs)
            .unwrap()
            .iter()
            .map(|der| BASE64_STANDARD.encode(der))
            .collect::<Vec<_>>();
        serde_json::json!({ "chain": chain }).to_string().into_bytes()
    }

    #[tokio::test]
    async fn test_add_chain_endpoint() {
        let log = test_log(test_config(), SequencerMode::Ok);
        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", &add_chain_body()).await;

        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");
        let sct: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(sct["sct_version"], 0);
        assert_eq!(sct["timestamp"], 1_714_000_000_000_u64);
        // Index 0 as a 40-bit leaf index extension.
        assert_eq!(sct["extensions"], "AAAFAAAAAAA=");
        assert_eq!(
            BASE64_STANDARD
                .decode(sct["id"].as_str().unwrap())
                .unwrap()
                .len(),
            32
        );
    }

    #[tokio::test]
    async fn test_add_chain_wrong_method() {
        let log = test_log(test_config(), SequencerMode::Ok);
        let resp = handle_request(&log, "GET", "/ct/v1/add-chain", b"").await;
        assert_eq!(resp.status, 405);
    }

    #[tokio::test]
    async fn test_add_chain_invalid_json() {
        let log = test_log(test_config(), SequencerMode::Ok);
        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", b"not json").await;
        assert_eq!(resp.status, 400);
        assert!(String::from_utf8(resp.body)
            .unwrap()
            .starts_with("Bad request: "));
    }

    #[tokio::test]
    async fn test_endpoint_mismatch_rejected() {
        let log = test_log(test_config(), SequencerMode::Ok);
        let resp = handle_request(&log, "POST", "/ct/v1/add-pre-chain", &add_chain_body()).await;
        assert_eq!(resp.status, 400);
    }

    #[tokio::test]
    async fn test_get_roots_endpoint() {
        let log = test_log(test_config(), SequencerMode::Ok);
        let resp = handle_request(&log, "GET", "/ct/v1/get-roots", b"").await;

        assert_eq!(resp.status, 200);
        let roots: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(roots["certificates"].as_array().unwrap().len(), 1);

        let resp = handle_request(&log, "POST", "/ct/v1/get-roots", b"").await;
        assert_eq!(resp.status, 405);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let log = test_log(test_config(), SequencerMode::Ok);
        handle_request(&log, "POST", "/ct/v1/add-chain", &add_chain_body()).await;

        let resp = handle_request(&log, "GET", "/metrics", b"").await;
        assert_eq!(resp.status, 200);
        let body = String::from_utf8(resp.body).unwrap();
        assert!(body.contains("config_roots_total 1"));
        assert!(body.contains("entries_total{source=\"sequencer\",type=\"cert\"} 1"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let log = test_log(test_config(), SequencerMode::Ok);
        let resp = handle_request(&log, "GET", "/ct/v1/get-sth", b"").await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_pushback_maps_to_503() {
        let log = test_log(test_config(), SequencerMode::Pushback);
        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", &add_chain_body()).await;

        assert_eq!(resp.status, 503);
        assert_eq!(resp.retry_after, Some(1));
        assert_eq!(resp.body, b"rate limited");
    }

    #[tokio::test]
    async fn test_sequencer_failure_maps_to_500() {
        let log = test_log(test_config(), SequencerMode::Fail);
        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", &add_chain_body()).await;

        assert_eq!(resp.status, 500);
        assert!(String::from_utf8(resp.body)
            .unwrap()
            .contains("sequencer failure"));
    }

    #[tokio::test]
    async fn test_submission_deadline() {
        let config = LogConfig {
            request_timeout: 0,
            ..test_config()
        };
        let log = test_log(config, SequencerMode::Stall);
        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", &add_chain_body()).await;

        assert_eq!(resp.status, 500);
        assert!(String::from_utf8(resp.body).unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_masked_errors() {
        let config = LogConfig {
            mask_internal_errors: true,
            ..test_config()
        };
        let log = test_log(config, SequencerMode::Fail);

        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", b"not json").await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body, b"Bad request");

        let resp = handle_request(&log, "POST", "/ct/v1/add-chain", &add_chain_body()).await;
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body, b"Internal error");
    }
}
