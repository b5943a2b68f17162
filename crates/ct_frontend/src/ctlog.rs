// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The submission pipeline: chain validation, deduplication, issuer
//! persistence, sequencing, and SCT issuance.
//!
//! A [`Log`] ties the pieces together for a single CT log. Storage and
//! sequencing are behind capability traits so that the pipeline can run
//! against any backend; in-memory implementations are provided for tests
//! and small deployments.

use crate::{
    config::LogConfig,
    metrics::{AsF64, Metrics},
};
use anyhow::bail;
use ctlog_api::{
    entry_from_chain, signed_certificate_timestamp, AddChainResponse, CacheKey, ChainValidator,
    CtApiError, Entry, GetRootsResponse, PendingEntry, SequenceMetadata,
};
use der::Encode;
use futures_util::future::try_join_all;
use log::{debug, info, warn};
use p256::ecdsa::SigningKey as EcdsaSigningKey;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use x509_cert::Certificate;
use x509_path::{certs_to_bytes, CertPool, UnixTimestamp};

/// Assigns indices and timestamps to entries. Implementations are expected
/// to be externally durable: once `assign` returns, the entry is in the log.
pub trait Sequencer {
    /// Assigns the next available index to the entry, returning the index
    /// and the timestamp of the sequencing.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::Pushback`] if the sequencer cannot accept
    /// new entries right now, and any other error wrapped in
    /// [`SequenceError::Other`].
    #[allow(async_fn_in_trait)]
    async fn assign(&self, entry: &PendingEntry) -> Result<SequenceMetadata, SequenceError>;
}

#[derive(Error, Debug)]
pub enum SequenceError {
    /// The sequencer is overloaded. Callers should retry after a delay.
    #[error("rate limited")]
    Pushback,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Content-addressed storage for issuer certificates.
pub trait IssuerStore {
    /// Fetches the object with the given key, or None if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch operation fails.
    #[allow(async_fn_in_trait)]
    async fn fetch(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Uploads the object with the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload operation fails.
    #[allow(async_fn_in_trait)]
    async fn upload(&self, key: &str, data: &[u8]) -> anyhow::Result<()>;
}

/// Long-term deduplication cache mapping leaf hashes to sequencing results.
pub trait DedupStore {
    /// Reads an entry from the deduplication cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the read operation fails.
    #[allow(async_fn_in_trait)]
    async fn get_entry(&self, key: &CacheKey) -> anyhow::Result<Option<SequenceMetadata>>;

    /// Puts the sequenced entry into the cache. If the key is already
    /// present, the entry with the smaller index must be kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the write operation fails.
    #[allow(async_fn_in_trait)]
    async fn put_entry(&self, key: CacheKey, metadata: SequenceMetadata) -> anyhow::Result<()>;
}

/// Submission failure, split by how it maps to an HTTP response.
#[derive(Error, Debug)]
pub enum AddChainError {
    /// The submitted chain was rejected.
    #[error(transparent)]
    Chain(#[from] CtApiError),
    /// The sequencer refused the entry due to backpressure. The submission
    /// can be retried as a whole.
    #[error("rate limited")]
    Pushback,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A single CT log's submission frontend.
pub struct Log<S, I, D> {
    config: LogConfig,
    validator: ChainValidator,
    signing_key: EcdsaSigningKey,
    root_ders: Vec<Vec<u8>>,
    sequencer: S,
    issuers: I,
    dedup: D,
    // Fingerprints of issuers known to be persisted, to avoid hitting the
    // issuer store on every submission.
    issuer_cache: Mutex<HashSet<[u8; 32]>>,
    pub(crate) metrics: Metrics,
}

impl<S: Sequencer, I: IssuerStore, D: DedupStore> Log<S, I, D> {
    /// Creates a log frontend from its configuration and collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a trusted root
    /// cannot be re-encoded.
    pub fn new(
        config: LogConfig,
        roots: CertPool,
        signing_key: EcdsaSigningKey,
        sequencer: S,
        issuers: I,
        dedup: D,
    ) -> anyhow::Result<Self> {
        let (reject_extensions, ext_key_usages) = config.validate()?;
        let (not_after_start, not_after_limit) = config.not_after_window();

        let metrics = Metrics::new();
        metrics.config_roots.set(roots.len().as_f64());
        if let Some(start) = not_after_start {
            metrics.config_start.set(start.as_f64() / 1000.0);
        }
        if let Some(limit) = not_after_limit {
            metrics.config_end.set(limit.as_f64() / 1000.0);
        }

        let root_ders = certs_to_bytes(roots.certs())?;
        let validator = ChainValidator {
            roots,
            not_after_start,
            not_after_limit,
            reject_expired: config.reject_expired,
            reject_unexpired: config.reject_unexpired,
            reject_extensions,
            ext_key_usages,
        };

        Ok(Self {
            config,
            validator,
            signing_key,
            root_ders,
            sequencer,
            issuers,
            dedup,
            issuer_cache: Mutex::new(HashSet::new()),
            metrics,
        })
    }

    pub fn origin(&self) -> &str {
        &self.config.origin
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// The trusted roots, as accepted by this log.
    pub fn get_roots(&self) -> GetRootsResponse {
        GetRootsResponse {
            certificates: self.root_ders.clone(),
        }
    }

    /// Runs a submission through the whole pipeline and returns its SCT.
    ///
    /// `now` is the submission time in milliseconds. The sequencer may
    /// assign a different (later) timestamp; the SCT always carries the
    /// sequencer's timestamp so that duplicates are byte-for-byte identical.
    ///
    /// # Errors
    ///
    /// Returns [`AddChainError::Chain`] if the chain is rejected,
    /// [`AddChainError::Pushback`] on sequencer backpressure, and
    /// [`AddChainError::Internal`] for storage and signing failures.
    pub async fn add_chain(
        &self,
        raw_chain: &[Vec<u8>],
        expect_precert: bool,
        now: UnixTimestamp,
    ) -> Result<AddChainResponse, AddChainError> {
        let entry_type = if expect_precert { "precert" } else { "cert" };
        let chain = self
            .validator
            .validate_chain(raw_chain, expect_precert, now)?;
        let pending_entry = entry_from_chain(&chain, expect_precert)?;
        let cache_key = pending_entry.cache_key();

        // Check if the entry is cached and return right away if so.
        if let Some((leaf_index, timestamp)) = self
            .dedup
            .get_entry(&cache_key)
            .await
            .map_err(AddChainError::Internal)?
        {
            debug!("{}: Entry is cached", self.config.origin);
            self.metrics
                .entry_count
                .with_label_values(&[entry_type, "cache"])
                .inc();
            let entry = Entry {
                inner: pending_entry,
                leaf_index,
                timestamp,
            };
            return signed_certificate_timestamp(&self.signing_key, &entry)
                .map_err(|e| AddChainError::Internal(e.into()));
        }

        // Persist issuers before the entry can be sequenced, so that the
        // fingerprints in the sequenced entry always resolve.
        self.upload_issuers(&chain[1..])
            .await
            .map_err(AddChainError::Internal)?;

        let (leaf_index, timestamp) = match self.sequencer.assign(&pending_entry).await {
            Ok(metadata) => metadata,
            Err(SequenceError::Pushback) => {
                self.metrics.seq_pushback.inc();
                return Err(AddChainError::Pushback);
            }
            Err(SequenceError::Other(e)) => return Err(AddChainError::Internal(e)),
        };

        // Write to the deduplication cache best-effort. A lost write only
        // means a future duplicate gets sequenced a second time.
        if self
            .dedup
            .put_entry(cache_key, (leaf_index, timestamp))
            .await
            .is_err()
        {
            warn!(
                "{}: Failed to write entry to deduplication cache",
                self.config.origin
            );
        }
        self.metrics
            .entry_count
            .with_label_values(&[entry_type, "sequencer"])
            .inc();

        let entry = Entry {
            inner: pending_entry,
            leaf_index,
            timestamp,
        };
        signed_certificate_timestamp(&self.signing_key, &entry)
            .map_err(|e| AddChainError::Internal(e.into()))
    }

    /// Uploads any newly-observed issuers to the issuer store.
    ///
    /// # Errors
    ///
    /// Returns an error if an issuer already exists in the store with
    /// conflicting contents, or if a store operation fails.
    async fn upload_issuers(&self, issuers: &[Certificate]) -> anyhow::Result<()> {
        let issuer_futures = issuers.iter().map(|issuer| async move {
            let issuer_der = issuer.to_der()?;
            let fingerprint: [u8; 32] = Sha256::digest(&issuer_der).into();
            if self.issuer_cache.lock().contains(&fingerprint) {
                return Ok(None);
            }
            let path = format!("issuer/{}", hex::encode(fingerprint));

            let uploaded = if let Some(old) = self.issuers.fetch(&path).await? {
                if old != issuer_der {
                    bail!("invalid existing issuer: {}", hex::encode(fingerprint));
                }
                None
            } else {
                self.issuers.upload(&path, &issuer_der).await?;
                Some(path)
            };
            self.issuer_cache.lock().insert(fingerprint);
            Ok(uploaded)
        });

        for path in try_join_all(issuer_futures).await?.iter().flatten() {
            self.metrics.issuer_count.inc();
            info!("{}: Observed new issuer; path={path}", self.config.origin);
        }

        Ok(())
    }
}

/// An in-memory [`DedupStore`].
#[derive(Default)]
pub struct MemoryDedupStore {
    entries: Mutex<HashMap<CacheKey, SequenceMetadata>>,
}

impl DedupStore for MemoryDedupStore {
    async fn get_entry(&self, key: &CacheKey) -> anyhow::Result<Option<SequenceMetadata>> {
        Ok(self.entries.lock().get(key).copied())
    }

    async fn put_entry(&self, key: CacheKey, metadata: SequenceMetadata) -> anyhow::Result<()> {
        // Racing submissions may sequence the same entry twice. Keep the
        // smaller index.
        self.entries
            .lock()
            .entry(key)
            .and_modify(|existing| {
                if metadata.0 < existing.0 {
                    *existing = metadata;
                }
            })
            .or_insert(metadata);
        Ok(())
    }
}

/// An in-memory [`IssuerStore`].
#[derive(Default)]
pub struct MemoryIssuerStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl IssuerStore for MemoryIssuerStore {
    async fn fetch(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().get(key).cloned())
    }

    async fn upload(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        self.objects.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
