// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Certificate pools and chain building for Certificate Transparency.
//!
//! [`CertPool`] is an indexed, deduplicated set of certificates with parent
//! lookup by subject name and by subject key identifier. [`verify`] builds
//! every signature-verified path from a leaf to a trusted root, with the
//! relaxations CT logs apply (no expiry, path length, or critical-extension
//! checks along the chain).

use der::{Encode, Error as DerError};
use sha2::{Digest, Sha256};
use std::collections::{hash_map::Entry, HashMap};
use x509_cert::{
    ext::pkix::{AuthorityKeyIdentifier, SubjectKeyIdentifier},
    Certificate,
};

mod verify;

pub use verify::{
    verify, UnknownAuthorityError, VerifyError, VerifyOptions, ANY_EXTENDED_KEY_USAGE,
};

/// Unix timestamp, measured since the epoch (January 1, 1970, 00:00),
/// ignoring leap seconds, in milliseconds.
/// This can be unsigned as we never deal with negative timestamps.
pub type UnixTimestamp = u64;

/// Result type for [`ChainConstraint`] callbacks.
pub type ConstraintResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A predicate attached to a pool certificate, evaluated against the chain
/// under construction (leaf first, not including the candidate itself) before
/// the candidate is accepted into a path.
pub type ChainConstraint = Box<dyn Fn(&[Certificate]) -> ConstraintResult + Send + Sync>;

/// Converts a slice of certificates into an array of DER-encoded certificates.
///
/// # Errors
///
/// Returns an error if any of the certificates cannot be DER-encoded.
pub fn certs_to_bytes(certs: &[Certificate]) -> Result<Vec<Vec<u8>>, DerError> {
    certs
        .iter()
        .map(der::Encode::to_der)
        .collect::<Result<_, _>>()
}

/// A `CertPool` is a set of certificates.
#[derive(Default)]
pub struct CertPool {
    // Map from SHA256 fingerprint to index in `certs`.
    by_fingerprint: HashMap<[u8; 32], usize>,
    // Map from subject name to list of indexes of certs with that name.
    by_name: HashMap<String, Vec<usize>>,
    // Map from raw subject key identifier to list of indexes of certs with
    // that SKI.
    by_subject_key_id: HashMap<Vec<u8>, Vec<usize>>,
    // List of certificates in pool, with an optional constraint per slot.
    certs: Vec<Certificate>,
    constraints: Vec<Option<ChainConstraint>>,
}

impl CertPool {
    /// Constructs a `CertPool` from the given certificates, weeding out
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificate
    /// extensions.
    pub fn new(certs: Vec<Certificate>) -> Result<Self, DerError> {
        let mut pool = Self::default();
        for cert in certs {
            pool.add_cert(cert)?;
        }
        Ok(pool)
    }

    /// The certificates in the pool, in insertion order.
    #[must_use]
    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// The constraint attached to the certificate at `idx`, if any.
    #[must_use]
    pub fn constraint(&self, idx: usize) -> Option<&ChainConstraint> {
        self.constraints.get(idx).and_then(Option::as_ref)
    }

    /// Search the certificate pool for potential parents for the provided
    /// certificate.
    ///
    /// Candidates whose subject matches the certificate's issuer are returned
    /// first, ordered by key identifier plausibility: SKI equal to the
    /// certificate's AKI, then one of the two identifiers missing, then
    /// mismatching identifiers. If the name lookup finds nothing (the issuer
    /// RDN serialization may differ from the parent's subject serialization),
    /// the SKI index is consulted directly.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues decoding certificate extensions.
    pub fn find_potential_parents(&self, cert: &Certificate) -> Result<Vec<usize>, DerError> {
        let child_aki = match cert.tbs_certificate.get::<AuthorityKeyIdentifier>()? {
            Some((_, aki)) => aki.key_identifier.map(|k| k.as_bytes().to_vec()),
            None => None,
        };

        let mut matching_key_id = Vec::new();
        let mut one_key_id = Vec::new();
        let mut mismatch_key_id = Vec::new();
        if let Some(indexes) = self.by_name.get(&cert.tbs_certificate.issuer.to_string()) {
            for &idx in indexes {
                let candidate_ski =
                    match self.certs[idx].tbs_certificate.get::<SubjectKeyIdentifier>()? {
                        Some((_, ski)) => Some(ski.0.as_bytes().to_vec()),
                        None => None,
                    };
                match (&candidate_ski, &child_aki) {
                    (Some(ski), Some(aki)) if ski == aki => matching_key_id.push(idx),
                    (None, None) => matching_key_id.push(idx),
                    (Some(_), Some(_)) => mismatch_key_id.push(idx),
                    _ => one_key_id.push(idx),
                }
            }
        }

        let mut candidates = matching_key_id;
        candidates.append(&mut one_key_id);
        candidates.append(&mut mismatch_key_id);

        if candidates.is_empty() {
            if let Some(aki) = &child_aki {
                if let Some(indexes) = self.by_subject_key_id.get(aki) {
                    candidates.extend_from_slice(indexes);
                }
            }
        }

        Ok(candidates)
    }

    /// Add a certificate to the certificate pool if it is not already
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate or
    /// parsing its extensions.
    pub fn add_cert(&mut self, cert: Certificate) -> Result<(), DerError> {
        self.add_cert_with_constraint(cert, None)
    }

    /// Add a certificate along with a constraint callback, invoked with the
    /// chain being extended (leaf first, candidate excluded) whenever path
    /// building considers this certificate as a parent.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate or
    /// parsing its extensions.
    pub fn add_cert_with_constraint(
        &mut self,
        cert: Certificate,
        constraint: Option<ChainConstraint>,
    ) -> Result<(), DerError> {
        let fingerprint: [u8; 32] = Sha256::digest(cert.to_der()?).into();
        if let Entry::Vacant(e) = self.by_fingerprint.entry(fingerprint) {
            let idx = self.certs.len();
            e.insert(idx);
            self.by_name
                .entry(cert.tbs_certificate.subject.to_string())
                .or_default()
                .push(idx);
            if let Some((_, ski)) = cert.tbs_certificate.get::<SubjectKeyIdentifier>()? {
                self.by_subject_key_id
                    .entry(ski.0.as_bytes().to_vec())
                    .or_default()
                    .push(idx);
            }
            self.certs.push(cert);
            self.constraints.push(constraint);
        }

        Ok(())
    }

    /// Add certs to the pool from a byte slice assumed to contain PEM encoded
    /// data. Skips over non certificate blocks in the data.
    ///
    /// # Errors
    ///
    /// Returns an error if there are DER encoding issues.
    pub fn append_certs_from_pem(&mut self, input: &[u8]) -> Result<(), DerError> {
        // Until next x509-cert release, load_pem_chain doesn't support an empty
        // input: https://github.com/RustCrypto/formats/pull/1965
        if !input.is_empty() {
            for cert in Certificate::load_pem_chain(input)? {
                self.add_cert(cert)?;
            }
        }
        Ok(())
    }

    /// Check if the pool includes a certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate.
    pub fn includes(&self, cert: &Certificate) -> Result<bool, DerError> {
        Ok(self
            .by_fingerprint
            .contains_key::<[u8; 32]>(&Sha256::digest(cert.to_der()?).into()))
    }

    /// Fetch a certificate from the pool by its fingerprint.
    #[must_use]
    pub fn by_fingerprint(&self, fingerprint: &[u8; 32]) -> Option<&Certificate> {
        if let Some(idx) = self.by_fingerprint.get(fingerprint) {
            self.certs.get(*idx)
        } else {
            None
        }
    }

    /// Find a certificate by its subject Distinguished Name.
    #[must_use]
    pub fn find_by_subject(&self, subject: &x509_cert::name::Name) -> Option<&Certificate> {
        if let Some(indices) = self.by_name.get(&subject.to_string()) {
            indices.first().and_then(|&idx| self.certs.get(idx))
        } else {
            None
        }
    }
}
