// Ported from "certificate-transparency-go" (https://github.com/google/certificate-transparency-go)
// Copyright 2016 Google LLC. All Rights Reserved.
// Licensed under Apache-2.0 License found in the LICENSE file or at https://www.apache.org/licenses/LICENSE-2.0
//
// The original code is itself a fork of the Go standard library's crypto/x509
// package, Copyright 2009 The Go Authors, licensed under the BSD-3-Clause
// license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause
//
// This ports code from the original Go projects and adapts it to Rust idioms.
//
// Modifications and Rust implementation Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Path building from a leaf certificate to a trusted root.
//!
//! This is the verification profile CT logs use: signatures, basic
//! constraints and explicit pool constraints are checked along the chain,
//! while expiry, path length, name constraints, critical extension handling
//! and hostname matching are deliberately not. Logs observe certificates,
//! they do not police them.
//!
//! References:
//! - [verify.go](https://github.com/google/certificate-transparency-go/blob/74d106d3a25205b16d571354c64147c5f1f7dbc1/x509/verify.go)
//! - [cert_pool.go](https://github.com/google/certificate-transparency-go/blob/74d106d3a25205b16d571354c64147c5f1f7dbc1/x509/cert_pool.go)

use crate::{CertPool, UnixTimestamp};
use der::oid::{
    db::rfc5280::{ID_CE_SUBJECT_ALT_NAME, ID_KP_SERVER_AUTH},
    ObjectIdentifier,
};
use std::fmt;
use thiserror::Error;
use x509_cert::{
    ext::{
        pkix::{BasicConstraints, ExtendedKeyUsage},
        Extension,
    },
    Certificate,
};
use x509_verify::VerifyingKey;

/// The `anyExtendedKeyUsage` OID from RFC 5280 4.2.1.12. Passing it in
/// [`VerifyOptions::key_usages`] disables extended key usage filtering.
pub const ANY_EXTENDED_KEY_USAGE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.37.0");

// Ceiling on the total number of candidate signature checks in a single
// verification, guarding against pathological intermediate graphs.
const MAX_CHAIN_SIGNATURE_CHECKS: usize = 100;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Der(#[from] der::Error),
    #[error("x509: issuer name does not match subject from issuing certificate")]
    NameMismatch,
    #[error("x509: certificate is not authorized to sign other certificates")]
    NotAuthorizedToSign,
    #[error("x509: certificate signature is not valid: {0}")]
    SignatureVerification(String),
    #[error("x509: certificate rejected by pool constraint: {0}")]
    Constraint(String),
    #[error("x509: signature check attempts limit reached while verifying certificate chain")]
    SignatureCheckLimit,
    #[error("x509: certificate specifies an incompatible key usage")]
    IncompatibleUsage,
    #[error(transparent)]
    UnknownAuthority(#[from] UnknownAuthorityError),
}

/// No path from the certificate to any trusted root could be built. Carries
/// the first rejected candidate parent and the reason it was rejected, which
/// is usually the most useful diagnostic for a submitter.
#[derive(Debug)]
pub struct UnknownAuthorityError {
    pub cert: Box<Certificate>,
    pub hint_err: Option<Box<VerifyError>>,
    pub hint_cert: Option<Box<Certificate>>,
}

impl fmt::Display for UnknownAuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x509: certificate signed by unknown authority")?;
        if let (Some(err), Some(cert)) = (&self.hint_err, &self.hint_cert) {
            write!(
                f,
                " (possibly because of {:?} while trying to verify candidate authority certificate {:?})",
                err.to_string(),
                cert.tbs_certificate.subject.to_string(),
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for UnknownAuthorityError {}

/// Options for [`verify`]. Per-verification, immutable.
pub struct VerifyOptions<'a> {
    pub roots: &'a CertPool,
    pub intermediates: &'a CertPool,

    /// Extended key usages the built chains must be valid for. Empty means
    /// ServerAuth; a list containing [`ANY_EXTENDED_KEY_USAGE`] disables the
    /// filter.
    pub key_usages: Vec<ObjectIdentifier>,

    /// Evaluation time override, carried for callers that record it. Path
    /// building performs no time-validity checks; policy layers above apply
    /// their own expiry rules.
    pub current_time: Option<UnixTimestamp>,

    /// Overrides the default ceiling of 100 signature checks.
    pub max_signature_checks: Option<usize>,
}

/// Builds every simple signature-verified path from `leaf` to a certificate
/// in `opts.roots`, using `opts.intermediates` for the interior nodes.
///
/// All discovered paths are returned, not just the first: CT requires the
/// caller to check path equivalence against the submitted chain order, which
/// needs the full set. Paths are ordered leaf first, root last. If the roots
/// pool already contains the leaf, the single-element path is returned.
///
/// # Errors
///
/// Returns [`VerifyError::UnknownAuthority`] if no path exists,
/// [`VerifyError::SignatureCheckLimit`] if the search exceeded its signature
/// check budget, and [`VerifyError::IncompatibleUsage`] if paths exist but
/// none satisfies the requested extended key usages.
pub fn verify(
    leaf: &Certificate,
    opts: &VerifyOptions<'_>,
) -> Result<Vec<Vec<Certificate>>, VerifyError> {
    let chains = if opts.roots.includes(leaf)? {
        vec![vec![leaf.clone()]]
    } else {
        let mut sig_checks = 0;
        build_chains(&[leaf.clone()], &mut sig_checks, opts)?
    };

    let mut key_usages = opts.key_usages.clone();
    if key_usages.is_empty() {
        key_usages.push(ID_KP_SERVER_AUTH);
    }
    if key_usages.contains(&ANY_EXTENDED_KEY_USAGE) {
        return Ok(chains);
    }

    let candidates: Vec<Vec<Certificate>> = chains
        .into_iter()
        .filter(|chain| check_chain_for_key_usage(chain, &key_usages))
        .collect();
    if candidates.is_empty() {
        return Err(VerifyError::IncompatibleUsage);
    }
    Ok(candidates)
}

fn build_chains(
    current_chain: &[Certificate],
    sig_checks: &mut usize,
    opts: &VerifyOptions<'_>,
) -> Result<Vec<Vec<Certificate>>, VerifyError> {
    let Some(child) = current_chain.last() else {
        return Ok(Vec::new());
    };

    let mut chains: Vec<Vec<Certificate>> = Vec::new();
    // First direct candidate rejection, reported if nothing pans out.
    let mut hint: Option<(VerifyError, Certificate)> = None;
    // Last dead end hit below an otherwise acceptable candidate.
    let mut dead_end: Option<VerifyError> = None;

    let root_parents = opts.roots.find_potential_parents(child)?;
    let intermediate_parents = opts.intermediates.find_potential_parents(child)?;
    let candidates = root_parents
        .into_iter()
        .map(|idx| (true, idx))
        .chain(intermediate_parents.into_iter().map(|idx| (false, idx)));

    for (is_root, idx) in candidates {
        let pool = if is_root { opts.roots } else { opts.intermediates };
        let candidate = &pool.certs()[idx];
        if already_in_chain(candidate, current_chain) {
            continue;
        }
        *sig_checks += 1;
        if *sig_checks > opts.max_signature_checks.unwrap_or(MAX_CHAIN_SIGNATURE_CHECKS) {
            return Err(VerifyError::SignatureCheckLimit);
        }
        if let Err(e) = check_signature_from(child, candidate) {
            if hint.is_none() {
                hint = Some((e, candidate.clone()));
            }
            continue;
        }
        if let Err(e) = is_valid(candidate, is_root, current_chain) {
            if hint.is_none() {
                hint = Some((e, candidate.clone()));
            }
            continue;
        }
        if let Some(constraint) = pool.constraint(idx) {
            if let Err(e) = constraint(current_chain) {
                if hint.is_none() {
                    hint = Some((VerifyError::Constraint(e.to_string()), candidate.clone()));
                }
                continue;
            }
        }

        let mut extended = current_chain.to_vec();
        extended.push(candidate.clone());
        if is_root {
            chains.push(extended);
        } else {
            match build_chains(&extended, sig_checks, opts) {
                Ok(child_chains) => chains.extend(child_chains),
                Err(e @ VerifyError::SignatureCheckLimit) => return Err(e),
                Err(e) => dead_end = Some(e),
            }
        }
    }

    if chains.is_empty() {
        if let Some(e) = dead_end {
            return Err(e);
        }
        let (hint_err, hint_cert) = match hint {
            Some((e, c)) => (Some(Box::new(e)), Some(Box::new(c))),
            None => (None, None),
        };
        return Err(UnknownAuthorityError {
            cert: Box::new(child.clone()),
            hint_err,
            hint_cert,
        }
        .into());
    }
    Ok(chains)
}

/// Whether a semantically equal certificate is already part of the chain:
/// same subject, same public key, same SubjectAltName extension bytes. Not
/// raw-byte equality, so that a cross-signed variant of a certificate
/// already in the chain is recognized and the search does not loop.
fn already_in_chain(candidate: &Certificate, chain: &[Certificate]) -> bool {
    let candidate_san = subject_alt_name(candidate);
    for cert in chain {
        if candidate.tbs_certificate.subject != cert.tbs_certificate.subject {
            continue;
        }
        if candidate.tbs_certificate.subject_public_key_info
            != cert.tbs_certificate.subject_public_key_info
        {
            continue;
        }
        match (candidate_san, subject_alt_name(cert)) {
            (None, None) => return true,
            (Some(a), Some(b)) if a.extn_value == b.extn_value => return true,
            _ => {}
        }
    }
    false
}

fn subject_alt_name(cert: &Certificate) -> Option<&Extension> {
    cert.tbs_certificate
        .extensions
        .as_ref()
        .and_then(|exts| exts.iter().find(|ext| ext.extn_id == ID_CE_SUBJECT_ALT_NAME))
}

/// Verifies that `child`'s signature was produced by `issuer`'s key.
fn check_signature_from(child: &Certificate, issuer: &Certificate) -> Result<(), VerifyError> {
    let key = VerifyingKey::try_from(issuer)
        .map_err(|e| VerifyError::SignatureVerification(e.to_string()))?;
    key.verify_strict(child)
        .map_err(|e| VerifyError::SignatureVerification(e.to_string()))
}

/// Structural validity of a candidate parent: its subject must match the
/// child's issuer, and non-root candidates must be CA certificates. Expiry,
/// path length and key usage bits are intentionally not checked.
fn is_valid(
    candidate: &Certificate,
    is_root: bool,
    current_chain: &[Certificate],
) -> Result<(), VerifyError> {
    if let Some(child) = current_chain.last() {
        if child.tbs_certificate.issuer != candidate.tbs_certificate.subject {
            return Err(VerifyError::NameMismatch);
        }
    }
    if !is_root
        && !candidate
            .tbs_certificate
            .get::<BasicConstraints>()?
            .is_some_and(|(_, bc)| bc.ca)
    {
        return Err(VerifyError::NotAuthorizedToSign);
    }
    Ok(())
}

/// Walks the chain root to leaf, crossing out requested usages that an
/// EKU-bearing certificate does not carry. Certificates without the extension
/// constrain nothing, and a certificate carrying anyExtendedKeyUsage is good
/// for everything.
fn check_chain_for_key_usage(chain: &[Certificate], key_usages: &[ObjectIdentifier]) -> bool {
    if chain.is_empty() {
        return false;
    }
    let mut usages: Vec<Option<ObjectIdentifier>> = key_usages.iter().copied().map(Some).collect();
    let mut remaining = usages.len();

    for cert in chain.iter().rev() {
        let Ok(Some((_, eku))) = cert.tbs_certificate.get::<ExtendedKeyUsage>() else {
            continue;
        };
        if eku.0.contains(&ANY_EXTENDED_KEY_USAGE) {
            continue;
        }
        for slot in &mut usages {
            let Some(requested) = slot else { continue };
            if !eku.0.contains(requested) {
                *slot = None;
                remaining -= 1;
                if remaining == 0 {
                    return false;
                }
            }
        }
    }
    true
}
