// Ported from "sunlight" (https://github.com/FiloSottile/sunlight)
// Copyright 2023 The Sunlight Authors
// Licensed under ISC License found in the LICENSE file or at https://opensource.org/license/isc-license-txt
//
// Ported from "certificate-transparency-go" (https://github.com/google/certificate-transparency-go)
// Copyright 2016 Google LLC. All Rights Reserved.
// Licensed under Apache-2.0 License found in the LICENSE file or at https://www.apache.org/licenses/LICENSE-2.0
//
// This ports code from the original Go projects "sunlight" and "certificate-transparency-go" and adapts it to Rust idioms.
//
// Modifications and Rust implementation Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Provides functionality for parsing and validating certificates based on the requirements of [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962).
//!
//! This file contains code ported from the original projects [sunlight](https://github.com/FiloSottile/sunlight) and [certificate-transparency-go](https://github.com/google/certificate-transparency-go).
//!
//! References:
//! - [http.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/internal/ctlog/http.go)
//! - [cert_checker.go](https://github.com/google/certificate-transparency-go/blob/74d106d3a25205b16d571354c64147c5f1f7dbc1/trillian/ctfe/cert_checker.go)
//! - [cert_checker_test.go](https://github.com/google/certificate-transparency-go/blob/74d106d3a25205b16d571354c64147c5f1f7dbc1/trillian/ctfe/cert_checker_test.go)

use crate::CtApiError;
use der::{
    asn1::{Null, OctetString},
    oid::{
        db::rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER,
        db::rfc6962::{CT_PRECERT_POISON, CT_PRECERT_SIGNING_CERT},
        AssociatedOid, ObjectIdentifier,
    },
};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use x509_cert::{
    der::{Decode, Encode},
    ext::{
        pkix::{AuthorityKeyIdentifier, ExtendedKeyUsage},
        Extension,
    },
    impl_newtype, Certificate, TbsCertificate,
};
use x509_path::{verify, CertPool, UnixTimestamp, VerifyOptions, ANY_EXTENDED_KEY_USAGE};

// Data structures for the submission APIs from
// [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962#section-4).

/// Add-(pre-)chain request.
#[serde_as]
#[derive(Deserialize)]
pub struct AddChainRequest {
    #[serde_as(as = "Vec<Base64>")]
    pub chain: Vec<Vec<u8>>,
}

/// Add-(pre-)chain response.
#[serde_as]
#[derive(Debug, Serialize)]
pub struct AddChainResponse {
    pub sct_version: u8,
    #[serde_as(as = "Base64")]
    pub id: Vec<u8>,
    pub timestamp: UnixTimestamp,
    #[serde_as(as = "Base64")]
    pub extensions: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub signature: Vec<u8>,
}

/// Get-roots response.
#[serde_as]
#[derive(Serialize)]
pub struct GetRootsResponse {
    #[serde_as(as = "Vec<Base64>")]
    pub certificates: Vec<Vec<u8>>,
}

/// Chain validation policy for a single log.
///
/// Wraps path building with the CT-specific admission checks: submitted
/// chains are parsed, filtered against the leaf policy knobs below, verified
/// against the trusted roots, and finally classified as certificate or
/// precertificate.
pub struct ChainValidator {
    /// Trusted roots accepted by this log.
    pub roots: CertPool,

    /// Accept only leaves with NotAfter at or later than this (milliseconds).
    pub not_after_start: Option<UnixTimestamp>,

    /// Accept only leaves with NotAfter strictly earlier than this.
    pub not_after_limit: Option<UnixTimestamp>,

    /// Reject leaves that have expired at submission time. Mutually exclusive
    /// with `reject_unexpired`.
    pub reject_expired: bool,

    /// Reject leaves that have not yet expired at submission time.
    pub reject_unexpired: bool,

    /// Leaves carrying any extension with one of these OIDs are rejected.
    pub reject_extensions: Vec<ObjectIdentifier>,

    /// If non-empty, the leaf must carry at least one of these extended key
    /// usages. An empty list disables the filter.
    pub ext_key_usages: Vec<ObjectIdentifier>,
}

impl ChainValidator {
    /// Returns a validator trusting `roots`, with every policy knob at its
    /// permissive default.
    pub fn new(roots: CertPool) -> Self {
        Self {
            roots,
            not_after_start: None,
            not_after_limit: None,
            reject_expired: false,
            reject_unexpired: false,
            reject_extensions: Vec::new(),
            ext_key_usages: Vec::new(),
        }
    }

    /// Validates a submitted certificate chain and returns the verified path,
    /// leaf first. The path is the submitted chain itself, possibly extended
    /// by one trusted root the submitter omitted.
    ///
    /// `now` is the submission time in milliseconds, used only by the
    /// expired/unexpired policy knobs. Chain building performs no time
    /// checks: CT observes certificates rather than policing them.
    ///
    /// # Errors
    ///
    /// Returns a `CtApiError` if the chain fails to parse, fails a policy
    /// check, has no path to a trusted root, has a path that is not
    /// order-equivalent to the submission, or does not match the endpoint
    /// (certificate vs. precertificate).
    pub fn validate_chain(
        &self,
        raw_chain: &[Vec<u8>],
        expect_precert: bool,
        now: UnixTimestamp,
    ) -> Result<Vec<Certificate>, CtApiError> {
        let Some((leaf_der, rest)) = raw_chain.split_first() else {
            return Err(CtApiError::EmptyChain);
        };
        let leaf = parse_certificate(leaf_der)?;

        // Check whether the expiry date is within the acceptable range for
        // this log shard. NotAfter dates prior to the Unix epoch are treated
        // as out of range.
        let not_after = u64::try_from(
            leaf.tbs_certificate
                .validity
                .not_after
                .to_unix_duration()
                .as_millis(),
        )
        .map_err(|_| CtApiError::NotAfterOutOfRange)?;
        if self.not_after_start.is_some_and(|start| start > not_after)
            || self.not_after_limit.is_some_and(|limit| limit <= not_after)
        {
            return Err(CtApiError::NotAfterOutOfRange);
        }

        let expired = now > not_after;
        if self.reject_expired && expired {
            return Err(CtApiError::CertificateExpired);
        }
        if self.reject_unexpired && !expired {
            return Err(CtApiError::CertificateUnexpired);
        }

        if let Some(exts) = &leaf.tbs_certificate.extensions {
            for ext in exts {
                if self.reject_extensions.contains(&ext.extn_id) {
                    return Err(CtApiError::DeniedExtension(ext.extn_id));
                }
            }
        }

        // Leaf-level EKU allow-list. Chrome's CT policy lists a missing
        // acceptable EKU as one reason for a log to reject a submission:
        // <https://googlechrome.github.io/CertificateTransparency/log_policy.html>.
        if !self.ext_key_usages.is_empty()
            && !leaf
                .tbs_certificate
                .get::<ExtendedKeyUsage>()?
                .is_some_and(|(_, eku)| eku.0.iter().any(|v| self.ext_key_usages.contains(v)))
        {
            return Err(CtApiError::MissingRequiredEku);
        }

        // We can now do the verification. Use fairly lax options, as CT is
        // intended to observe certificates rather than police them. EKU
        // filtering along the chain is disabled here since the leaf policy
        // above already ran.
        let mut chain = Vec::with_capacity(raw_chain.len());
        chain.push(leaf);
        for der in rest {
            chain.push(parse_certificate(der)?);
        }
        let intermediates = CertPool::new(chain[1..].to_vec())?;
        let opts = VerifyOptions {
            roots: &self.roots,
            intermediates: &intermediates,
            key_usages: vec![ANY_EXTENDED_KEY_USAGE],
            current_time: Some(now),
            max_signature_checks: None,
        };
        let paths = verify(&chain[0], &opts)?;

        // RFC 6962 requires the log to verify the chain of intermediates as
        // provided by the submitter, so among all discovered paths pick the
        // one that matches the submission position by position. The path may
        // have one extra certificate when the submitter left out the root.
        let verified = paths
            .into_iter()
            .find(|path| {
                (path.len() == chain.len() || path.len() == chain.len() + 1)
                    && chain.iter().zip(path).all(|(submitted, found)| submitted == found)
            })
            .ok_or(CtApiError::NoCompliantPath)?;

        let is_precert = is_precert(&verified[0])?;
        if is_precert != expect_precert {
            return Err(CtApiError::EndpointMismatch { is_precert });
        }

        Ok(verified)
    }
}

/// Precertificate poison extension that can be decoded with [`TbsCertificate::get`].
#[derive(Debug)]
struct CTPrecertPoison(Null);

impl AssociatedOid for CTPrecertPoison {
    const OID: ObjectIdentifier = CT_PRECERT_POISON;
}
impl_newtype!(CTPrecertPoison, Null);

/// Returns whether or not the certificate contains the precertificate poison
/// extension. The poison must be critical and its value an ASN.1 NULL.
///
/// # Errors
///
/// Returns an error if the poison extension is present but invalid.
pub fn is_precert(cert: &Certificate) -> Result<bool, CtApiError> {
    match cert.tbs_certificate.get::<CTPrecertPoison>()? {
        Some((true, _)) => Ok(true),
        Some((false, _)) => Err(CtApiError::InvalidCTPoison),
        None => Ok(false),
    }
}

/// Returns whether or not the certificate contains the `CertificateTransparency`
/// extended key usage marking it as a precertificate signing certificate.
pub fn is_pre_issuer(tbs: &TbsCertificate) -> Result<bool, CtApiError> {
    match tbs.get::<ExtendedKeyUsage>()? {
        Some((_, eku)) => {
            for usage in eku.0 {
                if usage == CT_PRECERT_SIGNING_CERT {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Builds a Certificate Transparency pre-certificate (RFC 6962
/// s3.1) from the given `TBSCertificate`, returning a DER-encoded
/// `TBSCertificate`.
///
/// This function removes the CT poison extension (there must be exactly 1 of
/// these), preserving the order of other extensions.
///
/// If `issuer_opt` is provided, this should be a Precertificate Signing Certificate
/// that was used to sign the precert (indicated by having the special
/// `CertificateTransparency` extended key usage).  In this case, the issuance
/// information of the pre-cert is updated to reflect the next issuer in the
/// chain, i.e. the issuer of this special intermediate:
///   - The precert's `Issuer` is changed to the Issuer of the intermediate
///   - The precert's `AuthorityKeyId` is changed to the `AuthorityKeyId` of the
///     intermediate.
///
/// # Errors
///
/// Returns an error if the poison extension is missing or duplicated, or if
/// `issuer_opt` does not actually carry the `CertificateTransparency`
/// extended key usage.
pub fn build_precert_tbs(
    tbs: &TbsCertificate,
    issuer_opt: Option<&TbsCertificate>,
) -> Result<Vec<u8>, CtApiError> {
    if let Some(issuer) = issuer_opt {
        if !is_pre_issuer(issuer)? {
            return Err(CtApiError::PreIssuerMissingEku);
        }
    }

    let mut tbs = tbs.clone();

    let exts = tbs
        .extensions
        .as_mut()
        .ok_or(CtApiError::InvalidCTPoison)?;

    // Remove the CT poison extension, requiring exactly one occurrence.
    let mut ct_poison_idx: Option<usize> = None;
    for (idx, ext) in exts.iter().enumerate() {
        if ext.extn_id == CT_PRECERT_POISON {
            if ct_poison_idx.is_some() {
                return Err(CtApiError::InvalidCTPoison);
            }
            ct_poison_idx = Some(idx);
        }
    }
    let ct_poison_idx = ct_poison_idx.ok_or(CtApiError::InvalidCTPoison)?;
    exts.remove(ct_poison_idx);

    if let Some(issuer) = issuer_opt {
        // Update the precert's Issuer field.
        tbs.issuer = issuer.issuer.clone();

        // Also need to update the cert's AuthorityKeyID extension
        // to that of the preIssuer.
        let issuer_auth_key_id = match issuer.get::<AuthorityKeyIdentifier>()? {
            Some((_, aki)) => Some(OctetString::new(aki.to_der()?)?),
            None => None,
        };

        let mut key_at: Option<usize> = None;
        for (idx, ext) in exts.iter().enumerate() {
            if ext.extn_id == ID_CE_AUTHORITY_KEY_IDENTIFIER {
                key_at = Some(idx);
            }
        }

        if let Some(idx) = key_at {
            // PreCert has an auth-key-id; replace it with the value from the preIssuer
            if let Some(key_id) = issuer_auth_key_id {
                exts[idx].extn_value = key_id;
            } else {
                exts.remove(idx);
            }
        } else if let Some(key_id) = issuer_auth_key_id {
            // PreCert did not have an auth-key-id, but the preIssuer does, so add it at the end.
            exts.push(Extension {
                extn_id: ID_CE_AUTHORITY_KEY_IDENTIFIER,
                critical: false,
                extn_value: key_id,
            });
        }
    }

    Ok(tbs.to_der()?)
}

/// Parse a certificate and verify that it is well-formed.
///
/// # Errors
///
/// Returns an error if the certificate cannot be parsed, or if the outer
/// signature algorithm does not match the one inside the `TBSCertificate`:
/// <https://github.com/google/certificate-transparency-go/pull/702>.
pub fn parse_certificate(bytes: &[u8]) -> Result<Certificate, CtApiError> {
    let cert = Certificate::from_der(bytes)?;
    if cert.signature_algorithm != cert.tbs_certificate.signature {
        return Err(CtApiError::MismatchingSigAlg);
    }
    Ok(cert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::prelude::*;
    use der::oid::db::rfc5280::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
    use x509_cert::spki::AlgorithmIdentifierOwned;
    use x509_path::certs_to_bytes;

    fn parse_datetime(s: &str) -> UnixTimestamp {
        u64::try_from(DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()).unwrap()
    }

    fn test_now() -> UnixTimestamp {
        parse_datetime("2025-01-01T00:00:00Z")
    }

    #[test]
    fn test_mismatched_sig_alg() {
        let mut cert =
            Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem")).unwrap()[0]
                .clone();
        cert.signature_algorithm = AlgorithmIdentifierOwned {
            oid: der::oid::db::rfc5912::ECDSA_WITH_SHA_384,
            parameters: None,
        };
        let err = parse_certificate(&cert.to_der().unwrap()).unwrap_err();
        assert!(matches!(err, CtApiError::MismatchingSigAlg));
    }

    macro_rules! test_is_precert {
        ($name:ident, $cert:expr, $want_precert:expr, $want_err:expr) => {
            #[test]
            fn $name() {
                match is_precert($cert) {
                    Ok(b) => {
                        assert!(!$want_err);
                        assert_eq!(b, $want_precert);
                    }
                    Err(_) => assert!($want_err),
                }
            }
        };
    }

    test_is_precert!(
        valid_precert,
        &Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem")).unwrap()[0],
        true,
        false
    );

    test_is_precert!(
        valid_cert,
        &Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem")).unwrap()[0],
        false,
        false
    );

    test_is_precert!(
        remove_exts_from_precert,
        wipe_extensions(
            &mut Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem")).unwrap()
                [0]
        ),
        false,
        false
    );

    test_is_precert!(
        poison_non_critical,
        make_poison_non_critical(
            &mut Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem")).unwrap()
                [0]
        ),
        false,
        true
    );

    test_is_precert!(
        poison_non_null,
        make_poison_non_null(
            &mut Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem")).unwrap()
                [0]
        ),
        false,
        true
    );

    macro_rules! test_validate_chain {
        ($name:ident; $($root_file:expr),+; $($chain_file:expr),+; $not_after_start:expr; $not_after_limit:expr; $expect_precert:expr; $want_err:expr) => {
            #[test]
            fn $name() {
                let mut roots = Vec::new();
                $(
                    roots.append(&mut Certificate::load_pem_chain(include_bytes!($root_file)).unwrap());
                )*
                let mut chain = Vec::new();
                $(
                    chain.append(&mut Certificate::load_pem_chain(include_bytes!($chain_file)).unwrap());
                )*

                let mut validator = ChainValidator::new(CertPool::new(roots).unwrap());
                validator.not_after_start = $not_after_start;
                validator.not_after_limit = $not_after_limit;

                assert_eq!(
                    validator
                        .validate_chain(&certs_to_bytes(&chain).unwrap(), $expect_precert, test_now())
                        .is_err(),
                    $want_err
                );
            }
        };
    }

    macro_rules! test_validate_chain_success {
        ($name:ident, $($chain_file:expr),+) => {
            test_validate_chain!($name; "../tests/test-root-ca-cert.pem", "../tests/second-root-ca-cert.pem"; $($chain_file),+; None; None; false; false);
        };
    }

    macro_rules! test_validate_chain_fail {
        ($name:ident, $($chain_file:expr),+) => {
            test_validate_chain!($name; "../tests/test-root-ca-cert.pem", "../tests/second-root-ca-cert.pem"; $($chain_file),+; None; None; false; true);
        };
    }

    test_validate_chain_fail!(missing_intermediate_ca, "../tests/leaf-cert.pem");
    test_validate_chain_fail!(
        wrong_cert_order,
        "../tests/intermediate-ca-cert.pem",
        "../tests/leaf-cert.pem"
    );
    test_validate_chain_fail!(
        unrelated_cert_in_chain,
        "../tests/leaf-cert.pem",
        "../tests/non-ca-intermediate-cert.pem"
    );
    test_validate_chain_fail!(
        unrelated_cert_after_chain,
        "../tests/leaf-cert.pem",
        "../tests/intermediate-ca-cert.pem",
        "../tests/non-ca-intermediate-cert.pem"
    );
    test_validate_chain_success!(
        valid_chain,
        "../tests/leaf-cert.pem",
        "../tests/intermediate-ca-cert.pem"
    );
    test_validate_chain_success!(
        valid_chain_with_root,
        "../tests/leaf-cert.pem",
        "../tests/intermediate-ca-cert.pem",
        "../tests/test-root-ca-cert.pem"
    );
    test_validate_chain_success!(
        valid_chain_cross_signed,
        "../tests/leaf-cert.pem",
        "../tests/cross-signed-intermediate-ca-cert.pem"
    );

    // A precertificate on the final-certificate endpoint and vice versa.
    test_validate_chain!(precert_on_add_chain; "../tests/test-root-ca-cert.pem"; "../tests/precert-valid.pem", "../tests/intermediate-ca-cert.pem"; None; None; false; true);
    test_validate_chain!(final_cert_on_add_pre_chain; "../tests/test-root-ca-cert.pem"; "../tests/leaf-cert.pem", "../tests/intermediate-ca-cert.pem"; None; None; true; true);
    test_validate_chain!(valid_precert_chain; "../tests/test-root-ca-cert.pem"; "../tests/precert-valid.pem", "../tests/intermediate-ca-cert.pem"; None; None; true; false);
    test_validate_chain!(valid_preissuer_chain; "../tests/test-root-ca-cert.pem"; "../tests/precert-signed-by-precert-signing-ca.pem", "../tests/precert-signing-ca-cert.pem", "../tests/intermediate-ca-cert.pem"; None; None; true; false);

    macro_rules! test_not_after {
        ($name:ident; $start:expr; $limit:expr; $want_err:expr) => {
            test_validate_chain!($name; "../tests/test-root-ca-cert.pem"; "../tests/leaf-cert.pem", "../tests/intermediate-ca-cert.pem"; $start; $limit; false; $want_err);
        };
    }
    // The test leaves expire at the start of 2044.
    test_not_after!(not_after_no_range; None; None; false);
    test_not_after!(not_after_valid_range; Some(parse_datetime("2043-01-01T00:00:00Z")); Some(parse_datetime("2045-01-01T00:00:00Z")); false);
    test_not_after!(not_after_before_start; Some(parse_datetime("2044-06-01T00:00:00Z")); None; true);
    test_not_after!(not_after_at_limit; None; Some(parse_datetime("2044-01-01T00:00:00Z")); true);

    #[test]
    fn chain_must_match_discovered_path() {
        // The cross-signed twin is trusted directly, so a path for the leaf
        // exists, but it runs through a different certificate than the
        // submitted intermediate.
        let roots = Certificate::load_pem_chain(include_bytes!(
            "../tests/cross-signed-intermediate-ca-cert.pem"
        ))
        .unwrap();
        let chain = [
            Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem")).unwrap()[0]
                .clone(),
            Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                .unwrap()[0]
                .clone(),
        ];
        let validator = ChainValidator::new(CertPool::new(roots).unwrap());
        let err = validator
            .validate_chain(&certs_to_bytes(&chain).unwrap(), false, test_now())
            .unwrap_err();
        assert!(matches!(err, CtApiError::NoCompliantPath));
    }

    #[test]
    fn verified_chain_includes_implicit_root() {
        let roots =
            Certificate::load_pem_chain(include_bytes!("../tests/test-root-ca-cert.pem")).unwrap();
        let root = roots[0].clone();
        let chain = [
            Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem")).unwrap()[0]
                .clone(),
            Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                .unwrap()[0]
                .clone(),
        ];
        let validator = ChainValidator::new(CertPool::new(roots).unwrap());
        let verified = validator
            .validate_chain(&certs_to_bytes(&chain).unwrap(), false, test_now())
            .unwrap();
        assert_eq!(verified.len(), 3);
        assert_eq!(verified[0], chain[0]);
        assert_eq!(verified[1], chain[1]);
        assert_eq!(verified[2], root);
    }

    fn policy_validator() -> ChainValidator {
        let roots =
            Certificate::load_pem_chain(include_bytes!("../tests/test-root-ca-cert.pem")).unwrap();
        ChainValidator::new(CertPool::new(roots).unwrap())
    }

    fn leaf_chain() -> Vec<Vec<u8>> {
        let chain = [
            Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem")).unwrap()[0]
                .clone(),
            Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                .unwrap()[0]
                .clone(),
        ];
        certs_to_bytes(&chain).unwrap()
    }

    #[test]
    fn reject_expired_applies_at_submission_time() {
        let mut validator = policy_validator();
        validator.reject_expired = true;
        assert!(validator.validate_chain(&leaf_chain(), false, test_now()).is_ok());
        let err = validator
            .validate_chain(&leaf_chain(), false, parse_datetime("2044-06-01T00:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, CtApiError::CertificateExpired));
    }

    #[test]
    fn reject_unexpired_applies_at_submission_time() {
        let mut validator = policy_validator();
        validator.reject_unexpired = true;
        let err = validator
            .validate_chain(&leaf_chain(), false, test_now())
            .unwrap_err();
        assert!(matches!(err, CtApiError::CertificateUnexpired));
        assert!(validator
            .validate_chain(&leaf_chain(), false, parse_datetime("2044-06-01T00:00:00Z"))
            .is_ok());
    }

    #[test]
    fn reject_extensions_denies_matching_leaf() {
        let mut validator = policy_validator();
        validator.reject_extensions = vec![ObjectIdentifier::new_unwrap("1.2.3.4.5.6")];
        assert!(validator.validate_chain(&leaf_chain(), false, test_now()).is_ok());

        let chain = [
            Certificate::load_pem_chain(include_bytes!("../tests/custom-extension-leaf-cert.pem"))
                .unwrap()[0]
                .clone(),
            Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                .unwrap()[0]
                .clone(),
        ];
        let err = validator
            .validate_chain(&certs_to_bytes(&chain).unwrap(), false, test_now())
            .unwrap_err();
        assert!(matches!(err, CtApiError::DeniedExtension(oid) if oid.to_string() == "1.2.3.4.5.6"));
    }

    #[test]
    fn ext_key_usages_allow_list_applies_to_leaf() {
        let client_auth_chain = {
            let chain = [
                Certificate::load_pem_chain(include_bytes!("../tests/client-auth-leaf-cert.pem"))
                    .unwrap()[0]
                    .clone(),
                Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                    .unwrap()[0]
                    .clone(),
            ];
            certs_to_bytes(&chain).unwrap()
        };

        let mut validator = policy_validator();
        validator.ext_key_usages = vec![ID_KP_SERVER_AUTH];
        assert!(validator.validate_chain(&leaf_chain(), false, test_now()).is_ok());
        let err = validator
            .validate_chain(&client_auth_chain, false, test_now())
            .unwrap_err();
        assert!(matches!(err, CtApiError::MissingRequiredEku));

        validator.ext_key_usages = vec![ID_KP_CLIENT_AUTH];
        assert!(validator
            .validate_chain(&client_auth_chain, false, test_now())
            .is_ok());

        validator.ext_key_usages = Vec::new();
        assert!(validator
            .validate_chain(&client_auth_chain, false, test_now())
            .is_ok());
    }

    #[test]
    fn test_build_precert_tbs() {
        let precert = &Certificate::load_pem_chain(include_bytes!(
            "../tests/precert-signed-by-precert-signing-ca.pem"
        ))
        .unwrap()[0]
            .tbs_certificate;
        let pre_issuer = &Certificate::load_pem_chain(include_bytes!(
            "../tests/precert-signing-ca-cert.pem"
        ))
        .unwrap()[0]
            .tbs_certificate;

        let der = build_precert_tbs(precert, Some(pre_issuer)).unwrap();
        let tbs = TbsCertificate::from_der(&der).unwrap();

        // Ensure CT poison is removed.
        assert!(precert.get::<CTPrecertPoison>().unwrap().is_some());
        assert!(tbs.get::<CTPrecertPoison>().unwrap().is_none());

        // Ensure issuer has been updated.
        assert_ne!(precert.issuer, tbs.issuer);
        assert_eq!(tbs.issuer, pre_issuer.issuer);

        // Ensure authority key ID has been updated.
        let old_aki = precert.get::<AuthorityKeyIdentifier>().unwrap().unwrap();
        let aki = tbs.get::<AuthorityKeyIdentifier>().unwrap().unwrap();
        let pre_aki = pre_issuer.get::<AuthorityKeyIdentifier>().unwrap().unwrap();
        assert_ne!(aki, old_aki);
        assert_eq!(aki, pre_aki);
    }

    #[test]
    fn build_precert_tbs_round_trips_without_pre_issuer() {
        let tbs = &Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem"))
            .unwrap()[0]
            .tbs_certificate;
        let poison_idx = tbs
            .extensions
            .as_ref()
            .unwrap()
            .iter()
            .position(|ext| ext.extn_id == CT_PRECERT_POISON)
            .unwrap();

        let der = build_precert_tbs(tbs, None).unwrap();

        // Re-adding the poison at its original position must reproduce the
        // original TBS bytes exactly.
        let mut rebuilt = TbsCertificate::from_der(&der).unwrap();
        rebuilt.extensions.as_mut().unwrap().insert(
            poison_idx,
            Extension {
                extn_id: CT_PRECERT_POISON,
                critical: true,
                extn_value: OctetString::new(Null.to_der().unwrap()).unwrap(),
            },
        );
        assert_eq!(rebuilt.to_der().unwrap(), tbs.to_der().unwrap());
    }

    #[test]
    fn build_precert_tbs_requires_exactly_one_poison() {
        let no_poison = &Certificate::load_pem_chain(include_bytes!("../tests/leaf-cert.pem"))
            .unwrap()[0]
            .tbs_certificate;
        assert!(matches!(
            build_precert_tbs(no_poison, None).unwrap_err(),
            CtApiError::InvalidCTPoison
        ));

        let mut doubled = Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem"))
            .unwrap()[0]
            .tbs_certificate
            .clone();
        doubled.extensions.as_mut().unwrap().push(Extension {
            extn_id: CT_PRECERT_POISON,
            critical: true,
            extn_value: OctetString::new(Null.to_der().unwrap()).unwrap(),
        });
        assert!(matches!(
            build_precert_tbs(&doubled, None).unwrap_err(),
            CtApiError::InvalidCTPoison
        ));
    }

    #[test]
    fn build_precert_tbs_rejects_pre_issuer_without_ct_eku() {
        let tbs = &Certificate::load_pem_chain(include_bytes!("../tests/precert-valid.pem"))
            .unwrap()[0]
            .tbs_certificate;
        let ordinary_issuer =
            &Certificate::load_pem_chain(include_bytes!("../tests/intermediate-ca-cert.pem"))
                .unwrap()[0]
                .tbs_certificate;
        assert!(matches!(
            build_precert_tbs(tbs, Some(ordinary_issuer)).unwrap_err(),
            CtApiError::PreIssuerMissingEku
        ));
    }

    fn wipe_extensions(cert: &mut Certificate) -> &Certificate {
        cert.tbs_certificate.extensions = None;
        cert
    }

    fn make_poison_non_critical(cert: &mut Certificate) -> &Certificate {
        cert.tbs_certificate.extensions = Some(vec![Extension {
            extn_id: CT_PRECERT_POISON,
            critical: false,
            extn_value: OctetString::new(Null.to_der().unwrap()).unwrap(),
        }]);
        cert
    }

    fn make_poison_non_null(cert: &mut Certificate) -> &Certificate {
        cert.tbs_certificate.extensions = Some(vec![Extension {
            extn_id: CT_PRECERT_POISON,
            critical: true,
            extn_value: OctetString::new([]).unwrap(),
        }]);
        cert
    }
}
