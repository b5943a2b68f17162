// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

pub mod checkpoint;
pub mod entry;
pub mod rfc6962;
pub mod signer;

pub use checkpoint::*;
pub use entry::*;
pub use rfc6962::*;
pub use signer::*;

use der::oid::ObjectIdentifier;

#[derive(thiserror::Error, Debug)]
pub enum CtApiError {
    #[error(transparent)]
    Der(#[from] der::Error),
    #[error(transparent)]
    X509(#[from] x509_verify::spki::Error),
    #[error(transparent)]
    Chain(#[from] x509_path::VerifyError),
    #[error(transparent)]
    Signature(#[from] signature::Error),
    #[error(transparent)]
    Extension(#[from] entry::ExtensionError),
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("empty chain")]
    EmptyChain,
    #[error("mismatching signature algorithm")]
    MismatchingSigAlg,
    #[error("leaf NotAfter outside accepted range")]
    NotAfterOutOfRange,
    #[error("rejecting expired certificate")]
    CertificateExpired,
    #[error("rejecting unexpired certificate")]
    CertificateUnexpired,
    #[error("rejected extension {0}")]
    DeniedExtension(ObjectIdentifier),
    #[error("leaf missing required extended key usage")]
    MissingRequiredEku,
    #[error("no RFC-compliant path to root")]
    NoCompliantPath,
    #[error("CT poison extension is not critical or invalid")]
    InvalidCTPoison,
    #[error("pre-issuer missing CertificateTransparency extended key usage")]
    PreIssuerMissingEku,
    #[error("missing precertificate issuer")]
    MissingPrecertIssuer,
    #[error("missing precertificate signing certificate issuer")]
    MissingPrecertSigningCertificateIssuer,
    #[error(
        "{}certificate submitted to add-{}chain", if *.is_precert { "pre-" } else { "final " }, if *.is_precert { "" } else { "pre-" }
    )]
    EndpointMismatch { is_precert: bool },

    #[error("invalid signed-note key name")]
    InvalidKeyName,
    #[error("malformed checkpoint note")]
    Malformed,
    #[error("missing verifier signature")]
    MissingVerifierSignature,
    #[error("timestamp is after current time")]
    InvalidTimestamp,
    #[error("checkpoint origin does not match")]
    OriginMismatch,
    #[error("unexpected extension")]
    UnexpectedExtension,
}
