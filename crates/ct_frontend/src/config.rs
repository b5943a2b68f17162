// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Log configuration and its startup validation.
//!
//! Configuration errors are fatal: a log that rejects both expired and
//! unexpired certificates, or whose NotAfter window is inverted, would turn
//! away every submission, so [`LogConfig::validate`] refuses to let it start.

use chrono::{DateTime, Utc};
use ctlog_api::is_key_name_valid;
use der::oid::{
    db::rfc5280::{
        ID_KP_CLIENT_AUTH, ID_KP_CODE_SIGNING, ID_KP_EMAIL_PROTECTION, ID_KP_OCSP_SIGNING,
        ID_KP_SERVER_AUTH, ID_KP_TIME_STAMPING,
    },
    ObjectIdentifier,
};
use serde::Deserialize;
use thiserror::Error;
use x509_path::ANY_EXTENDED_KEY_USAGE;

/// Configuration for a single CT log frontend.
#[derive(Deserialize, Debug, Clone)]
pub struct LogConfig {
    /// The log's origin, e.g. `ct.example.com/logs/2025h1`. Used as the
    /// checkpoint key name and as the prefix for all submission paths.
    pub origin: String,
    pub description: Option<String>,
    /// Submissions must have a NotAfter date at or after this point.
    pub not_after_start: Option<DateTime<Utc>>,
    /// Submissions must have a NotAfter date strictly before this point.
    pub not_after_limit: Option<DateTime<Utc>>,
    /// Reject submissions that have expired at submission time.
    #[serde(default)]
    pub reject_expired: bool,
    /// Reject submissions that have not yet expired at submission time.
    #[serde(default)]
    pub reject_unexpired: bool,
    /// Extension OIDs (dotted decimal) that must not appear in submitted leaves.
    #[serde(default)]
    pub reject_extensions: Vec<String>,
    /// Extended key usages that submitted leaves must carry at least one of.
    /// Empty means no filtering; [`KeyPurpose::Any`] also disables filtering.
    #[serde(default)]
    pub ext_key_usages: Vec<KeyPurpose>,
    /// Deadline for a whole submission, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout: u64,
    /// Replace error details in HTTP response bodies with generic messages.
    /// Details remain available in the logs.
    #[serde(default)]
    pub mask_internal_errors: bool,
}

fn default_request_timeout_seconds() -> u64 {
    10
}

/// Extended key usage names accepted in configuration, mirroring the names
/// used by RFC 5280 and existing CT log deployments.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    Any,
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    #[serde(rename = "OCSPSigning")]
    OcspSigning,
}

impl KeyPurpose {
    /// The OID this key purpose matches against in leaf certificates.
    #[must_use]
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            KeyPurpose::Any => ANY_EXTENDED_KEY_USAGE,
            KeyPurpose::ServerAuth => ID_KP_SERVER_AUTH,
            KeyPurpose::ClientAuth => ID_KP_CLIENT_AUTH,
            KeyPurpose::CodeSigning => ID_KP_CODE_SIGNING,
            KeyPurpose::EmailProtection => ID_KP_EMAIL_PROTECTION,
            KeyPurpose::TimeStamping => ID_KP_TIME_STAMPING,
            KeyPurpose::OcspSigning => ID_KP_OCSP_SIGNING,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("origin {0:?} is not a valid checkpoint key name")]
    InvalidOrigin(String),
    #[error("cannot reject both expired and unexpired certificates")]
    ConflictingExpiryPolicy,
    #[error("not_after_start must be before not_after_limit")]
    EmptyNotAfterWindow,
    #[error("invalid extension OID {oid:?}: {reason}")]
    InvalidRejectExtension {
        oid: String,
        reason: der::oid::Error,
    },
}

impl LogConfig {
    /// Checks the configuration for contradictions, returning the parsed
    /// extension deny-list and EKU allow-list on success.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the origin is not usable as a checkpoint
    /// key name, if both expiry rejection flags are set, if the NotAfter
    /// window is empty, or if an extension OID fails to parse.
    pub fn validate(&self) -> Result<(Vec<ObjectIdentifier>, Vec<ObjectIdentifier>), ConfigError> {
        if !is_key_name_valid(&self.origin) {
            return Err(ConfigError::InvalidOrigin(self.origin.clone()));
        }
        if self.reject_expired && self.reject_unexpired {
            return Err(ConfigError::ConflictingExpiryPolicy);
        }
        if let (Some(start), Some(limit)) = (self.not_after_start, self.not_after_limit) {
            if start >= limit {
                return Err(ConfigError::EmptyNotAfterWindow);
            }
        }
        let reject_extensions = self
            .reject_extensions
            .iter()
            .map(|s| {
                s.parse::<ObjectIdentifier>()
                    .map_err(|e| ConfigError::InvalidRejectExtension {
                        oid: s.clone(),
                        reason: e,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // "Any" in the configuration disables EKU filtering entirely.
        let ext_key_usages = if self.ext_key_usages.contains(&KeyPurpose::Any) {
            Vec::new()
        } else {
            self.ext_key_usages.iter().map(|k| k.oid()).collect()
        };
        Ok((reject_extensions, ext_key_usages))
    }

    /// The NotAfter window bounds as Unix milliseconds.
    ///
    /// Dates prior to the Unix epoch are treated as the Unix epoch.
    #[must_use]
    pub fn not_after_window(&self) -> (Option<u64>, Option<u64>) {
        (
            self.not_after_start
                .map(|t| u64::try_from(t.timestamp_millis()).unwrap_or_default()),
            self.not_after_limit
                .map(|t| u64::try_from(t.timestamp_millis()).unwrap_or_default()),
        )
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            description: None,
            not_after_start: None,
            not_after_limit: None,
            reject_expired: false,
            reject_unexpired: false,
            reject_extensions: Vec::new(),
            ext_key_usages: Vec::new(),
            request_timeout: default_request_timeout_seconds(),
            mask_internal_errors: false,
        }
    }
}
