// Ported from "sunlight" (https://github.com/FiloSottile/sunlight)
// Copyright 2023 The Sunlight Authors
// Licensed under ISC License found in the LICENSE file or at https://opensource.org/license/isc-license-txt
//
// This ports code from the original Go project "sunlight" and adapts it to Rust idioms.
//
// Modifications and Rust implementation Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Log entry types and the [static-ct-api](https://c2sp.org/static-ct-api) wire formats derived from them.
//!
//! This file contains code ported from the original project [sunlight](https://github.com/FiloSottile/sunlight).
//!
//! References:
//! - [tile.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/tile.go)
//! - [extensions.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/extensions.go)

use crate::{build_precert_tbs, is_pre_issuer, CtApiError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};
use thiserror::Error;
use x509_cert::{der::Encode, Certificate};
use x509_path::UnixTimestamp;

/// The zero-based index of a leaf in the log.
pub type LeafIndex = u64;

/// Index and timestamp assigned to an entry by the sequencer.
pub type SequenceMetadata = (LeafIndex, UnixTimestamp);

/// Key for the deduplication cache.
pub type CacheKey = [u8; 32];

/// A validated log entry that has not yet been sequenced.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PendingEntry {
    /// Either the `TimestampedEntry.signed_entry`, or the
    /// `PreCert.tbs_certificate` for precertificates.
    /// It must be at most 2^24-1 bytes long.
    pub certificate: Vec<u8>,

    /// Precertificate-only fields. `None` for final certificates.
    pub precert_opt: Option<PrecertData>,

    /// The SHA-256 hashes of the certificates in the
    /// `X509ChainEntry.certificate_chain` or
    /// `PrecertChainEntry.precertificate_chain`.
    pub chain_fingerprints: Vec<[u8; 32]>,
}

/// The parts of a log entry that are present exactly when the entry is a
/// precertificate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PrecertData {
    /// The `PreCert.issuer_key_hash`.
    pub issuer_key_hash: [u8; 32],

    /// The `PrecertChainEntry.pre_certificate`.
    /// It must be at most 2^24-1 bytes long.
    pub pre_certificate: Vec<u8>,
}

/// A log entry that has been assigned an index and timestamp by the
/// sequencer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub inner: PendingEntry,

    /// The zero-based index of the leaf in the log.
    /// It must be between 0 and 2^40-1.
    pub leaf_index: LeafIndex,

    /// The `TimestampedEntry.timestamp`.
    pub timestamp: UnixTimestamp,
}

impl PendingEntry {
    /// Computes the deduplication cache key for this entry: the SHA-256 hash
    /// of the submitted leaf, which is the precertificate when present and
    /// the final certificate otherwise.
    pub fn cache_key(&self) -> CacheKey {
        match &self.precert_opt {
            Some(precert) => Sha256::digest(&precert.pre_certificate).into(),
            None => Sha256::digest(&self.certificate).into(),
        }
    }
}

/// Builds a [`PendingEntry`] from a verified chain, leaf first.
///
/// For precertificates, the stored `certificate` is the defanged
/// `TBSCertificate` produced by [`build_precert_tbs`], and the issuer key
/// hash is the SHA-256 of the issuing certificate's `SubjectPublicKeyInfo`.
/// When the immediate issuer is a precertificate signing certificate, both
/// come from the next certificate up, so the chain must contain it.
///
/// # Errors
///
/// Returns an error if the chain is empty or too short for the
/// precertificate layout, or if re-encoding any certificate fails.
pub fn entry_from_chain(
    chain: &[Certificate],
    is_precert: bool,
) -> Result<PendingEntry, CtApiError> {
    let Some((leaf, issuers)) = chain.split_first() else {
        return Err(CtApiError::EmptyChain);
    };

    let mut chain_fingerprints = Vec::with_capacity(issuers.len());
    for issuer in issuers {
        chain_fingerprints.push(Sha256::digest(issuer.to_der()?).into());
    }

    if !is_precert {
        return Ok(PendingEntry {
            certificate: leaf.to_der()?,
            precert_opt: None,
            chain_fingerprints,
        });
    }

    let Some(issuer) = issuers.first() else {
        return Err(CtApiError::MissingPrecertIssuer);
    };
    let (key_holder, pre_issuer) = if is_pre_issuer(&issuer.tbs_certificate)? {
        let Some(true_issuer) = issuers.get(1) else {
            return Err(CtApiError::MissingPrecertSigningCertificateIssuer);
        };
        (true_issuer, Some(&issuer.tbs_certificate))
    } else {
        (issuer, None)
    };
    let issuer_key_hash = Sha256::digest(
        key_holder
            .tbs_certificate
            .subject_public_key_info
            .to_der()?,
    )
    .into();

    Ok(PendingEntry {
        certificate: build_precert_tbs(&leaf.tbs_certificate, pre_issuer)?,
        precert_opt: Some(PrecertData {
            issuer_key_hash,
            pre_certificate: leaf.to_der()?,
        }),
        chain_fingerprints,
    })
}

impl Entry {
    /// Returns a marshaled RFC 6962 `TimestampedEntry`.
    pub(crate) fn marshal_timestamped_entry(&self) -> Result<Vec<u8>, ExtensionError> {
        let mut buffer = Vec::new();

        buffer.write_u64::<BigEndian>(self.timestamp)?;
        if let Some(precert) = &self.inner.precert_opt {
            buffer.write_u16::<BigEndian>(1)?; // entry_type = precert_entry
            buffer.extend_from_slice(&precert.issuer_key_hash);
        } else {
            buffer.write_u16::<BigEndian>(0)?; // entry_type = x509_entry
        }
        write_length_prefixed(&mut buffer, &self.inner.certificate, 3)?;
        write_length_prefixed(
            &mut buffer,
            &Extensions {
                leaf_index: self.leaf_index,
            }
            .to_bytes()?,
            2,
        )?;

        Ok(buffer)
    }

    /// Returns a marshaled [RFC 6962 `MerkleTreeLeaf`](https://datatracker.ietf.org/doc/html/rfc6962#section-3.4).
    ///
    /// # Errors
    ///
    /// Returns an error if the leaf index cannot be encoded.
    pub fn merkle_tree_leaf(&self) -> Result<Vec<u8>, ExtensionError> {
        let mut buffer = vec![
            0, // version = v1 (0)
            0, // leaf_type = timestamped_entry (0)
        ];
        buffer.extend(self.marshal_timestamped_entry()?);

        Ok(buffer)
    }

    /// Returns a marshaled [static-ct-api `TileLeaf`](https://c2sp.org/static-ct-api#log-entries).
    ///
    /// # Errors
    ///
    /// Returns an error if the leaf index cannot be encoded.
    pub fn tile_leaf(&self) -> Result<Vec<u8>, ExtensionError> {
        let mut buffer = self.marshal_timestamped_entry()?;
        if let Some(precert) = &self.inner.precert_opt {
            write_length_prefixed(&mut buffer, &precert.pre_certificate, 3)?;
        }
        write_length_prefixed(&mut buffer, &self.inner.chain_fingerprints.concat(), 2)?;

        Ok(buffer)
    }
}

/// The `CTExtensions` field of `SignedCertificateTimestamp` and
/// `TimestampedEntry`, according to c2sp.org/static-ct-api.
#[derive(Debug, Default)]
pub struct Extensions {
    pub leaf_index: u64,
}

/// An error returned when marshalling or parsing SCT extensions.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("invalid length")]
    InvalidLength,
    #[error("trailing data")]
    TrailingData,
    #[error("missing leaf_index extension")]
    MissingLeafIndex,
    #[error("leaf index out of range")]
    LeafIndexOverflow,
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl Extensions {
    /// Marshals extensions for inclusion in an add-(pre-)chain response.
    ///
    /// # Errors
    ///
    /// Returns an error if the leaf index does not fit in 40 bits.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExtensionError> {
        // https://github.com/C2SP/C2SP/blob/main/static-ct-api.md#sct-extension
        // enum {
        //     leaf_index(0), (255)
        // } ExtensionType;
        //
        // struct {
        //     ExtensionType extension_type;
        //     opaque extension_data<0..2^16-1>;
        // } Extension;
        //
        // Extension CTExtensions<0..2^16-1>;
        //
        // uint8 uint40[5];
        // uint40 leaf_index;

        if self.leaf_index >> 40 != 0 {
            return Err(ExtensionError::LeafIndexOverflow);
        }

        let mut buffer = Vec::new();
        buffer.write_u8(0)?; // extension_type = leaf_index
        buffer.write_u16::<BigEndian>(5)?;
        buffer.write_uint::<BigEndian>(self.leaf_index, 5)?;

        Ok(buffer)
    }

    /// Parse a `CTExtensions` field, ignoring unknown extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the `leaf_index` extension is missing
    /// or the extension is otherwise malformed.
    pub fn from_bytes(ext_bytes: &[u8]) -> Result<Self, ExtensionError> {
        let mut cursor = Cursor::new(ext_bytes);
        let mut e = Extensions::default();

        while cursor.position() < ext_bytes.len() as u64 {
            let extension_type = cursor.read_u8()?;
            let length = cursor.read_u16::<BigEndian>()? as usize;

            if cursor.position() + length as u64 > ext_bytes.len() as u64 {
                return Err(ExtensionError::InvalidLength);
            }

            let mut extension = vec![0; length];
            cursor.read_exact(&mut extension)?;

            if extension_type == 0 {
                let mut extension_cursor = Cursor::new(&extension);
                e.leaf_index = extension_cursor.read_uint::<BigEndian>(5)?;

                if extension_cursor.position() != extension.len() as u64 {
                    return Err(ExtensionError::TrailingData);
                }

                return Ok(e);
            }
        }

        Err(ExtensionError::MissingLeafIndex)
    }
}

/// Read a length-prefixed value from the passed in reader.
pub(crate) fn read_length_prefixed<R: Read>(
    reader: &mut R,
    length_bytes: usize,
) -> Result<Vec<u8>, std::io::Error> {
    let length = reader.read_uint::<BigEndian>(length_bytes)?;
    let mut buffer = vec![0; usize::try_from(length).unwrap()];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write length-prefixed data to the passed in writer.
fn write_length_prefixed<W: Write>(
    writer: &mut W,
    data: &[u8],
    length_bytes: usize,
) -> Result<(), std::io::Error> {
    writer.write_uint::<BigEndian>(data.len() as u64, length_bytes)?;
    writer.write_all(data)
}
