// Ported from "sunlight" (https://github.com/FiloSottile/sunlight)
// Copyright 2023 The Sunlight Authors
// Licensed under ISC License found in the LICENSE file or at https://opensource.org/license/isc-license-txt
//
// This ports code from the original Go project "sunlight" and adapts it to Rust idioms.
//
// Modifications and Rust implementation Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! SCT and checkpoint signing with a single ECDSA P-256 log key.
//!
//! This file contains code ported from the original project [sunlight](https://github.com/FiloSottile/sunlight).
//!
//! References:
//! - [ctlog.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/internal/ctlog/ctlog.go)
//! - [checkpoint.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/checkpoint.go)

use crate::{
    checkpoint::{is_key_name_valid, key_id, Checkpoint},
    entry::{read_length_prefixed, Entry, Extensions},
    rfc6962::AddChainResponse,
    CtApiError,
};
use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use p256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature as EcdsaSignature, SigningKey as EcdsaSigningKey,
        VerifyingKey as EcdsaVerifyingKey,
    },
    pkcs8::EncodePublicKey,
};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use x509_path::UnixTimestamp;

/// Calculates the log ID from a verifying key.
///
/// # Errors
///
/// Returns an error if decoding the verifying key fails.
pub fn log_id_from_key(vkey: &EcdsaVerifyingKey) -> Result<[u8; 32], x509_verify::spki::Error> {
    let pkix = vkey.to_public_key_der()?;
    Ok(Sha256::digest(&pkix).into())
}

/// Returns a signed add-[pre-]chain response with the `LeafIndex` extension.
///
/// # Errors
///
/// Returns an error if the signing key cannot be encoded or the leaf index
/// does not fit in the SCT extensions.
pub fn signed_certificate_timestamp(
    signing_key: &EcdsaSigningKey,
    entry: &Entry,
) -> Result<AddChainResponse, CtApiError> {
    let mut buffer = vec![
        0, // sct_version = v1 (0)
        0, // signature_type = certificate_timestamp (0)
    ];
    buffer.extend(entry.marshal_timestamped_entry()?);
    let signature = sign(signing_key, &buffer);
    let id = log_id_from_key(signing_key.verifying_key())?.to_vec();

    Ok(AddChainResponse {
        sct_version: 0, // sct_version = v1 (0)
        id,
        timestamp: entry.timestamp,
        extensions: Extensions {
            leaf_index: entry.leaf_index,
        }
        .to_bytes()?,
        signature,
    })
}

/// Produces an encoded digitally-signed signature as defined in RFC 5246.
///
/// We use deterministic RFC 6979 ECDSA signatures so that when fetching a
/// previous SCT's timestamp and index from the deduplication cache, the new SCT
/// we produce is identical.
///
/// # Panics
///
/// Panics if writing to an internal buffer fails, which should never happen.
pub fn sign(signing_key: &EcdsaSigningKey, msg: &[u8]) -> Vec<u8> {
    let sig: EcdsaSignature = signing_key.sign(msg);
    let sig_der = sig.to_der();
    let sig_bytes = sig_der.as_bytes();

    // https://datatracker.ietf.org/doc/html/rfc5246#section-4.7
    let mut digitally_signed = Vec::new();
    digitally_signed.push(4); // hash = sha256
    digitally_signed.push(3); // signature = ecdsa
    digitally_signed
        .write_u16::<BigEndian>(u16::try_from(sig_bytes.len() & 0xFFFF).unwrap())
        .unwrap();
    digitally_signed.extend_from_slice(sig_bytes);

    digitally_signed
}

/// Serializes the passed in STH parameters into the correct format for signing
/// according to <https://datatracker.ietf.org/doc/html/rfc6962#section-3.5>.
/// ```text
/// digitally-signed struct {
///     Version version;
///     SignatureType signature_type = tree_hash;
///     uint64 timestamp;
///     uint64 tree_size;
///     opaque sha256_root_hash[32];
/// } TreeHeadSignature;
/// ```
///
/// # Panics
///
/// Panics if writing to the internal buffer fails, which should never happen.
fn serialize_sth_signature_input(timestamp: u64, tree_size: u64, root_hash: &[u8; 32]) -> Vec<u8> {
    let mut buffer = Vec::new();

    buffer.write_u8(0).unwrap(); // version = 0 (v1)
    buffer.write_u8(1).unwrap(); // signature_type = 1 (tree_hash)
    buffer.write_u64::<BigEndian>(timestamp).unwrap();
    buffer.write_u64::<BigEndian>(tree_size).unwrap();
    buffer.extend_from_slice(root_hash);

    buffer
}

/// Signs checkpoints as [notes](https://c2sp.org/signed-note) carrying an
/// RFC 6962 `TreeHeadSignature`, formatted according to
/// <https://c2sp.org/static-ct-api#checkpoints>.
#[derive(Debug)]
pub struct CheckpointSigner {
    origin: String,
    id: u32,
    signing_key: EcdsaSigningKey,
}

impl CheckpointSigner {
    /// Returns a new `CheckpointSigner` with the given origin and signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not a valid signed-note key name or
    /// if the verifying key cannot be encoded.
    pub fn new(origin: &str, signing_key: EcdsaSigningKey) -> Result<Self, CtApiError> {
        let id = note_key_id(origin, signing_key.verifying_key())?;
        Ok(Self {
            origin: origin.to_string(),
            id,
            signing_key,
        })
    }

    /// Returns the origin this signer produces checkpoints for.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the note key ID of this signer.
    pub fn key_id(&self) -> u32 {
        self.id
    }

    /// Returns the verifying key matching this signer's signing key.
    pub fn verifying_key(&self) -> &EcdsaVerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs the checkpoint, returning a serialized note with a single
    /// signature line. The signature payload is:
    /// ```text
    /// struct {
    ///     uint64 timestamp;
    ///     TreeHeadSignature signature;
    /// } RFC6962NoteSignature;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint's declared origin does not match
    /// this signer's origin.
    ///
    /// # Panics
    ///
    /// Panics if writing to the internal buffer fails, which should never happen.
    pub fn sign(
        &self,
        timestamp: UnixTimestamp,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<u8>, CtApiError> {
        if checkpoint.origin() != self.origin {
            return Err(CtApiError::OriginMismatch);
        }

        let sth_bytes =
            serialize_sth_signature_input(timestamp, checkpoint.size(), checkpoint.hash());
        let tree_head_signature = sign(&self.signing_key, &sth_bytes);

        let mut sig = Vec::new();
        sig.write_u64::<BigEndian>(timestamp).unwrap();
        sig.extend_from_slice(&tree_head_signature);

        let mut signed = self.id.to_be_bytes().to_vec();
        signed.extend_from_slice(&sig);

        let mut note = checkpoint.to_bytes();
        note.extend_from_slice(b"\n");
        note.extend_from_slice(
            format!("— {} {}\n", self.origin, BASE64_STANDARD.encode(&signed)).as_bytes(),
        );

        Ok(note)
    }
}

/// Verifies checkpoint notes produced by a [`CheckpointSigner`]. Used by
/// tests and downstream monitors; the log itself only produces notes.
#[derive(Clone, Debug)]
pub struct CheckpointVerifier {
    origin: String,
    id: u32,
    verifying_key: EcdsaVerifyingKey,
}

impl CheckpointVerifier {
    /// Returns a new `CheckpointVerifier` with the given origin and verifying key.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not a valid signed-note key name or
    /// if the verifying key cannot be encoded.
    pub fn new(origin: &str, verifying_key: &EcdsaVerifyingKey) -> Result<Self, CtApiError> {
        let id = note_key_id(origin, verifying_key)?;
        Ok(Self {
            origin: origin.to_string(),
            id,
            verifying_key: *verifying_key,
        })
    }

    /// Returns the note key ID of this verifier.
    pub fn key_id(&self) -> u32 {
        self.id
    }

    /// Opens a serialized checkpoint note, verifying the signature line that
    /// matches this verifier, and returns the [`Checkpoint`] and the
    /// timestamp at which it was signed.
    ///
    /// # Errors
    ///
    /// Returns an error if the note is malformed, carries no signature from
    /// this verifier's key, fails signature verification, claims a timestamp
    /// in the future, declares a different origin, or carries an unexpected
    /// checkpoint extension.
    pub fn verify_note(
        &self,
        current_time: UnixTimestamp,
        note: &[u8],
    ) -> Result<(Checkpoint, UnixTimestamp), CtApiError> {
        let Ok(note) = std::str::from_utf8(note) else {
            return Err(CtApiError::Malformed);
        };
        let Some((text, sig_lines)) = note.split_once("\n\n") else {
            return Err(CtApiError::Malformed);
        };
        let text = format!("{text}\n");
        let Ok(checkpoint) = Checkpoint::from_bytes(text.as_bytes()) else {
            return Err(CtApiError::Malformed);
        };

        let prefix = format!("— {} ", self.origin);
        let mut rfc6962_sig = None;
        for line in sig_lines.lines() {
            let Some(b64) = line.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(raw) = BASE64_STANDARD.decode(b64) else {
                return Err(CtApiError::Malformed);
            };
            if raw.len() < 4 {
                return Err(CtApiError::Malformed);
            }
            if u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) == self.id {
                rfc6962_sig = Some(raw[4..].to_vec());
                break;
            }
        }
        let Some(sig) = rfc6962_sig else {
            return Err(CtApiError::MissingVerifierSignature);
        };

        let mut s = Cursor::new(sig.as_slice());
        let timestamp = s.read_u64::<BigEndian>()?;
        if s.read_u8()? != 4 {
            // hash = sha256
            return Err(CtApiError::Malformed);
        }
        if s.read_u8()? != 3 {
            // signature = ecdsa
            return Err(CtApiError::Malformed);
        }
        let signature = read_length_prefixed(&mut s, 2)?;
        if s.position() != sig.len() as u64 {
            return Err(CtApiError::Malformed);
        }

        let sth_bytes =
            serialize_sth_signature_input(timestamp, checkpoint.size(), checkpoint.hash());
        let signature = EcdsaSignature::from_der(&signature)?;
        self.verifying_key.verify(&sth_bytes, &signature)?;

        if current_time < timestamp {
            return Err(CtApiError::InvalidTimestamp);
        }
        if checkpoint.origin() != self.origin {
            return Err(CtApiError::OriginMismatch);
        }
        if !checkpoint.extension().is_empty() {
            return Err(CtApiError::UnexpectedExtension);
        }

        Ok((checkpoint, timestamp))
    }
}

/// Computes the note key ID for an RFC 6962 tree head signature key:
/// the signed-note key ID over the 0x05 algorithm byte followed by the
/// SHA-256 of the public key's SPKI encoding.
fn note_key_id(origin: &str, verifying_key: &EcdsaVerifyingKey) -> Result<u32, CtApiError> {
    if !is_key_name_valid(origin) {
        return Err(CtApiError::InvalidKeyName);
    }
    let pkix = verifying_key.to_public_key_der()?;
    let key_hash = Sha256::digest(&pkix);
    Ok(key_id(
        origin,
        &[0x05]
            .iter()
            .chain(key_hash.iter())
            .copied()
            .collect::<Vec<_>>(),
    ))
}
