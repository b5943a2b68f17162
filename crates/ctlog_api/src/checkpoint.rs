// Ported from "mod" (https://pkg.go.dev/golang.org/x/mod)
// Copyright 2009 The Go Authors
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause
//
// Ported from "sunlight" (https://github.com/FiloSottile/sunlight)
// Copyright 2023 The Sunlight Authors
// Licensed under ISC License found in the LICENSE file or at https://opensource.org/license/isc-license-txt
//
// This ports code from the original Go projects "mod" and "sunlight" and adapts it to Rust idioms.
//
// Modifications and Rust implementation Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! A Checkpoint is a tree head to be formatted according to the [C2SP tlog-checkpoint](https://c2sp.org/tlog-checkpoint) specification.
//!
//! A checkpoint looks like this:
//! ```text
//! example.com/origin
//! 923748
//! nND/nri//U0xuHUrYSy0HtMeal2vzD9V4k/BO79C+QeI=
//! ```
//!
//! It can be followed by extra extension lines.
//!
//! This file contains code ported from the original projects [tlog](https://pkg.go.dev/golang.org/x/mod/sumdb/tlog) and [sunlight](https://github.com/FiloSottile/sunlight).
//!
//! References:
//! - [note.go](https://cs.opensource.google/go/x/mod/+/refs/tags/v0.21.0:sumdb/tlog/note.go)
//! - [note_test.go](https://cs.opensource.google/go/x/mod/+/refs/tags/v0.21.0:sumdb/tlog/note_test.go)
//! - [checkpoint.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/checkpoint.go)

use base64::prelude::*;
use sha2::{Digest, Sha256};
use std::{
    fmt,
    io::{BufRead, Read},
};

/// This works like `BufRead::lines`, except it reports a final newline as a
/// length-0 line
struct StrictLines<'a, R: BufRead> {
    buf: &'a mut R,
    return_final_empty_line: bool,
}

impl<'a, R: BufRead> StrictLines<'a, R> {
    const END_NEWLINE: &'static str = "\n";

    fn new(buf: &'a mut R) -> Self {
        Self {
            buf,
            return_final_empty_line: false,
        }
    }
}

impl<R: BufRead> Iterator for StrictLines<'_, R> {
    type Item = Result<String, std::io::Error>;

    fn next(&mut self) -> Option<Result<String, std::io::Error>> {
        let mut s = String::new();
        let bytes_read = match self.buf.read_line(&mut s) {
            Ok(bytes_read) => bytes_read,
            Err(e) => return Some(Err(e)),
        };

        // The buf is at an EOF
        if bytes_read == 0 {
            // If we set the flag, return a final empty line, and unset the flag
            if self.return_final_empty_line {
                self.return_final_empty_line = false;
                Some(Ok(Self::END_NEWLINE.to_string()))
            } else {
                // We're done
                None
            }
        } else {
            // There's two ways the buf ends. Either it's NEWLINE+EOF, or EOF.
            // If it's NEWLINE+EOF, we will report that as a separate line.
            // That new line can be interpreted by caller functions.
            let ended = self.buf.fill_buf().unwrap().is_empty();
            let ends_with_newline = s.ends_with('\n');
            let ends_with_newline_eof = ended && ends_with_newline;

            // Remove the extra newline if there is one
            if ends_with_newline {
                s.pop();
            }

            // If we ended with NEWLINE+EOF, make sure the last output we have
            // is an empty string
            if ends_with_newline_eof {
                self.return_final_empty_line = true;
            }

            Some(Ok(s))
        }
    }
}

/// A Checkpoint is a tree head to be formatted according to c2sp.org/checkpoint.
#[derive(PartialEq, Debug)]
pub struct Checkpoint {
    origin: String,
    size: u64,
    hash: [u8; 32],
    /// Extension is empty or a sequence of non-empty lines,
    /// each terminated by a newline character.
    extension: String,
}

/// Maximum checkpoint size we're willing to parse.
const MAX_CHECKPOINT_SIZE: usize = 1_000_000;

/// An error that can occur when parsing a checkpoint.
#[derive(Debug)]
pub struct MalformedCheckpointError;

impl fmt::Display for MalformedCheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed checkpoint")
    }
}

impl std::error::Error for MalformedCheckpointError {}

impl Checkpoint {
    /// Return the checkpoint's origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Return the size of the checkpoint's tree.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Return the root hash of the checkpoint's tree.
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Return the checkpoint's extensions.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Return a new checkpoint with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedCheckpointError`] if the arguments do not comply with
    /// the [C2SP tlog-checkpoint](https://c2sp.org/tlog-checkpoint) specification.
    pub fn new(
        origin: &str,
        size: u64,
        hash: [u8; 32],
        extension: &str,
    ) -> Result<Self, MalformedCheckpointError> {
        if origin.is_empty() {
            return Err(MalformedCheckpointError);
        }

        let mut rest = extension;
        while !rest.is_empty() {
            if let Some((before, after)) = rest.split_once('\n') {
                if before.is_empty() {
                    return Err(MalformedCheckpointError);
                }
                rest = after;
            } else {
                return Err(MalformedCheckpointError);
            }
        }

        Ok(Self {
            origin: origin.to_string(),
            size,
            hash,
            extension: extension.to_string(),
        })
    }

    /// Parse a checkpoint from encoded bytes, which must exactly match the
    /// serialized form: no leading or trailing data, a canonical decimal
    /// tree size, and non-empty newline-terminated extension lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is malformed.
    pub fn from_bytes(text: &[u8]) -> Result<Self, MalformedCheckpointError> {
        let mut reader = std::io::Cursor::new(text).take(MAX_CHECKPOINT_SIZE as u64);
        let mut lines = StrictLines::new(&mut reader);

        let Some(Ok(origin)) = lines.next() else {
            return Err(MalformedCheckpointError);
        };
        let Some(Ok(n_str)) = lines.next() else {
            return Err(MalformedCheckpointError);
        };
        let Some(Ok(h_str)) = lines.next() else {
            return Err(MalformedCheckpointError);
        };

        let mut extensions = vec![];
        let mut next_line = lines.next();
        while let Some(Ok(ref line)) = next_line {
            if line.is_empty() || line == "\n" {
                break;
            };
            extensions.push(line.clone());

            next_line = lines.next();
        }
        // The last line must be the final newline, nothing else.
        match next_line {
            Some(Ok(ref line)) if line == "\n" => {}
            _ => return Err(MalformedCheckpointError),
        }
        let extension = if extensions.is_empty() {
            String::new()
        } else {
            extensions.join("\n") + "\n"
        };

        let Ok(n) = n_str.parse::<u64>() else {
            return Err(MalformedCheckpointError);
        };
        if n_str != n.to_string() {
            return Err(MalformedCheckpointError);
        }

        let Ok(h_bytes) = BASE64_STANDARD.decode(&h_str) else {
            return Err(MalformedCheckpointError);
        };
        let Ok(hash) = <[u8; 32]>::try_from(h_bytes) else {
            return Err(MalformedCheckpointError);
        };

        Self::new(&origin, n, hash, &extension)
    }

    /// Returns an encoded checkpoint.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}",
            self.origin,
            self.size,
            BASE64_STANDARD.encode(self.hash),
            self.extension
        )
        .into()
    }
}

/// Computes the key ID for the given server name and encoded public key
/// as RECOMMENDED at <https://c2sp.org/signed-note#signatures>.
pub fn key_id(name: &str, key: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(key);
    let result = hasher.finalize();
    let mut u32_bytes = [0u8; 4];
    u32_bytes.copy_from_slice(&result[0..4]);

    u32::from_be_bytes(u32_bytes)
}

// Reports whether name is valid according to <https://c2sp.org/signed-note#format>.
// It must be non-empty and not have any Unicode spaces or pluses.
pub fn is_key_name_valid(name: &str) -> bool {
    !(name.is_empty() || name.chars().any(char::is_whitespace) || name.contains('+'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hash() -> [u8; 32] {
        BASE64_STANDARD
            .decode("TszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=")
            .unwrap()
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_parse_checkpoint() {
        let c = Checkpoint::new("example.com/origin", 123, test_hash(), "abc\ndef\n").unwrap();
        let c2 = Checkpoint::from_bytes(&c.to_bytes()).unwrap();
        assert_eq!(c, c2);
        assert_eq!(c.to_bytes(), c2.to_bytes());
        assert_eq!(
            c.to_bytes(),
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n"
        );

        // Check valid checkpoints.
        let good_checkpoints: Vec<&[u8]> = vec![
            // valid with extension
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n",
            // valid without extension
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\n",
            // valid short origin
            b"e\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n",
        ];

        for text in &good_checkpoints {
            let c = Checkpoint::from_bytes(text);
            assert!(c.is_ok());
            assert_eq!(c.unwrap().to_bytes(), *text);
        }

        // Check invalid checkpoints.
        let bad_checkpoints: Vec<&[u8]> = vec![
            // empty origin
            b"\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n",
            // invalid tree size
            b"example.com/origin\n0xabcdef\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n",
            // non-canonical tree size
            b"example.com/origin\n0123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n",
            // too big tree size
            b"example.com/origin\n18446744073709551616\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n",
            // invalid base64 hash
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0\nabc\ndef\n",
            // too big base64 hash
            b"example.com/origin\n123\nQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBCg==\nabc\ndef\n",
            // empty extension line
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\n\n",
            // non-newline-terminated extension line
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef",
            // trailing data after the checkpoint
            b"example.com/origin\n123\nTszzRgjTG6xce+z2AG31kAXYKBgQVtCSCE40HmuwBb0=\nabc\ndef\n\nHello world",
            // truncated
            b"example.com/origin\n123\n",
        ];
        for (i, text) in bad_checkpoints.iter().enumerate() {
            assert!(
                Checkpoint::from_bytes(text).is_err(),
                "expected error at index {i}: {text:?}"
            );
        }
    }

    #[test]
    fn test_new_validates_extension() {
        assert!(Checkpoint::new("example.com", 1, test_hash(), "").is_ok());
        assert!(Checkpoint::new("example.com", 1, test_hash(), "abc\n").is_ok());
        // missing trailing newline
        assert!(Checkpoint::new("example.com", 1, test_hash(), "abc").is_err());
        // empty extension line
        assert!(Checkpoint::new("example.com", 1, test_hash(), "\n").is_err());
        // empty origin
        assert!(Checkpoint::new("", 1, test_hash(), "").is_err());
    }

    #[test]
    fn test_key_id() {
        assert_eq!(key_id("example.com/log1", b"somekey"), 1_642_602_800);
        assert_eq!(key_id("other", b"somekey"), 2_295_240_295);
    }

    #[test]
    fn test_is_key_name_valid() {
        assert!(is_key_name_valid("example.com/log"));
        assert!(is_key_name_valid("e"));
        assert!(!is_key_name_valid(""));
        assert!(!is_key_name_valid("has space"));
        assert!(!is_key_name_valid("has+plus"));
        assert!(!is_key_name_valid("tab\there"));
    }
}
