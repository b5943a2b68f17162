//! This file contains code ported from the original project [sunlight](https://github.com/FiloSottile/sunlight) ([ISC license](https://github.com/FiloSottile/sunlight/blob/main/LICENSE)).
//! See the LICENSE file in the root of this repository for the full license text.
//!
//! References:
//! - [extensions.go](https://github.com/FiloSottile/sunlight/blob/36be227ff4599ac11afe3cec37a5febcd61da16a/extensions.go)

#![no_main]

use ctlog_api::entry::Extensions;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Extensions::from_bytes(data);
});
