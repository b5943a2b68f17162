// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

pub mod config;
pub mod ctlog;
pub mod handlers;
mod metrics;

pub use config::*;
pub use ctlog::*;
pub use handlers::*;
