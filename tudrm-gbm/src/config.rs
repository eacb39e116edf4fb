// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use std::env;
use std::ffi::OsString;

/// The log filter, in `env_logger` syntax.
pub const LOG_ENV: &str = "TUDRM_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// The vendor allocator library.  An empty value disables the vendor strategy.
pub const VENDOR_LIBRARY_ENV: &str = "TUDRM_VENDOR_LIBRARY";
pub const DEFAULT_VENDOR_LIBRARY: &str = "libnvgbm.so";

pub struct Config {
    pub vendor_library: Option<OsString>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::with_vendor_library(env::var_os(VENDOR_LIBRARY_ENV))
    }

    fn with_vendor_library(var: Option<OsString>) -> Self {
        let vendor_library = match var {
            None => Some(OsString::from(DEFAULT_VENDOR_LIBRARY)),
            Some(var) if var.is_empty() => None,
            Some(var) => Some(var),
        };

        Self { vendor_library }
    }
}
