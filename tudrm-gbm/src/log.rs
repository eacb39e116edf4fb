// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::config::{DEFAULT_LOG_FILTER, LOG_ENV};
use std::sync::Once;

fn init_once() {
    let env = env_logger::Env::new().filter_or(LOG_ENV, DEFAULT_LOG_FILTER);

    // the host may have installed its own logger
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

pub fn init() {
    static ONCE: Once = Once::new();
    ONCE.call_once(init_once);
}
