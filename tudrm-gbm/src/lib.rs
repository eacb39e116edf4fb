// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

#![warn(missing_docs)]

//! A GBM backend for Tegra unified DRM devices.
//!
//! The library is meant to be installed as `tegra-udrm_gbm.so` in the GBM backend directory.
//! Its only entry point is `gbmint_get_backend`.

pub mod capi;
mod config;
mod log;
