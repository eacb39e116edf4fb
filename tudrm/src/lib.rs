// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

#![warn(missing_docs)]

//! TUDRM is a GBM buffer allocator for Tegra unified DRM devices.
//!
//! This crate provides a library to create, import, map, and destroy buffer objects (BOs) and
//! surfaces on a DRM device.
//!
//! A device selects one allocation strategy when it is built.  The dumb strategy allocates
//! CPU-writable linear buffers from the kernel.  The vendor strategy forwards allocations to a
//! dynamically loaded vendor GBM library.  Independent of the strategy, dma-bufs are imported
//! through PRIME handle translation on the device fd.

mod backends;
mod bo;
mod device;
mod formats;
mod surface;
#[cfg(test)]
mod testing;
mod types;
mod utils;

pub use backends::*;
pub use bo::*;
pub use device::*;
pub use formats::{
    canonicalize, filter_modifiers, is_importable, ACCEPTED_MODIFIER_MASK, ARGB8888, ABGR8888,
    BO_FORMAT_ARGB8888, BO_FORMAT_XRGB8888, MOD_INVALID, MOD_LINEAR, XBGR8888, XRGB8888,
};
pub use surface::*;
pub use types::*;
