// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Allocation strategies.
//!
//! A device owns exactly one [`Backend`], selected when the device is built.

pub mod dumb;
#[cfg(feature = "vendor")]
pub mod vendor;

use super::formats;
use super::types::{Format, Modifier, Rect, Region, Result, Usage};
use std::ffi;
use std::os::fd::RawFd;

/// The parameters of a BO allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Description {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Canonical format.
    pub format: Format,
    /// Usage flags.
    pub usage: Usage,
}

impl Description {
    /// Creates a description.
    pub fn new(width: u32, height: u32, format: Format, usage: Usage) -> Self {
        Self {
            width,
            height,
            format: formats::canonicalize(format),
            usage,
        }
    }
}

/// The memory layout of an allocated BO, as reported by the backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    /// The device-local handle.
    pub handle: u64,
    /// The stride of plane 0.
    pub stride: u32,
    /// The dma-buf fd, if the allocation has one.
    pub dmabuf: Option<RawFd>,
}

pub(crate) enum HandlePayload {
    Dumb(dumb::Resource),
    #[cfg(feature = "vendor")]
    Vendor(vendor::Resource),
}

/// An opaque backend allocation.
pub struct Handle {
    pub(crate) payload: HandlePayload,
}

impl Handle {
    pub(crate) fn new(payload: HandlePayload) -> Self {
        Self { payload }
    }
}

/// An allocation strategy.
///
/// The capability queries default to the static format allow-list.
pub trait Backend {
    /// Returns a short name for logging.
    fn name(&self) -> &'static str;

    /// Returns true if the format can be allocated with the usage.
    fn is_format_supported(&self, fmt: Format, _usage: Usage) -> Result<bool> {
        Ok(formats::is_supported(fmt))
    }

    /// Returns the memory plane count of a format and a modifier.
    fn memory_plane_count(&self, fmt: Format, modifier: Modifier) -> Result<u32> {
        formats::memory_plane_count(fmt, modifier)
    }

    /// Allocates a BO.  `modifiers` is the caller's modifier list and may be empty.
    fn allocate(&self, desc: &Description, modifiers: &[Modifier]) -> Result<Handle>;

    /// Frees a BO, including any mapping it still holds.
    fn free(&self, handle: &mut Handle);

    /// Returns the layout of a BO.
    fn layout(&self, handle: &Handle) -> Layout;

    /// Maps a region of a BO.  The region has been validated against the BO extent.
    fn map(&self, handle: &mut Handle, rect: Rect) -> Result<Region>;

    /// Unmaps a region returned by `map`.
    fn unmap(&self, handle: &mut Handle, data: *mut ffi::c_void);

    /// Writes `data` to the start of a BO.
    fn write(&self, handle: &mut Handle, data: &[u8]) -> Result<()>;

    /// Returns the memory plane count of a BO.
    fn plane_count(&self, _handle: &Handle) -> Result<u32> {
        Ok(1)
    }

    /// Returns the device-local handle of a plane.
    fn plane_handle(&self, handle: &Handle, plane: u32) -> Result<u64>;

    /// Returns the offset of a plane.
    fn plane_offset(&self, handle: &Handle, plane: u32) -> Result<u32>;
}
