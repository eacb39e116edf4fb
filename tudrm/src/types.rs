// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Simple types.
//!
//! This module defines simple TUDRM-specific types.

use super::formats;
use std::collections::TryReserveError;
use std::{ffi, fmt, io, num, ptr, result};

/// The GBM backend ABI version this library implements.
///
/// The host must request exactly this version.  There is no backward compatibility.
pub const ABI_VERSION: u32 = 1;

/// The error type for TUDRM operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A generic error with a descriptive message to provide the context.
    #[error("{0}")]
    Context(&'static str),
    /// A validation error indicating a bad user input.
    #[error("bad user input")]
    User,
    /// Indicates an unsupported operation.
    #[error("unsupported")]
    Unsupported,
    /// A runtime device error that may or may no be persistent.
    #[error("device error")]
    Device,
    #[error("{0}")]
    /// A generic IO error.
    Io(#[from] io::Error),
    /// The host requested an ABI version we do not implement.
    #[error("abi version {requested} requested, {expected} implemented")]
    AbiVersion {
        /// The version requested by the host.
        requested: u32,
        /// The version this library implements.
        expected: u32,
    },
    /// Memory for a bookkeeping allocation is unavailable.
    #[error("out of memory")]
    OutOfMemory,
    /// The vendor library failed to load.
    #[cfg(feature = "vendor")]
    #[error("{0}")]
    Library(#[from] libloading::Error),
    /// A validation error indicating a bad integer.
    #[error("bad integer conversion")]
    IntegerConversion,
}

impl Error {
    pub(crate) fn ctx<T>(s: &'static str) -> Result<T> {
        Err(Error::Context(s))
    }

    pub(crate) fn user<T>() -> Result<T> {
        Err(Error::User)
    }

    pub(crate) fn unsupported<T>() -> Result<T> {
        Err(Error::Unsupported)
    }

    pub(crate) fn device<T>() -> Result<T> {
        Err(Error::Device)
    }
}

impl From<num::TryFromIntError> for Error {
    fn from(_err: num::TryFromIntError) -> Self {
        Self::IntegerConversion
    }
}

impl From<TryReserveError> for Error {
    fn from(_err: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Self::from(io::Error::from(err))
    }
}

/// A specialized `Result` type for TUDRM operations.
pub type Result<T> = result::Result<T, Error>;

/// The type for the BO size.
pub type Size = u64;

/// A 32-bit DRM format.
///
/// Legacy GBM BO formats are also representable.  See [`crate::canonicalize`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Format(pub u32);

impl<T> From<T> for Format
where
    T: Into<u32>,
{
    fn from(val: T) -> Self {
        Self(val.into())
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = formats::name(*self) {
            write!(f, "{}", name)
        } else {
            write!(f, "{}", formats::fourcc(*self))
        }
    }
}

/// A 64-bit DRM format modifier.
///
/// This is layout-compatible with `u64` so that a modifier list can be handed to C as is.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Modifier(pub u64);

impl Modifier {
    /// Returns true if this is `DRM_FORMAT_MOD_INVALID`.
    pub fn is_invalid(&self) -> bool {
        *self == formats::MOD_INVALID
    }

    /// Returns true if this is `DRM_FORMAT_MOD_LINEAR`.
    pub fn is_linear(&self) -> bool {
        *self == formats::MOD_LINEAR
    }
}

impl Default for Modifier {
    fn default() -> Self {
        formats::MOD_INVALID
    }
}

impl<T> From<T> for Modifier
where
    T: Into<u64>,
{
    fn from(val: T) -> Self {
        Self(val.into())
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

bitflags::bitflags! {
    /// GBM BO usage flags.
    ///
    /// The bit values follow `enum gbm_bo_flags`.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct Usage: u32 {
        /// The buffer will be presented by the display engine.
        const SCANOUT = 1 << 0;
        /// The buffer will be used as a cursor.
        const CURSOR = 1 << 1;
        /// The buffer will be rendered to.
        const RENDERING = 1 << 2;
        /// The buffer will be written by the CPU.
        const WRITE = 1 << 3;
        /// The buffer must have a linear layout.
        const LINEAR = 1 << 4;
        /// The buffer is protected.
        const PROTECTED = 1 << 5;
        /// The buffer will be used for front-buffer rendering.
        const FRONT_RENDERING = 1 << 6;
    }
}

/// A memory mapping.
#[derive(Clone, Copy, Debug)]
pub struct Mapping {
    /// Pointer of a mapping.
    pub ptr: ptr::NonNull<ffi::c_void>,
    /// Size of a mapping.
    pub len: num::NonZeroUsize,
}

impl Mapping {
    /// Returns true if `ptr` points into the mapping.
    pub fn contains(&self, ptr: *const ffi::c_void) -> bool {
        let base = self.ptr.as_ptr() as usize;
        let addr = ptr as usize;

        addr >= base && addr - base < self.len.get()
    }
}

/// A mapped region of a BO.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    /// Pointer to the first pixel of the region.
    pub ptr: ptr::NonNull<ffi::c_void>,
    /// Stride of the mapping in bytes.
    pub stride: u32,
    /// Opaque data that must be passed back to unmap.
    pub data: *mut ffi::c_void,
}

/// A rectangle in pixels.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Creates a rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub(crate) fn fits(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);

        right.is_some_and(|r| r <= width) && bottom.is_some_and(|b| b <= height)
    }
}
