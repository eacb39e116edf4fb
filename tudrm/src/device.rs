// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Device-related types.
//!
//! This module defines `Device` and `Builder`

use super::backends::dumb::{self, Card, DrmCard};
#[cfg(feature = "vendor")]
use super::backends::vendor;
use super::backends::Backend;
use super::types::{Error, Format, Modifier, Result, Usage, ABI_VERSION};
use log::{debug, info};
use std::ffi;
use std::os::fd::RawFd;
use std::rc::Rc;

/// A device.
///
/// A device wraps a borrowed DRM fd and the allocation strategy selected for it.  BOs and
/// surfaces hold a reference to their device, so a device always outlives them.
pub struct Device {
    node_fd: Option<RawFd>,
    card: Rc<dyn Card>,
    backend: Box<dyn Backend>,
}

impl Device {
    /// Returns the backend name reported to the host.
    pub fn name(&self) -> &'static str {
        "tegra-udrm"
    }

    /// Returns the borrowed device fd, if the device was built from one.
    pub fn node_fd(&self) -> Option<RawFd> {
        self.node_fd
    }

    /// Returns the name of the selected allocation strategy.
    pub fn strategy(&self) -> &'static str {
        self.backend.name()
    }

    /// Returns true if a format can be allocated with the usage.
    pub fn is_format_supported(&self, fmt: Format, usage: Usage) -> Result<bool> {
        self.backend.is_format_supported(fmt, usage)
    }

    /// Returns the memory plane count of a format and a modifier.
    ///
    /// Without multi-planar modifier support this is always 1 for supported formats.
    pub fn memory_plane_count(&self, fmt: Format, modifier: Modifier) -> Result<u32> {
        self.backend.memory_plane_count(fmt, modifier)
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn card(&self) -> &dyn Card {
        self.card.as_ref()
    }
}

/// A device builder.
///
/// The sole purpose of a builder is to build a `Device`.
#[derive(Default)]
pub struct Builder {
    node_fd: Option<RawFd>,
    card: Option<Rc<dyn Card>>,
    abi_version: Option<u32>,
    vendor_library: Option<ffi::OsString>,
}

impl Builder {
    /// Creates a device builder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the borrowed DRM device fd.
    ///
    /// The fd must stay open until the device and everything created from it are dropped.
    pub fn node_fd(mut self, node_fd: RawFd) -> Self {
        self.node_fd = Some(node_fd);
        self
    }

    /// Sets the kernel interface explicitly instead of deriving one from the fd.
    pub fn card(mut self, card: Rc<dyn Card>) -> Self {
        self.card = Some(card);
        self
    }

    /// Sets the ABI version requested by the host.  It defaults to [`ABI_VERSION`].
    pub fn abi_version(mut self, abi_version: u32) -> Self {
        self.abi_version = Some(abi_version);
        self
    }

    /// Sets the vendor library to try before falling back to dumb buffers.
    pub fn vendor_library(mut self, library: impl Into<ffi::OsString>) -> Self {
        self.vendor_library = Some(library.into());
        self
    }

    #[cfg(feature = "vendor")]
    fn build_vendor(&self) -> Option<Box<dyn Backend>> {
        let library = self.vendor_library.as_ref()?;
        let node_fd = self.node_fd?;

        match vendor::Builder::new()
            .library(library)
            .node_fd(node_fd)
            .build()
        {
            Ok(backend) => {
                let backend: Box<dyn Backend> = Box::new(backend);
                Some(backend)
            }
            Err(err) => {
                info!("vendor library {library:?} is unusable ({err}); using dumb buffers");
                None
            }
        }
    }

    #[cfg(not(feature = "vendor"))]
    fn build_vendor(&self) -> Option<Box<dyn Backend>> {
        if let Some(library) = &self.vendor_library {
            debug!("vendor support is disabled; ignoring {library:?}");
        }

        None
    }

    /// Builds a `Device`.
    pub fn build(self) -> Result<Rc<Device>> {
        let requested = self.abi_version.unwrap_or(ABI_VERSION);
        if requested != ABI_VERSION {
            return Err(Error::AbiVersion {
                requested,
                expected: ABI_VERSION,
            });
        }

        let card: Rc<dyn Card> = match (&self.card, self.node_fd) {
            (Some(card), _) => card.clone(),
            (None, Some(node_fd)) => Rc::new(DrmCard::new(node_fd)),
            (None, None) => return Error::user(),
        };

        if let Some(driver) = card.driver_name() {
            debug!("device driver is {driver}");
        }

        let backend: Box<dyn Backend> = match self.build_vendor() {
            Some(backend) => backend,
            None => Box::new(dumb::Backend::new(card.clone())),
        };
        info!("using the {} allocation strategy", backend.name());

        let dev = Device {
            node_fd: self.node_fd,
            card,
            backend,
        };

        Ok(Rc::new(dev))
    }
}
