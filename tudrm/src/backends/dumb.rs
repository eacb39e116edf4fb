// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::{Description, Handle, HandlePayload, Layout};
use crate::formats;
use crate::types::{Error, Mapping, Modifier, Rect, Region, Result, Size, Usage};
use crate::utils;
use drm::control::Device as DrmControlDevice;
use drm::Device as DrmDevice;
use drm_ffi::mode::dumbbuffer;
use log::{debug, warn};
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::rc::Rc;
use std::{ffi, ptr};

/// A kernel dumb buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DumbBuffer {
    /// The GEM handle.
    pub handle: u32,
    /// The pitch in bytes.
    pub pitch: u32,
    /// The total size in bytes.
    pub size: Size,
}

/// The kernel operations a device needs.
///
/// Failures are reported as errors and never retried.
pub trait Card {
    /// Creates a linear dumb buffer.
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer>;

    /// Maps a dumb buffer for CPU access.
    fn map_dumb(&self, buf: &DumbBuffer) -> Result<Mapping>;

    /// Unmaps a mapping returned by `map_dumb`.
    fn unmap_dumb(&self, mapping: Mapping);

    /// Destroys a dumb buffer.
    fn destroy_dumb(&self, handle: u32) -> Result<()>;

    /// Translates a dma-buf to a device-local handle.
    fn prime_fd_to_handle(&self, dmabuf: BorrowedFd) -> Result<u32>;

    /// Returns the kernel driver name, if any.
    fn driver_name(&self) -> Option<String> {
        None
    }
}

/// A DRM device node.
///
/// The fd is borrowed.  It is owned and eventually closed by the caller.
pub struct DrmCard {
    fd: RawFd,
}

impl DrmCard {
    /// Wraps a borrowed DRM fd.
    ///
    /// The fd must stay open for as long as the card is alive.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd {
        // SAFETY: the caller keeps fd open for the lifetime of the card
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }
}
impl DrmDevice for DrmCard {}
impl DrmControlDevice for DrmCard {}

impl Card for DrmCard {
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer> {
        let info = dumbbuffer::create(self.as_fd(), width, height, bpp, 0)?;

        Ok(DumbBuffer {
            handle: info.handle,
            pitch: info.pitch,
            size: info.size,
        })
    }

    fn map_dumb(&self, buf: &DumbBuffer) -> Result<Mapping> {
        let info = dumbbuffer::map(self.as_fd(), buf.handle, 0, 0)?;
        utils::mmap(self, buf.size, info.offset)
    }

    fn unmap_dumb(&self, mapping: Mapping) {
        if let Err(err) = utils::munmap(mapping) {
            warn!("failed to unmap dumb buffer: {err}");
        }
    }

    fn destroy_dumb(&self, handle: u32) -> Result<()> {
        dumbbuffer::destroy(self.as_fd(), handle)?;

        Ok(())
    }

    fn prime_fd_to_handle(&self, dmabuf: BorrowedFd) -> Result<u32> {
        let handle = self.prime_fd_to_buffer(dmabuf)?;

        Ok(u32::from(handle))
    }

    fn driver_name(&self) -> Option<String> {
        self.get_driver()
            .ok()
            .map(|drv| drv.name().to_string_lossy().into_owned())
    }
}

/// The allocation behind a dumb BO handle.
pub struct Resource {
    buf: DumbBuffer,
    mapping: Option<Mapping>,
}

impl From<Resource> for Handle {
    fn from(res: Resource) -> Self {
        Handle::new(HandlePayload::Dumb(res))
    }
}

impl AsRef<Resource> for Handle {
    fn as_ref(&self) -> &Resource {
        match self.payload {
            HandlePayload::Dumb(ref res) => res,
            #[cfg(feature = "vendor")]
            _ => unreachable!(),
        }
    }
}

impl AsMut<Resource> for Handle {
    fn as_mut(&mut self) -> &mut Resource {
        match self.payload {
            HandlePayload::Dumb(ref mut res) => res,
            #[cfg(feature = "vendor")]
            _ => unreachable!(),
        }
    }
}

/// The kernel dumb buffer strategy.
///
/// Only CPU-writable BOs can be allocated.  They are linear, single-planar, and mapped for
/// their whole lifetime.
pub struct Backend {
    card: Rc<dyn Card>,
}

impl Backend {
    /// Creates the strategy on top of a card.
    pub fn new(card: Rc<dyn Card>) -> Self {
        Self { card }
    }
}

impl super::Backend for Backend {
    fn name(&self) -> &'static str {
        "dumb"
    }

    fn allocate(&self, desc: &Description, modifiers: &[Modifier]) -> Result<Handle> {
        if !desc.usage.contains(Usage::WRITE) {
            debug!("dumb buffers require write usage, got {:?}", desc.usage);
            return Error::unsupported();
        }

        if modifiers.len() > 1 {
            debug!("only the first of {} modifiers is honored", modifiers.len());
        }

        let buf = self
            .card
            .create_dumb(desc.width, desc.height, formats::DUMB_BPP)?;
        debug!(
            "created dumb buffer {} ({}x{} {}, pitch {}, size {})",
            buf.handle, desc.width, desc.height, desc.format, buf.pitch, buf.size
        );

        let mapping = match self.card.map_dumb(&buf) {
            Ok(mapping) => Some(mapping),
            Err(err) => {
                warn!("failed to map dumb buffer {}: {err}", buf.handle);
                None
            }
        };

        let res = Resource { buf, mapping };

        Ok(Handle::from(res))
    }

    fn free(&self, handle: &mut Handle) {
        let res: &mut Resource = handle.as_mut();

        if let Some(mapping) = res.mapping.take() {
            self.card.unmap_dumb(mapping);
        }

        if let Err(err) = self.card.destroy_dumb(res.buf.handle) {
            warn!("failed to destroy dumb buffer {}: {err}", res.buf.handle);
        }
    }

    fn layout(&self, handle: &Handle) -> Layout {
        let res: &Resource = handle.as_ref();

        Layout {
            handle: res.buf.handle as u64,
            stride: res.buf.pitch,
            dmabuf: None,
        }
    }

    fn map(&self, handle: &mut Handle, rect: Rect) -> Result<Region> {
        let res: &mut Resource = handle.as_mut();
        let mapping = match res.mapping {
            Some(mapping) => mapping,
            None => return Error::ctx("dumb buffer is not mapped"),
        };

        let cpp = (formats::DUMB_BPP / 8) as usize;
        let offset = res.buf.pitch as usize * rect.y as usize + cpp * rect.x as usize;
        if offset >= mapping.len.get() {
            return Error::user();
        }

        // SAFETY: offset is within the mapping
        let ptr = unsafe { mapping.ptr.as_ptr().cast::<u8>().add(offset) };
        let ptr = match ptr::NonNull::new(ptr.cast::<ffi::c_void>()) {
            Some(ptr) => ptr,
            None => return Error::device(),
        };

        Ok(Region {
            ptr,
            stride: res.buf.pitch,
            data: ptr.as_ptr(),
        })
    }

    fn unmap(&self, handle: &mut Handle, data: *mut ffi::c_void) {
        let res: &Resource = handle.as_ref();

        // the mapping lives until the BO is freed
        if let Some(mapping) = res.mapping {
            assert!(
                mapping.contains(data),
                "unmapping {data:?} outside of dumb buffer {}",
                res.buf.handle
            );
        }
    }

    fn write(&self, handle: &mut Handle, data: &[u8]) -> Result<()> {
        let res: &mut Resource = handle.as_mut();
        let mapping = match res.mapping {
            Some(mapping) => mapping,
            None => return Error::ctx("dumb buffer is not mapped"),
        };

        if data.len() > mapping.len.get() {
            return Error::user();
        }

        let dst = mapping.ptr.as_ptr().cast::<u8>();
        // SAFETY: dst is valid for mapping.len bytes and data is no longer than that
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };

        Ok(())
    }

    fn plane_handle(&self, handle: &Handle, plane: u32) -> Result<u64> {
        if plane != 0 {
            return Error::user();
        }

        let res: &Resource = handle.as_ref();

        Ok(res.buf.handle as u64)
    }

    fn plane_offset(&self, _handle: &Handle, plane: u32) -> Result<u32> {
        if plane != 0 {
            return Error::user();
        }

        Ok(0)
    }
}
