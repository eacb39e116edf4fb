// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::backends::{Description, Handle};
use super::device::Device;
use super::formats::{self, MOD_LINEAR};
use super::types::{Error, Format, Modifier, Rect, Region, Result, Usage};
use log::{debug, warn};
use std::ffi;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::rc::Rc;

/// One plane of a dma-buf import.
#[derive(Clone, Copy, Debug)]
pub struct ImportPlane<'a> {
    /// The dma-buf.  It stays owned by the caller.
    pub fd: BorrowedFd<'a>,
    /// The stride in bytes.
    pub stride: u32,
    /// The offset in bytes.
    pub offset: u32,
}

/// A dma-buf import request.
///
/// Only the first plane is consulted.  Multi-planar imports are not supported and extra planes
/// are ignored with a warning.
#[derive(Clone, Copy, Debug)]
pub struct Import<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Format, legacy or fourcc.
    pub format: Format,
    /// The explicit modifier, if any.
    pub modifier: Option<Modifier>,
    /// The planes.
    pub planes: &'a [ImportPlane<'a>],
}

enum Storage {
    Allocated(Handle),
    // the GEM handle is not closed on drop because importing the same dma-buf again returns
    // the same handle
    Imported { dmabuf: RawFd },
}

/// A buffer object.
///
/// A BO is either allocated by the device strategy or imported from a dma-buf.  The choice is
/// made at creation and never changes.
pub struct Bo {
    device: Rc<Device>,
    width: u32,
    height: u32,
    format: Format,
    stride: u32,
    handle: u64,
    modifier: Modifier,
    storage: Storage,
}

impl Bo {
    /// Allocates a BO.
    ///
    /// The first modifier of `modifiers`, or `DRM_FORMAT_MOD_LINEAR` when there is none, is
    /// recorded as the BO modifier.
    pub fn new(
        device: Rc<Device>,
        width: u32,
        height: u32,
        format: Format,
        usage: Usage,
        modifiers: &[Modifier],
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Error::user();
        }

        let desc = Description::new(width, height, format, usage);
        let handle = device.backend().allocate(&desc, modifiers)?;
        let layout = device.backend().layout(&handle);

        let bo = Self {
            width,
            height,
            format: desc.format,
            stride: layout.stride,
            handle: layout.handle,
            modifier: modifiers.first().copied().unwrap_or(MOD_LINEAR),
            storage: Storage::Allocated(handle),
            device,
        };

        Ok(bo)
    }

    /// Imports a dma-buf by translating it to a device-local handle.
    ///
    /// The import does not take ownership of the dma-buf.
    pub fn import(device: Rc<Device>, import: &Import, usage: Usage) -> Result<Self> {
        let plane = match import.planes.first() {
            Some(plane) => plane,
            None => return Error::user(),
        };
        if import.planes.len() > 1 {
            warn!(
                "importing only plane 0 of {} planes",
                import.planes.len()
            );
        }

        let handle = device.card().prime_fd_to_handle(plane.fd)?;
        let format = formats::canonicalize(import.format);
        debug!(
            "imported dma-buf {} as handle {handle} ({}x{} {}, usage {:?})",
            plane.fd.as_raw_fd(),
            import.width,
            import.height,
            format,
            usage
        );

        let bo = Self {
            device,
            width: import.width,
            height: import.height,
            format,
            stride: plane.stride,
            handle: handle as u64,
            modifier: import.modifier.unwrap_or(MOD_LINEAR),
            storage: Storage::Imported {
                dmabuf: plane.fd.as_raw_fd(),
            },
        };

        Ok(bo)
    }

    /// Returns the device the BO belongs to.
    pub fn device(&self) -> &Rc<Device> {
        &self.device
    }

    /// Returns the width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the canonical format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns the stride of plane 0.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Returns the device-local handle of plane 0.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Returns the format modifier.
    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    /// Returns true if the BO was imported from a dma-buf.
    pub fn is_imported(&self) -> bool {
        matches!(self.storage, Storage::Imported { .. })
    }

    /// Returns the dma-buf of the BO, if it has one.
    ///
    /// Dumb BOs are never exported and have none.
    pub fn fd(&self) -> Option<RawFd> {
        match self.storage {
            Storage::Allocated(ref handle) => self.device.backend().layout(handle).dmabuf,
            Storage::Imported { dmabuf } => Some(dmabuf),
        }
    }

    /// Returns the memory plane count.
    pub fn plane_count(&self) -> Result<u32> {
        match self.storage {
            Storage::Allocated(ref handle) => self.device.backend().plane_count(handle),
            Storage::Imported { .. } => Ok(1),
        }
    }

    /// Returns the device-local handle of a plane.
    pub fn plane_handle(&self, plane: u32) -> Result<u64> {
        match self.storage {
            Storage::Allocated(ref handle) => self.device.backend().plane_handle(handle, plane),
            Storage::Imported { .. } if plane == 0 => Ok(self.handle),
            Storage::Imported { .. } => Error::user(),
        }
    }

    /// Returns the stride of a plane.  Every plane reports the stride of plane 0.
    pub fn plane_stride(&self, _plane: u32) -> u32 {
        self.stride
    }

    /// Returns the offset of a plane.
    pub fn plane_offset(&self, plane: u32) -> Result<u32> {
        match self.storage {
            Storage::Allocated(ref handle) => self.device.backend().plane_offset(handle, plane),
            Storage::Imported { .. } if plane == 0 => Ok(0),
            Storage::Imported { .. } => Error::user(),
        }
    }

    /// Maps a region of the BO for CPU access.
    ///
    /// Imported BOs are not mappable.
    pub fn map(&mut self, rect: Rect) -> Result<Region> {
        if !rect.fits(self.width, self.height) {
            return Error::user();
        }

        match self.storage {
            Storage::Allocated(ref mut handle) => self.device.backend().map(handle, rect),
            Storage::Imported { .. } => Error::unsupported(),
        }
    }

    /// Unmaps a region returned by [`Bo::map`].
    ///
    /// # Panics
    ///
    /// Panics if `data` does not point into the mapping of a dumb BO.
    pub fn unmap(&mut self, data: *mut ffi::c_void) {
        match self.storage {
            Storage::Allocated(ref mut handle) => self.device.backend().unmap(handle, data),
            Storage::Imported { .. } => (),
        }
    }

    /// Writes `data` to the start of the BO.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.storage {
            Storage::Allocated(ref mut handle) => self.device.backend().write(handle, data),
            Storage::Imported { .. } => Error::unsupported(),
        }
    }
}

impl Drop for Bo {
    fn drop(&mut self) {
        match self.storage {
            Storage::Allocated(ref mut handle) => self.device.backend().free(handle),
            Storage::Imported { dmabuf } => {
                debug!("releasing imported dma-buf {dmabuf}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Builder;
    use crate::testing::FakeCard;
    use crate::{ARGB8888, BO_FORMAT_XRGB8888, XRGB8888};
    use std::fs::File;
    use std::os::fd::AsFd;

    fn device() -> (Rc<FakeCard>, Rc<Device>) {
        let card = Rc::new(FakeCard::new());
        let dev = Builder::new().card(card.clone()).build().unwrap();

        (card, dev)
    }

    #[test]
    fn create_write_usage() {
        let (card, dev) = device();

        let mut bo = Bo::new(dev, 64, 64, XRGB8888, Usage::WRITE, &[]).unwrap();
        assert!(bo.stride() >= 64 * 4);
        assert_eq!(bo.plane_count().unwrap(), 1);
        assert_eq!(bo.modifier(), MOD_LINEAR);
        assert_eq!(bo.fd(), None);
        assert!(!bo.is_imported());
        assert_eq!(card.mapped(), 1);

        let region = bo.map(Rect::new(0, 0, 64, 64)).unwrap();
        assert!(!region.ptr.as_ptr().is_null());
        assert_eq!(region.stride, bo.stride());
        bo.unmap(region.data);
    }

    #[test]
    fn create_without_write_usage() {
        let (card, dev) = device();

        for usage in [
            Usage::SCANOUT,
            Usage::CURSOR,
            Usage::PROTECTED,
            Usage::LINEAR,
            Usage::FRONT_RENDERING,
            Usage::SCANOUT | Usage::RENDERING,
        ] {
            assert!(matches!(
                Bo::new(dev.clone(), 64, 64, XRGB8888, usage, &[]),
                Err(Error::Unsupported)
            ));
        }
        assert_eq!(card.created(), 0);
    }

    #[test]
    fn create_invalid() {
        let (card, dev) = device();

        assert!(matches!(
            Bo::new(dev.clone(), 0, 64, XRGB8888, Usage::WRITE, &[]),
            Err(Error::User)
        ));
        assert!(matches!(
            Bo::new(dev, 64, 0, XRGB8888, Usage::WRITE, &[]),
            Err(Error::User)
        ));
        assert_eq!(card.created(), 0);
    }

    #[test]
    fn create_canonicalizes() {
        let (_card, dev) = device();

        let bo = Bo::new(dev, 8, 8, BO_FORMAT_XRGB8888, Usage::WRITE, &[]).unwrap();
        assert_eq!(bo.format(), XRGB8888);
    }

    #[test]
    fn create_records_first_modifier() {
        let (_card, dev) = device();

        let block_linear = Modifier(0x0300_0000_0060_1015);
        let bo = Bo::new(
            dev,
            8,
            8,
            ARGB8888,
            Usage::WRITE,
            &[block_linear, MOD_LINEAR],
        )
        .unwrap();
        assert_eq!(bo.modifier(), block_linear);
    }

    #[test]
    fn destroy_is_leak_free() {
        let (card, dev) = device();

        let mut handles = Vec::new();
        for i in 1..=4 {
            let mut bo = Bo::new(dev.clone(), 16 * i, 16, XRGB8888, Usage::WRITE, &[]).unwrap();
            if i % 2 == 0 {
                let region = bo.map(Rect::new(1, 1, 2, 2)).unwrap();
                bo.unmap(region.data);
            }
            handles.push(bo.handle() as u32);
        }
        assert!(card.live().is_empty());
        assert_eq!(card.mapped(), 0);
        assert_eq!(card.destroyed(), handles);
    }

    #[test]
    fn destroy_unmapped() {
        let (card, dev) = device();
        card.fail_map(true);

        let mut bo = Bo::new(dev, 16, 16, XRGB8888, Usage::WRITE, &[]).unwrap();
        assert!(bo.map(Rect::new(0, 0, 16, 16)).is_err());
        drop(bo);

        assert_eq!(card.created(), 1);
        assert!(card.live().is_empty());
    }

    #[test]
    fn create_failure() {
        let (card, dev) = device();
        card.fail_create(true);

        assert!(matches!(
            Bo::new(dev, 16, 16, XRGB8888, Usage::WRITE, &[]),
            Err(Error::Device)
        ));
    }

    #[test]
    fn map_rect() {
        let (_card, dev) = device();

        let mut bo = Bo::new(dev, 32, 16, XRGB8888, Usage::WRITE, &[]).unwrap();
        let base = bo.map(Rect::new(0, 0, 32, 16)).unwrap();
        let region = bo.map(Rect::new(31, 15, 1, 1)).unwrap();
        assert_eq!(
            region.ptr.as_ptr() as usize - base.ptr.as_ptr() as usize,
            bo.stride() as usize * 15 + 4 * 31
        );
        bo.unmap(region.data);
        bo.unmap(base.data);

        assert!(matches!(bo.map(Rect::new(32, 0, 1, 1)), Err(Error::User)));
        assert!(matches!(bo.map(Rect::new(0, 8, 1, 9)), Err(Error::User)));
    }

    #[test]
    #[should_panic]
    fn unmap_foreign_pointer() {
        let (_card, dev) = device();

        let mut bo = Bo::new(dev, 16, 16, XRGB8888, Usage::WRITE, &[]).unwrap();
        let mut other = [0u32; 4];
        bo.unmap(other.as_mut_ptr().cast());
    }

    #[test]
    fn write() {
        let (card, dev) = device();

        let mut bo = Bo::new(dev, 4, 4, XRGB8888, Usage::WRITE, &[]).unwrap();
        bo.write(&[0xff; 16]).unwrap();
        assert_eq!(&card.contents(bo.handle() as u32)[..16], &[0xff; 16]);
    }

    #[test]
    fn import_fd_modifier() {
        let (card, dev) = device();
        let dmabuf = File::open("/dev/null").unwrap();

        let modifier = Modifier(0x0300_0000_0060_1015);
        let planes = [ImportPlane {
            fd: dmabuf.as_fd(),
            stride: 256,
            offset: 0,
        }];
        let import = Import {
            width: 64,
            height: 64,
            format: BO_FORMAT_XRGB8888,
            modifier: Some(modifier),
            planes: &planes,
        };

        let mut bo = Bo::import(dev, &import, Usage::SCANOUT).unwrap();
        assert!(bo.is_imported());
        assert_eq!(bo.modifier(), modifier);
        assert_eq!(bo.plane_count().unwrap(), 1);
        assert_eq!(bo.format(), XRGB8888);
        assert_eq!(bo.stride(), 256);
        assert_eq!(bo.fd(), Some(dmabuf.as_raw_fd()));
        assert_eq!(bo.plane_handle(0).unwrap(), bo.handle());
        assert!(bo.plane_handle(1).is_err());
        assert_eq!(bo.plane_offset(0).unwrap(), 0);
        assert_eq!(bo.plane_stride(1), 256);

        assert!(matches!(
            bo.map(Rect::new(0, 0, 1, 1)),
            Err(Error::Unsupported)
        ));
        assert!(matches!(bo.write(&[0; 4]), Err(Error::Unsupported)));
        bo.unmap(std::ptr::null_mut());

        assert_eq!(card.imported(), 1);
        assert_eq!(card.created(), 0);
    }

    #[test]
    fn import_fd() {
        let (_card, dev) = device();
        let dmabuf = File::open("/dev/null").unwrap();

        let planes = [ImportPlane {
            fd: dmabuf.as_fd(),
            stride: 64,
            offset: 0,
        }];
        let import = Import {
            width: 16,
            height: 16,
            format: ARGB8888,
            modifier: None,
            planes: &planes,
        };

        let first = Bo::import(dev.clone(), &import, Usage::empty()).unwrap();
        let second = Bo::import(dev, &import, Usage::empty()).unwrap();
        assert_eq!(first.modifier(), MOD_LINEAR);
        assert_eq!(first.handle(), second.handle());
    }

    #[test]
    fn import_multi_planar() {
        let (_card, dev) = device();
        let first = File::open("/dev/null").unwrap();
        let second = File::open("/dev/null").unwrap();

        let planes = [
            ImportPlane {
                fd: first.as_fd(),
                stride: 64,
                offset: 0,
            },
            ImportPlane {
                fd: second.as_fd(),
                stride: 32,
                offset: 0,
            },
        ];
        let import = Import {
            width: 16,
            height: 16,
            format: XRGB8888,
            modifier: Some(MOD_LINEAR),
            planes: &planes,
        };

        let bo = Bo::import(dev, &import, Usage::empty()).unwrap();
        assert_eq!(bo.fd(), Some(first.as_raw_fd()));
        assert_eq!(bo.stride(), 64);
        assert_eq!(bo.plane_count().unwrap(), 1);
    }

    #[test]
    fn import_failure() {
        let (card, dev) = device();
        let dmabuf = File::open("/dev/null").unwrap();

        let import = Import {
            width: 16,
            height: 16,
            format: XRGB8888,
            modifier: None,
            planes: &[],
        };
        assert!(matches!(
            Bo::import(dev.clone(), &import, Usage::empty()),
            Err(Error::User)
        ));

        card.fail_prime(true);
        let planes = [ImportPlane {
            fd: dmabuf.as_fd(),
            stride: 64,
            offset: 0,
        }];
        let import = Import {
            planes: &planes,
            ..import
        };
        assert!(Bo::import(dev, &import, Usage::empty()).is_err());
        assert_eq!(card.imported(), 0);
    }
}
