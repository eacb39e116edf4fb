// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::{Description, Handle, HandlePayload, Layout};
use crate::formats;
use crate::types::{Error, Format, Modifier, Rect, Region, Result, Usage};
use log::{debug, error, warn};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::raw::{c_int, c_uint, c_void};
use std::{ffi, io, ptr};

// from gbm.h
#[allow(non_camel_case_types, dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
union gbm_bo_handle {
    ptr: *mut c_void,
    s32: i32,
    u32: u32,
    s64: i64,
    u64: u64,
}

const GBM_BO_TRANSFER_READ_WRITE: u32 = 3;

fn lookup<T: Copy>(lib: &libloading::Library, name: &str) -> Option<T> {
    // SAFETY: T is the prototype of name in gbm.h
    let sym = unsafe { lib.get::<T>(name.as_bytes()) };
    match sym {
        Ok(sym) => Some(*sym),
        Err(err) => {
            debug!("vendor symbol {name} is unavailable: {err}");
            None
        }
    }
}

fn require<T>(sym: Option<T>, name: &'static str) -> Result<T> {
    sym.ok_or_else(|| {
        error!("vendor library lacks {name}");
        Error::Context("missing vendor symbol")
    })
}

macro_rules! symbols {
    ($($name:ident: fn($($arg:ty),*) $(-> $ret:ty)?;)*) => {
        struct Symbols {
            $($name: Option<unsafe extern "C" fn($($arg),*) $(-> $ret)?>,)*
        }

        impl Symbols {
            fn load(lib: &libloading::Library) -> Self {
                Self {
                    $($name: lookup(lib, stringify!($name)),)*
                }
            }
        }
    };
}

symbols! {
    gbm_create_device: fn(c_int) -> *mut c_void;
    gbm_device_destroy: fn(*mut c_void);
    gbm_device_is_format_supported: fn(*mut c_void, u32, u32) -> c_int;
    gbm_device_get_format_modifier_plane_count: fn(*mut c_void, u32, u64) -> c_int;
    gbm_bo_create: fn(*mut c_void, u32, u32, u32, u32) -> *mut c_void;
    gbm_bo_create_with_modifiers: fn(*mut c_void, u32, u32, u32, *const u64, c_uint) -> *mut c_void;
    gbm_bo_destroy: fn(*mut c_void);
    gbm_bo_map: fn(*mut c_void, u32, u32, u32, u32, u32, *mut u32, *mut *mut c_void) -> *mut c_void;
    gbm_bo_unmap: fn(*mut c_void, *mut c_void);
    gbm_bo_write: fn(*mut c_void, *const c_void, usize) -> c_int;
    gbm_bo_get_handle: fn(*mut c_void) -> gbm_bo_handle;
    gbm_bo_get_handle_for_plane: fn(*mut c_void, c_int) -> gbm_bo_handle;
    gbm_bo_get_stride: fn(*mut c_void) -> u32;
    gbm_bo_get_offset: fn(*mut c_void, c_int) -> u32;
    gbm_bo_get_fd: fn(*mut c_void) -> c_int;
    gbm_bo_get_plane_count: fn(*mut c_void) -> c_int;
}

macro_rules! sym {
    ($backend:expr, $name:ident) => {
        require($backend.syms.$name, stringify!($name))
    };
}

/// The allocation behind a vendor BO handle.
pub struct Resource {
    bo: ptr::NonNull<c_void>,
    handle: u64,
    stride: u32,
    dmabuf: Option<OwnedFd>,
}

impl From<Resource> for Handle {
    fn from(res: Resource) -> Self {
        Handle::new(HandlePayload::Vendor(res))
    }
}

impl AsRef<Resource> for Handle {
    fn as_ref(&self) -> &Resource {
        match self.payload {
            HandlePayload::Vendor(ref res) => res,
            _ => unreachable!(),
        }
    }
}

impl AsMut<Resource> for Handle {
    fn as_mut(&mut self) -> &mut Resource {
        match self.payload {
            HandlePayload::Vendor(ref mut res) => res,
            _ => unreachable!(),
        }
    }
}

/// A vendor strategy builder.
#[derive(Default)]
pub struct Builder {
    library: Option<ffi::OsString>,
    node_fd: Option<RawFd>,
}

impl Builder {
    /// Creates a vendor strategy builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the vendor library to load.
    pub fn library(mut self, library: impl Into<ffi::OsString>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Sets the DRM device fd to create the vendor device on.
    pub fn node_fd(mut self, node_fd: RawFd) -> Self {
        self.node_fd = Some(node_fd);
        self
    }

    /// Loads the library and creates the vendor device.
    pub fn build(self) -> Result<Backend> {
        let library = match self.library {
            Some(library) => library,
            None => return Error::user(),
        };
        let node_fd = match self.node_fd {
            Some(node_fd) => node_fd,
            None => return Error::user(),
        };

        // SAFETY: the vendor library is a GBM implementation with no unusual initializers
        let lib = unsafe { libloading::Library::new(&library) }?;
        let syms = Symbols::load(&lib);

        let create_device = require(syms.gbm_create_device, "gbm_create_device")?;
        require(syms.gbm_device_destroy, "gbm_device_destroy")?;

        // SAFETY: node_fd is valid
        let device = unsafe { create_device(node_fd) };
        let device = match ptr::NonNull::new(device) {
            Some(device) => device,
            None => {
                warn!("vendor library {library:?} failed to create a device");
                return Error::device();
            }
        };

        debug!("created vendor device from {library:?}");

        Ok(Backend {
            device,
            syms,
            _lib: lib,
        })
    }
}

/// The vendor strategy.
///
/// Every BO is allocated by the vendor GBM device.  Fields drop after the vendor device is
/// destroyed, so the library outlives every call into it.
pub struct Backend {
    device: ptr::NonNull<c_void>,
    syms: Symbols,
    _lib: libloading::Library,
}

impl Backend {
    fn create(&self, desc: &Description, modifiers: &[Modifier]) -> Result<ptr::NonNull<c_void>> {
        let dev = self.device.as_ptr();

        let bo = if modifiers.is_empty() {
            let create = sym!(self, gbm_bo_create)?;
            // SAFETY: dev is a live vendor device
            unsafe {
                create(
                    dev,
                    desc.width,
                    desc.height,
                    desc.format.0,
                    desc.usage.bits(),
                )
            }
        } else {
            let create = sym!(self, gbm_bo_create_with_modifiers)?;

            let mut mods: Vec<u64> = Vec::new();
            mods.try_reserve_exact(modifiers.len())?;
            mods.extend(
                modifiers
                    .iter()
                    .map(|m| m.0 & !formats::NVIDIA_VENDOR_BITS),
            );
            let count = c_uint::try_from(mods.len())?;

            // SAFETY: dev is a live vendor device and mods has count elements
            unsafe {
                create(
                    dev,
                    desc.width,
                    desc.height,
                    desc.format.0,
                    mods.as_ptr(),
                    count,
                )
            }
        };

        ptr::NonNull::new(bo).ok_or_else(|| Error::from(io::Error::last_os_error()))
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Ok(destroy) = sym!(self, gbm_device_destroy) {
            // SAFETY: device is live and no BO refers to it anymore
            unsafe { destroy(self.device.as_ptr()) };
        }
    }
}

impl super::Backend for Backend {
    fn name(&self) -> &'static str {
        "vendor"
    }

    fn is_format_supported(&self, fmt: Format, usage: Usage) -> Result<bool> {
        let query = sym!(self, gbm_device_is_format_supported)?;
        let fmt = formats::canonicalize(fmt);

        // SAFETY: device is live
        let ret = unsafe { query(self.device.as_ptr(), fmt.0, usage.bits()) };

        Ok(ret != 0)
    }

    fn memory_plane_count(&self, fmt: Format, modifier: Modifier) -> Result<u32> {
        let query = sym!(self, gbm_device_get_format_modifier_plane_count)?;
        let fmt = formats::canonicalize(fmt);

        // SAFETY: device is live
        let ret = unsafe { query(self.device.as_ptr(), fmt.0, modifier.0) };

        u32::try_from(ret).or_else(|_| Error::unsupported())
    }

    fn allocate(&self, desc: &Description, modifiers: &[Modifier]) -> Result<Handle> {
        let get_handle = sym!(self, gbm_bo_get_handle)?;
        let get_stride = sym!(self, gbm_bo_get_stride)?;
        let get_fd = sym!(self, gbm_bo_get_fd)?;
        // checked early so that the BO can always be freed
        sym!(self, gbm_bo_destroy)?;

        let bo = self.create(desc, modifiers)?;

        // SAFETY: bo is a live vendor BO
        let handle = unsafe { get_handle(bo.as_ptr()) };
        // SAFETY: GEM handles are 32-bit and u32 is always initialized
        let handle = u64::from(unsafe { handle.u32 });
        // SAFETY: bo is a live vendor BO
        let stride = unsafe { get_stride(bo.as_ptr()) };
        // SAFETY: bo is a live vendor BO
        let fd = unsafe { get_fd(bo.as_ptr()) };

        let dmabuf = if fd >= 0 {
            // SAFETY: gbm_bo_get_fd returns a new fd owned by the caller
            Some(unsafe { OwnedFd::from_raw_fd(fd) })
        } else {
            None
        };

        debug!(
            "created vendor BO {handle} ({}x{} {}, stride {stride})",
            desc.width, desc.height, desc.format
        );

        let res = Resource {
            bo,
            handle,
            stride,
            dmabuf,
        };

        Ok(Handle::from(res))
    }

    fn free(&self, handle: &mut Handle) {
        let res: &mut Resource = handle.as_mut();
        res.dmabuf.take();

        if let Ok(destroy) = sym!(self, gbm_bo_destroy) {
            // SAFETY: bo is live and is not used after this
            unsafe { destroy(res.bo.as_ptr()) };
        }
    }

    fn layout(&self, handle: &Handle) -> Layout {
        let res: &Resource = handle.as_ref();

        Layout {
            handle: res.handle,
            stride: res.stride,
            dmabuf: res.dmabuf.as_ref().map(|fd| fd.as_raw_fd()),
        }
    }

    fn map(&self, handle: &mut Handle, rect: Rect) -> Result<Region> {
        let map = sym!(self, gbm_bo_map)?;
        let res: &mut Resource = handle.as_mut();

        let mut stride = 0;
        let mut data = ptr::null_mut();
        // SAFETY: bo is live and stride and data are valid for writes
        let ptr = unsafe {
            map(
                res.bo.as_ptr(),
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                GBM_BO_TRANSFER_READ_WRITE,
                &mut stride,
                &mut data,
            )
        };
        let ptr = match ptr::NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return Err(Error::from(io::Error::last_os_error())),
        };

        Ok(Region { ptr, stride, data })
    }

    fn unmap(&self, handle: &mut Handle, data: *mut ffi::c_void) {
        let res: &mut Resource = handle.as_mut();

        if let Ok(unmap) = sym!(self, gbm_bo_unmap) {
            // SAFETY: data is from gbm_bo_map
            unsafe { unmap(res.bo.as_ptr(), data) };
        }
    }

    fn write(&self, handle: &mut Handle, data: &[u8]) -> Result<()> {
        let write = sym!(self, gbm_bo_write)?;
        let res: &mut Resource = handle.as_mut();

        // SAFETY: data is valid for data.len() bytes
        let ret = unsafe { write(res.bo.as_ptr(), data.as_ptr().cast(), data.len()) };
        if ret != 0 {
            return Err(Error::from(io::Error::last_os_error()));
        }

        Ok(())
    }

    fn plane_count(&self, handle: &Handle) -> Result<u32> {
        let get_plane_count = sym!(self, gbm_bo_get_plane_count)?;
        let res: &Resource = handle.as_ref();

        // SAFETY: bo is live
        let count = unsafe { get_plane_count(res.bo.as_ptr()) };

        u32::try_from(count).or_else(|_| Error::device())
    }

    fn plane_handle(&self, handle: &Handle, plane: u32) -> Result<u64> {
        let get_handle = sym!(self, gbm_bo_get_handle_for_plane)?;
        let res: &Resource = handle.as_ref();
        let plane = c_int::try_from(plane)?;

        // SAFETY: bo is live
        let handle = unsafe { get_handle(res.bo.as_ptr(), plane) };
        // SAFETY: GEM handles are 32-bit and u32 is always initialized
        let handle = unsafe { handle.u32 };

        Ok(u64::from(handle))
    }

    fn plane_offset(&self, handle: &Handle, plane: u32) -> Result<u32> {
        let get_offset = sym!(self, gbm_bo_get_offset)?;
        let res: &Resource = handle.as_ref();
        let plane = c_int::try_from(plane)?;

        // SAFETY: bo is live
        let offset = unsafe { get_offset(res.bo.as_ptr(), plane) };

        Ok(offset)
    }
}
