// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The GBM backend ABI.
//!
//! The layouts follow `gbmint.h` and `gbm_backend_abi.h` at backend ABI version 1.  The host
//! loader owns the field order, so it must not change.

#![allow(missing_docs, non_camel_case_types)]

use super::config::Config;
use log::{debug, error, warn};
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;
use std::{panic, process, ptr, slice};
use tudrm::{Error, Format, Import, ImportPlane, Modifier, Rect, Usage};

pub const GBM_BO_IMPORT_WL_BUFFER: u32 = 0x5501;
pub const GBM_BO_IMPORT_EGL_IMAGE: u32 = 0x5502;
pub const GBM_BO_IMPORT_FD: u32 = 0x5503;
pub const GBM_BO_IMPORT_FD_MODIFIER: u32 = 0x5504;

pub const GBM_MAX_PLANES: usize = 4;

const BACKEND_NAME: &[u8] = b"tegra-udrm\0";

#[repr(C)]
#[derive(Clone, Copy)]
pub union gbm_bo_handle {
    pub ptr: *mut c_void,
    pub s32: i32,
    pub u32: u32,
    pub s64: i64,
    pub u64: u64,
}

#[repr(C)]
pub struct gbm_backend_desc {
    _data: [u8; 0],
}

#[repr(C)]
pub struct gbm_device_v0 {
    pub backend_desc: *const gbm_backend_desc,
    pub backend_version: u32,
    pub fd: c_int,
    pub name: *const c_char,

    pub destroy: Option<unsafe extern "C" fn(gbm: *mut gbm_device)>,
    pub is_format_supported:
        Option<unsafe extern "C" fn(gbm: *mut gbm_device, format: u32, usage: u32) -> c_int>,
    pub get_format_modifier_plane_count:
        Option<unsafe extern "C" fn(gbm: *mut gbm_device, format: u32, modifier: u64) -> c_int>,

    pub bo_create: Option<
        unsafe extern "C" fn(
            gbm: *mut gbm_device,
            width: u32,
            height: u32,
            format: u32,
            usage: u32,
            modifiers: *const u64,
            count: c_uint,
        ) -> *mut gbm_bo,
    >,
    pub bo_import: Option<
        unsafe extern "C" fn(
            gbm: *mut gbm_device,
            type_: u32,
            buffer: *mut c_void,
            usage: u32,
        ) -> *mut gbm_bo,
    >,
    pub bo_map: Option<
        unsafe extern "C" fn(
            bo: *mut gbm_bo,
            x: u32,
            y: u32,
            width: u32,
            height: u32,
            flags: u32,
            stride: *mut u32,
            map_data: *mut *mut c_void,
        ) -> *mut c_void,
    >,
    pub bo_unmap: Option<unsafe extern "C" fn(bo: *mut gbm_bo, map_data: *mut c_void)>,
    pub bo_write:
        Option<unsafe extern "C" fn(bo: *mut gbm_bo, buf: *const c_void, count: usize) -> c_int>,
    pub bo_get_fd: Option<unsafe extern "C" fn(bo: *mut gbm_bo) -> c_int>,
    pub bo_get_planes: Option<unsafe extern "C" fn(bo: *mut gbm_bo) -> c_int>,
    pub bo_get_handle: Option<unsafe extern "C" fn(bo: *mut gbm_bo, plane: c_int) -> gbm_bo_handle>,
    pub bo_get_plane_fd: Option<unsafe extern "C" fn(bo: *mut gbm_bo, plane: c_int) -> c_int>,
    pub bo_get_stride: Option<unsafe extern "C" fn(bo: *mut gbm_bo, plane: c_int) -> u32>,
    pub bo_get_offset: Option<unsafe extern "C" fn(bo: *mut gbm_bo, plane: c_int) -> u32>,
    pub bo_get_modifier: Option<unsafe extern "C" fn(bo: *mut gbm_bo) -> u64>,
    pub bo_destroy: Option<unsafe extern "C" fn(bo: *mut gbm_bo)>,

    pub surface_create: Option<
        unsafe extern "C" fn(
            gbm: *mut gbm_device,
            width: u32,
            height: u32,
            format: u32,
            flags: u32,
            modifiers: *const u64,
            count: c_uint,
        ) -> *mut gbm_surface,
    >,
    pub surface_lock_front_buffer:
        Option<unsafe extern "C" fn(surface: *mut gbm_surface) -> *mut gbm_bo>,
    pub surface_release_buffer:
        Option<unsafe extern "C" fn(surface: *mut gbm_surface, bo: *mut gbm_bo)>,
    pub surface_has_free_buffers: Option<unsafe extern "C" fn(surface: *mut gbm_surface) -> c_int>,
    pub surface_destroy: Option<unsafe extern "C" fn(surface: *mut gbm_surface)>,
}

#[repr(C)]
pub struct gbm_device {
    // lets the loader tell a gbm_device from other objects by its first member
    pub dummy: Option<unsafe extern "C" fn(fd: c_int) -> *mut gbm_device>,
    pub v0: gbm_device_v0,
}

#[repr(C)]
pub struct gbm_bo_v0 {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub handle: gbm_bo_handle,
    pub user_data: *mut c_void,
    pub destroy_user_data: Option<unsafe extern "C" fn(bo: *mut gbm_bo, data: *mut c_void)>,
}

#[repr(C)]
pub struct gbm_bo {
    pub gbm: *mut gbm_device,
    pub v0: gbm_bo_v0,
}

#[repr(C)]
pub struct gbm_surface_v0 {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub flags: u32,
    pub modifiers: *mut u64,
    pub count: c_uint,
}

#[repr(C)]
pub struct gbm_surface {
    pub gbm: *mut gbm_device,
    pub v0: gbm_surface_v0,
}

#[repr(C)]
pub struct gbm_backend_v0 {
    pub backend_version: u32,
    pub backend_name: *const c_char,
    pub create_device:
        Option<unsafe extern "C" fn(fd: c_int, gbm_backend_version: u32) -> *mut gbm_device>,
}

#[repr(C)]
pub struct gbm_backend {
    pub v0: gbm_backend_v0,
}

#[repr(C)]
pub struct gbm_core_v0 {
    pub core_version: u32,
    pub format_canonicalize: Option<unsafe extern "C" fn(gbm_format: u32) -> u32>,
}

#[repr(C)]
pub struct gbm_core {
    pub v0: gbm_core_v0,
}

#[repr(C)]
pub struct gbm_import_fd_data {
    pub fd: c_int,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
}

#[repr(C)]
pub struct gbm_import_fd_modifier_data {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub num_fds: u32,
    pub fds: [c_int; GBM_MAX_PLANES],
    pub strides: [c_int; GBM_MAX_PLANES],
    pub offsets: [c_int; GBM_MAX_PLANES],
    pub modifier: u64,
}

struct Backend(gbm_backend);

// SAFETY: the backend is immutable and only points to static data
unsafe impl Sync for Backend {}

static BACKEND: Backend = Backend(gbm_backend {
    v0: gbm_backend_v0 {
        backend_version: tudrm::ABI_VERSION,
        backend_name: BACKEND_NAME.as_ptr().cast(),
        create_device: Some(gbm_tudrm_device_create),
    },
});

pub(crate) fn errno_of(err: &Error) -> c_int {
    match err {
        Error::User | Error::Unsupported | Error::AbiVersion { .. } => libc::EINVAL,
        Error::OutOfMemory => libc::ENOMEM,
        Error::Library(_) => libc::ENODEV,
        Error::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        _ => libc::EIO,
    }
}

fn set_errno(err: &Error) {
    debug!("returning error: {err}");
    errno::set_errno(errno::Errno(errno_of(err)));
}

fn ptr_or_null<T>(res: tudrm::Result<*mut T>) -> *mut T {
    match res {
        Ok(ptr) => ptr,
        Err(err) => {
            set_errno(&err);
            ptr::null_mut()
        }
    }
}

fn int_or_neg(res: tudrm::Result<u32>) -> c_int {
    match res.and_then(|val| Ok(c_int::try_from(val)?)) {
        Ok(val) => val,
        Err(err) => {
            set_errno(&err);
            -1
        }
    }
}

fn plane_from(plane: c_int) -> tudrm::Result<u32> {
    Ok(u32::try_from(plane)?)
}

fn modifiers_from<'a>(modifiers: *const u64, count: c_uint) -> Option<&'a [Modifier]> {
    if modifiers.is_null() {
        return None;
    }

    // SAFETY: modifiers has count elements and Modifier is a transparent u64
    let mods = unsafe { slice::from_raw_parts(modifiers.cast::<Modifier>(), count as usize) };

    Some(mods)
}

#[repr(C)]
struct Device {
    base: gbm_device,
    device: Rc<tudrm::Device>,
}

impl Device {
    fn into(fd: c_int, device: Rc<tudrm::Device>) -> *mut gbm_device {
        let dev = Box::new(Self {
            base: gbm_device {
                dummy: None,
                v0: gbm_device_v0 {
                    backend_desc: ptr::null(),
                    backend_version: tudrm::ABI_VERSION,
                    fd,
                    name: BACKEND_NAME.as_ptr().cast(),
                    destroy: Some(gbm_tudrm_device_destroy),
                    is_format_supported: Some(gbm_tudrm_is_format_supported),
                    get_format_modifier_plane_count: Some(
                        gbm_tudrm_get_format_modifier_plane_count,
                    ),
                    bo_create: Some(gbm_tudrm_bo_create),
                    bo_import: Some(gbm_tudrm_bo_import),
                    bo_map: Some(gbm_tudrm_bo_map),
                    bo_unmap: Some(gbm_tudrm_bo_unmap),
                    bo_write: Some(gbm_tudrm_bo_write),
                    bo_get_fd: Some(gbm_tudrm_bo_get_fd),
                    bo_get_planes: Some(gbm_tudrm_bo_get_planes),
                    bo_get_handle: Some(gbm_tudrm_bo_get_handle),
                    bo_get_plane_fd: Some(gbm_tudrm_bo_get_plane_fd),
                    bo_get_stride: Some(gbm_tudrm_bo_get_stride),
                    bo_get_offset: Some(gbm_tudrm_bo_get_offset),
                    bo_get_modifier: Some(gbm_tudrm_bo_get_modifier),
                    bo_destroy: Some(gbm_tudrm_bo_destroy),
                    surface_create: Some(gbm_tudrm_surface_create),
                    surface_lock_front_buffer: None,
                    surface_release_buffer: None,
                    surface_has_free_buffers: None,
                    surface_destroy: Some(gbm_tudrm_surface_destroy),
                },
            },
            device,
        });

        Box::into_raw(dev) as *mut gbm_device
    }

    fn from(gbm: *mut gbm_device) -> Box<Self> {
        // SAFETY: gbm was created by Self::into
        unsafe { Box::from_raw(gbm as *mut Self) }
    }

    fn as_ref<'a>(gbm: *mut gbm_device) -> &'a Self {
        // SAFETY: gbm was created by Self::into
        unsafe { &*(gbm as *const Self) }
    }
}

#[repr(C)]
struct Bo {
    base: gbm_bo,
    bo: tudrm::Bo,
}

impl Bo {
    fn into(gbm: *mut gbm_device, bo: tudrm::Bo) -> *mut gbm_bo {
        let bo = Box::new(Self {
            base: gbm_bo {
                gbm,
                v0: gbm_bo_v0 {
                    width: bo.width(),
                    height: bo.height(),
                    stride: bo.stride(),
                    format: bo.format().0,
                    handle: gbm_bo_handle { u64: bo.handle() },
                    user_data: ptr::null_mut(),
                    destroy_user_data: None,
                },
            },
            bo,
        });

        Box::into_raw(bo) as *mut gbm_bo
    }

    fn from(bo: *mut gbm_bo) -> Box<Self> {
        // SAFETY: bo was created by Self::into
        unsafe { Box::from_raw(bo as *mut Self) }
    }

    fn as_ref<'a>(bo: *mut gbm_bo) -> &'a Self {
        // SAFETY: bo was created by Self::into
        unsafe { &*(bo as *const Self) }
    }

    fn as_mut<'a>(bo: *mut gbm_bo) -> &'a mut Self {
        // SAFETY: bo was created by Self::into
        unsafe { &mut *(bo as *mut Self) }
    }
}

#[repr(C)]
struct Surface {
    base: gbm_surface,
    surface: tudrm::Surface,
}

impl Surface {
    fn into(gbm: *mut gbm_device, surface: tudrm::Surface) -> tudrm::Result<*mut gbm_surface> {
        // the host only reads the list
        let (modifiers, count) = match surface.modifiers() {
            Some(mods) => (mods.as_ptr() as *mut u64, c_uint::try_from(mods.len())?),
            None => (ptr::null_mut(), 0),
        };

        let surf = Box::new(Self {
            base: gbm_surface {
                gbm,
                v0: gbm_surface_v0 {
                    width: surface.width(),
                    height: surface.height(),
                    format: surface.format().0,
                    flags: surface.usage().bits(),
                    modifiers,
                    count,
                },
            },
            surface,
        });

        Ok(Box::into_raw(surf) as *mut gbm_surface)
    }

    fn from(surface: *mut gbm_surface) -> Box<Self> {
        // SAFETY: surface was created by Self::into
        unsafe { Box::from_raw(surface as *mut Self) }
    }
}

fn device_create(fd: c_int, builder: tudrm::Builder) -> tudrm::Result<*mut gbm_device> {
    let device = builder.build()?;
    debug!(
        "created {} device on fd {fd} with the {} strategy",
        device.name(),
        device.strategy()
    );

    Ok(Device::into(fd, device))
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_device_create(fd: c_int, gbm_backend_version: u32) -> *mut gbm_device {
    let config = Config::from_env();

    let mut builder = tudrm::Builder::new()
        .node_fd(fd)
        .abi_version(gbm_backend_version);
    if let Some(library) = config.vendor_library {
        builder = builder.vendor_library(library);
    }

    ptr_or_null(device_create(fd, builder))
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_device_destroy(gbm: *mut gbm_device) {
    let _ = Device::from(gbm);
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_is_format_supported(
    gbm: *mut gbm_device,
    format: u32,
    usage: u32,
) -> c_int {
    let dev = Device::as_ref(gbm);

    match dev
        .device
        .is_format_supported(Format(format), Usage::from_bits_truncate(usage))
    {
        Ok(supported) => supported as c_int,
        Err(err) => {
            set_errno(&err);
            0
        }
    }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_get_format_modifier_plane_count(
    gbm: *mut gbm_device,
    format: u32,
    modifier: u64,
) -> c_int {
    let dev = Device::as_ref(gbm);

    int_or_neg(
        dev.device
            .memory_plane_count(Format(format), Modifier(modifier)),
    )
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_create(
    gbm: *mut gbm_device,
    width: u32,
    height: u32,
    format: u32,
    usage: u32,
    modifiers: *const u64,
    count: c_uint,
) -> *mut gbm_bo {
    let dev = Device::as_ref(gbm);
    let mods = modifiers_from(modifiers, count).unwrap_or_default();

    let res = tudrm::Bo::new(
        dev.device.clone(),
        width,
        height,
        Format(format),
        Usage::from_bits_truncate(usage),
        mods,
    )
    .map(|bo| Bo::into(gbm, bo));

    ptr_or_null(res)
}

fn borrow_fd<'a>(fd: c_int) -> tudrm::Result<BorrowedFd<'a>> {
    if fd < 0 {
        return Err(Error::User);
    }

    // SAFETY: fd is non-negative and stays open for the duration of the import
    Ok(unsafe { BorrowedFd::borrow_raw(fd as RawFd) })
}

fn import_fd(
    dev: &Device,
    data: &gbm_import_fd_data,
    usage: Usage,
) -> tudrm::Result<tudrm::Bo> {
    let planes = [ImportPlane {
        fd: borrow_fd(data.fd)?,
        stride: data.stride,
        offset: 0,
    }];
    let import = Import {
        width: data.width,
        height: data.height,
        format: Format(data.format),
        modifier: None,
        planes: &planes,
    };

    tudrm::Bo::import(dev.device.clone(), &import, usage)
}

fn import_fd_modifier(
    dev: &Device,
    data: &gbm_import_fd_modifier_data,
    usage: Usage,
) -> tudrm::Result<tudrm::Bo> {
    // only plane 0 is consulted, whatever num_fds says
    if data.num_fds > 1 {
        warn!("ignoring {} planes past plane 0", data.num_fds - 1);
    }

    let planes = [ImportPlane {
        fd: borrow_fd(data.fds[0])?,
        stride: u32::try_from(data.strides[0])?,
        offset: u32::try_from(data.offsets[0])?,
    }];

    let import = Import {
        width: data.width,
        height: data.height,
        format: Format(data.format),
        modifier: Some(Modifier(data.modifier)),
        planes: &planes,
    };

    tudrm::Bo::import(dev.device.clone(), &import, usage)
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_import(
    gbm: *mut gbm_device,
    type_: u32,
    buffer: *mut c_void,
    usage: u32,
) -> *mut gbm_bo {
    let dev = Device::as_ref(gbm);
    let usage = Usage::from_bits_truncate(usage);

    if buffer.is_null() {
        return ptr_or_null(Err(Error::User));
    }

    let res = match type_ {
        GBM_BO_IMPORT_FD => {
            // SAFETY: buffer points to gbm_import_fd_data for this type
            let data = unsafe { &*(buffer as *const gbm_import_fd_data) };
            import_fd(dev, data, usage)
        }
        GBM_BO_IMPORT_FD_MODIFIER => {
            // SAFETY: buffer points to gbm_import_fd_modifier_data for this type
            let data = unsafe { &*(buffer as *const gbm_import_fd_modifier_data) };
            import_fd_modifier(dev, data, usage)
        }
        _ => {
            debug!("unsupported import type 0x{type_:x}");
            Err(Error::Unsupported)
        }
    };

    ptr_or_null(res.map(|bo| Bo::into(gbm, bo)))
}

/// # Safety
#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn gbm_tudrm_bo_map(
    bo: *mut gbm_bo,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    _flags: u32,
    stride: *mut u32,
    map_data: *mut *mut c_void,
) -> *mut c_void {
    let bo = Bo::as_mut(bo);

    let region = match bo.bo.map(Rect::new(x, y, width, height)) {
        Ok(region) => region,
        Err(err) => return ptr_or_null(Err(err)),
    };

    if !stride.is_null() {
        // SAFETY: stride is non-NULL
        unsafe { stride.write(region.stride) };
    }
    if !map_data.is_null() {
        // SAFETY: map_data is non-NULL
        unsafe { map_data.write(region.data) };
    }

    region.ptr.as_ptr()
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_unmap(bo: *mut gbm_bo, map_data: *mut c_void) {
    let bo = Bo::as_mut(bo);

    // a bad pointer is a broken caller and must not unwind into C
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| bo.bo.unmap(map_data)));
    if res.is_err() {
        error!("aborting on a bad unmap");
        process::abort();
    }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_write(bo: *mut gbm_bo, buf: *const c_void, count: usize) -> c_int {
    let bo = Bo::as_mut(bo);

    let data: &[u8] = if count == 0 {
        &[]
    } else if buf.is_null() {
        set_errno(&Error::User);
        return -1;
    } else {
        // SAFETY: buf is non-NULL and has count bytes
        unsafe { slice::from_raw_parts(buf.cast::<u8>(), count) }
    };

    match bo.bo.write(data) {
        Ok(()) => 0,
        Err(err) => {
            set_errno(&err);
            -1
        }
    }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_fd(bo: *mut gbm_bo) -> c_int {
    let bo = Bo::as_ref(bo);

    // dumb BOs are never exported
    bo.bo.fd().unwrap_or(0)
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_planes(bo: *mut gbm_bo) -> c_int {
    let bo = Bo::as_ref(bo);

    int_or_neg(bo.bo.plane_count())
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_handle(bo: *mut gbm_bo, plane: c_int) -> gbm_bo_handle {
    let bo = Bo::as_ref(bo);

    match plane_from(plane).and_then(|plane| bo.bo.plane_handle(plane)) {
        Ok(handle) => gbm_bo_handle { u64: handle },
        Err(err) => {
            set_errno(&err);
            gbm_bo_handle { s64: -1 }
        }
    }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_plane_fd(bo: *mut gbm_bo, plane: c_int) -> c_int {
    if plane != 0 {
        set_errno(&Error::User);
        return -1;
    }

    // SAFETY: bo is valid
    unsafe { gbm_tudrm_bo_get_fd(bo) }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_stride(bo: *mut gbm_bo, plane: c_int) -> u32 {
    let bo = Bo::as_ref(bo);

    match plane_from(plane) {
        Ok(plane) => bo.bo.plane_stride(plane),
        Err(err) => {
            set_errno(&err);
            0
        }
    }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_offset(bo: *mut gbm_bo, plane: c_int) -> u32 {
    let bo = Bo::as_ref(bo);

    match plane_from(plane).and_then(|plane| bo.bo.plane_offset(plane)) {
        Ok(offset) => offset,
        Err(err) => {
            set_errno(&err);
            0
        }
    }
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_get_modifier(bo: *mut gbm_bo) -> u64 {
    let bo = Bo::as_ref(bo);

    bo.bo.modifier().0
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_bo_destroy(bo: *mut gbm_bo) {
    let _ = Bo::from(bo);
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_surface_create(
    gbm: *mut gbm_device,
    width: u32,
    height: u32,
    format: u32,
    flags: u32,
    modifiers: *const u64,
    count: c_uint,
) -> *mut gbm_surface {
    let dev = Device::as_ref(gbm);
    let mods = modifiers_from(modifiers, count);

    let res = tudrm::Surface::new(
        dev.device.clone(),
        width,
        height,
        Format(format),
        Usage::from_bits_truncate(flags),
        mods,
    )
    .and_then(|surface| Surface::into(gbm, surface));

    ptr_or_null(res)
}

/// # Safety
unsafe extern "C" fn gbm_tudrm_surface_destroy(surface: *mut gbm_surface) {
    let _ = Surface::from(surface);
}

/// Returns the backend descriptor to the GBM loader.
///
/// # Safety
///
/// `core` is ignored and may be NULL.
#[no_mangle]
pub unsafe extern "C" fn gbmint_get_backend(core: *const gbm_core) -> *const gbm_backend {
    super::log::init();

    if !core.is_null() {
        // SAFETY: core is non-NULL
        let version = unsafe { (*core).v0.core_version };
        debug!("loaded by GBM core version {version}");
    }

    &BACKEND.0
}
