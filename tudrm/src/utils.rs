// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::types::{Mapping, Result, Size};
use nix::sys;
use std::num;
use std::os::fd::AsFd;

/// Maps `size` bytes of `fd` at `offset` for shared read-write access.
pub fn mmap(fd: impl AsFd, size: Size, offset: u64) -> Result<Mapping> {
    let prot = sys::mman::ProtFlags::PROT_READ | sys::mman::ProtFlags::PROT_WRITE;
    let flags = sys::mman::MapFlags::MAP_SHARED;

    let len = num::NonZeroUsize::try_from(usize::try_from(size)?)?;
    let offset = nix::libc::off_t::try_from(offset)?;
    let ptr =
        // SAFETY: clients assume the responsibility
        unsafe { sys::mman::mmap(None, len, prot, flags, fd, offset) }?;
    let mapping = Mapping { ptr, len };

    Ok(mapping)
}

pub fn munmap(mapping: Mapping) -> Result<()> {
    // SAFETY: ptr and len are from sys::mman::mmap
    unsafe { sys::mman::munmap(mapping.ptr, mapping.len.into()) }?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn mmap_zero_size() {
        let null = File::open("/dev/null").unwrap();

        assert!(mmap(&null, 0, 0).is_err());
    }
}
