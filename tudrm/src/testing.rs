// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! A fake kernel for tests.

use crate::backends::dumb::{Card, DumbBuffer};
use crate::types::{Error, Mapping, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::{num, ptr};

#[derive(Default)]
struct State {
    next_handle: u32,
    buffers: HashMap<u32, Vec<u8>>,
    destroyed: Vec<u32>,
    created: usize,
    mapped: usize,
    prime: HashMap<RawFd, u32>,
}

/// Simulates dumb buffers in heap memory.
#[derive(Default)]
pub struct FakeCard {
    state: RefCell<State>,
    fail_create: Cell<bool>,
    fail_map: Cell<bool>,
    fail_prime: Cell<bool>,
}

impl FakeCard {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.set(fail);
    }

    pub fn fail_map(&self, fail: bool) {
        self.fail_map.set(fail);
    }

    pub fn fail_prime(&self, fail: bool) {
        self.fail_prime.set(fail);
    }

    /// Returns the number of dumb buffers ever created.
    pub fn created(&self) -> usize {
        self.state.borrow().created
    }

    /// Returns the handles of dumb buffers that are not destroyed, sorted.
    pub fn live(&self) -> Vec<u32> {
        let mut live: Vec<u32> = self.state.borrow().buffers.keys().copied().collect();
        live.sort_unstable();
        live
    }

    pub fn destroyed(&self) -> Vec<u32> {
        self.state.borrow().destroyed.clone()
    }

    /// Returns the number of live mappings.
    pub fn mapped(&self) -> usize {
        self.state.borrow().mapped
    }

    pub fn contents(&self, handle: u32) -> Vec<u8> {
        self.state.borrow().buffers[&handle].clone()
    }

    /// Returns the number of distinct dma-bufs imported.
    pub fn imported(&self) -> usize {
        self.state.borrow().prime.len()
    }
}

impl Card for FakeCard {
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer> {
        if self.fail_create.get() {
            return Err(Error::Device);
        }

        let pitch = (width * bpp / 8).next_multiple_of(64);
        let size = pitch as u64 * height as u64;

        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.buffers.insert(handle, vec![0; size as usize]);
        state.created += 1;

        Ok(DumbBuffer {
            handle,
            pitch,
            size,
        })
    }

    fn map_dumb(&self, buf: &DumbBuffer) -> Result<Mapping> {
        if self.fail_map.get() {
            return Err(Error::Device);
        }

        let mut state = self.state.borrow_mut();
        let storage = state.buffers.get_mut(&buf.handle).ok_or(Error::User)?;
        let ptr = ptr::NonNull::new(storage.as_mut_ptr().cast()).ok_or(Error::Device)?;
        let len = num::NonZeroUsize::new(storage.len()).ok_or(Error::User)?;
        state.mapped += 1;

        Ok(Mapping { ptr, len })
    }

    fn unmap_dumb(&self, _mapping: Mapping) {
        self.state.borrow_mut().mapped -= 1;
    }

    fn destroy_dumb(&self, handle: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.buffers.remove(&handle).ok_or(Error::User)?;
        state.destroyed.push(handle);

        Ok(())
    }

    fn prime_fd_to_handle(&self, dmabuf: BorrowedFd) -> Result<u32> {
        if self.fail_prime.get() {
            return Err(Error::Device);
        }

        let mut state = self.state.borrow_mut();
        let next = 0x1000 + state.prime.len() as u32;
        let handle = *state.prime.entry(dmabuf.as_raw_fd()).or_insert(next);

        Ok(handle)
    }

    fn driver_name(&self) -> Option<String> {
        Some(String::from("fake"))
    }
}
