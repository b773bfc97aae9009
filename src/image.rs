//! Bounded view over a framebuffer kext mapped in memory.

use std::slice;

use crate::error::{Error, Result};

/// A loaded kext image: its virtual base address and the bytes mapped there.
///
/// Every access is checked against the image length, so a bad offset becomes an [`Error`]
/// instead of a stray write into kernel memory.
#[derive(Debug)]
pub struct KextImage<'a> {
    base: u64,
    bytes: &'a mut [u8],
}

impl<'a> KextImage<'a> {
    pub fn new(base: u64, bytes: &'a mut [u8]) -> Self {
        Self { base, bytes }
    }

    /// Views `size` bytes of already mapped memory at `address` as a kext image.
    ///
    /// # Safety
    /// `address..address + size` must be mapped, writable, and not accessed through any other
    /// reference for the lifetime `'a`. The host's loader owns that guarantee.
    pub unsafe fn from_raw(address: u64, size: usize) -> Self {
        let bytes = unsafe { slice::from_raw_parts_mut(address as usize as *mut u8, size) };
        Self::new(address, bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Translates a virtual address into an offset from the image base, if it lies inside.
    pub fn offset_of(&self, address: u64) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        (offset < self.bytes.len()).then_some(offset)
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(Error::TargetOutOfBounds {
                offset,
                size: self.bytes.len(),
            })
    }

    /// Overwrites a single byte. No compare-and-swap here: callers gate writes themselves.
    pub fn write_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        let size = self.bytes.len();
        let byte = self
            .bytes
            .get_mut(offset)
            .ok_or(Error::TargetOutOfBounds { offset, size })?;
        *byte = value;
        Ok(())
    }

    /// Up to `len` bytes starting at `offset`, truncated at the end of the image.
    pub fn peek(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.bytes.len());
        let end = offset.saturating_add(len).min(self.bytes.len());
        &self.bytes[start..end]
    }
}
