use tracing::debug;

use crate::{CoreError, Result};

/// Absolute address of flash offset 0.
pub const ORIGIN: u32 = 0x4000_0000;
pub const FLASH_SIZE: usize = 4 * 1024 * 1024;
pub const RAM_SIZE: usize = 520 * 1024;

/// Flash and SRAM backing stores.
///
/// RAM is allocated for capacity realism only; no instruction reads or
/// writes it.
#[derive(Clone)]
pub struct MemoryImage {
    flash: Vec<u8>,
    ram: Vec<u8>,
    loaded_len: usize,
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryImage {
    pub fn new() -> Self {
        Self {
            flash: vec![0; FLASH_SIZE],
            ram: vec![0; RAM_SIZE],
            loaded_len: 0,
        }
    }

    pub fn flash_len(&self) -> usize {
        self.flash.len()
    }

    pub fn ram_len(&self) -> usize {
        self.ram.len()
    }

    /// Length of the image written by the last successful load.
    pub fn loaded_len(&self) -> usize {
        self.loaded_len
    }

    /// Copy `blob` to flash offset 0, clearing whatever the previous image
    /// occupied. Oversized images are rejected before anything is written.
    pub fn load_flash(&mut self, blob: &[u8]) -> Result<()> {
        if blob.len() > self.flash.len() {
            return Err(CoreError::CapacityExceeded {
                len: blob.len(),
                capacity: self.flash.len(),
            });
        }
        self.flash[..self.loaded_len].fill(0);
        self.flash[..blob.len()].copy_from_slice(blob);
        self.loaded_len = blob.len();
        debug!(bytes = blob.len(), "flash image loaded");
        Ok(())
    }

    pub fn read_flash(&self, offset: usize) -> Option<u8> {
        self.flash.get(offset).copied()
    }

    /// Up to `len` bytes starting at `offset`, shortened at the end of flash.
    pub fn flash_window(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.flash.len());
        let end = offset.saturating_add(len).min(self.flash.len());
        &self.flash[start..end]
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }
}

/// Translate an absolute program counter into a flash offset.
///
/// Addresses below the origin map to `None` and are treated as out of range.
pub fn flash_offset(pc: u32) -> Option<usize> {
    pc.checked_sub(ORIGIN).map(|offset| offset as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_clears_bytes_of_previous_image() {
        let mut mem = MemoryImage::new();
        mem.load_flash(&[1, 2, 3, 4]).unwrap();
        mem.load_flash(&[9]).unwrap();
        assert_eq!(mem.flash_window(0, 4), &[9, 0, 0, 0]);
        assert_eq!(mem.loaded_len(), 1);
    }

    #[test]
    fn oversized_image_leaves_flash_untouched() {
        let mut mem = MemoryImage::new();
        mem.load_flash(&[7, 7]).unwrap();
        let blob = vec![1u8; FLASH_SIZE + 1];
        let err = mem.load_flash(&blob).unwrap_err();
        assert!(matches!(
            err,
            CoreError::CapacityExceeded {
                len,
                capacity: FLASH_SIZE
            } if len == FLASH_SIZE + 1
        ));
        assert_eq!(mem.flash_window(0, 3), &[7, 7, 0]);
    }

    #[test]
    fn window_is_clamped_at_end_of_flash() {
        let mem = MemoryImage::new();
        assert_eq!(mem.flash_window(FLASH_SIZE - 1, 4).len(), 1);
        assert!(mem.flash_window(FLASH_SIZE + 10, 4).is_empty());
        assert_eq!(flash_offset(ORIGIN + 5), Some(5));
        assert_eq!(flash_offset(ORIGIN - 1), None);
    }
}
