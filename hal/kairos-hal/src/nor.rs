//! Adapter from `embedded-storage` NOR flash drivers to [`InfoFlash`]
//!
//! Lets the allocator run on any [`NorFlash`] implementation whose erase
//! granule matches the infomem segment size, e.g. chips whose information
//! flash erases in 128-byte units. Drivers with larger granules cannot be
//! bridged; the constructor rejects them at runtime since the associated
//! constants cannot be checked generically at compile time.

use embedded_storage::nor_flash::NorFlash;

use crate::flash::{FlashError, InfoFlash, WordAddr, SEGMENT_BYTES, WINDOW_BYTES};

/// A four-segment infomem window over a `NorFlash` driver
///
/// `base` is the byte address the window is exposed at; `offset` is where
/// the window starts inside the driver's own address space.
pub struct NorWindow<T: NorFlash> {
    inner: T,
    base: WordAddr,
    offset: u32,
}

impl<T: NorFlash> NorWindow<T> {
    /// Wrap a driver; `None` if its geometry does not fit the infomem
    /// contract or the window does not fit the device
    pub fn new(inner: T, base: WordAddr, offset: u32) -> Option<Self> {
        if T::ERASE_SIZE != SEGMENT_BYTES || T::WRITE_SIZE > 4 || T::READ_SIZE > 2 {
            return None;
        }
        if offset as usize + WINDOW_BYTES > inner.capacity() {
            return None;
        }
        Some(Self {
            inner,
            base,
            offset,
        })
    }

    /// Recover the wrapped driver
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn device_addr(&self, addr: WordAddr) -> Result<u32, FlashError> {
        if !self.contains(addr) {
            return Err(FlashError::OutOfWindow);
        }
        Ok(self.offset + (addr.byte() - self.base.byte()) as u32)
    }
}

impl<T: NorFlash> InfoFlash for NorWindow<T> {
    fn base(&self) -> WordAddr {
        self.base
    }

    fn read_word(&mut self, addr: WordAddr) -> Result<u16, FlashError> {
        let dev = self.device_addr(addr)?;
        let mut bytes = [0u8; 2];
        self.inner
            .read(dev, &mut bytes)
            .map_err(|_| FlashError::OutOfWindow)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn erase_segment(&mut self, segment: WordAddr) -> Result<(), FlashError> {
        if segment != segment.segment_base() {
            return Err(FlashError::Misaligned);
        }
        let dev = self.device_addr(segment)?;
        self.inner
            .erase(dev, dev + SEGMENT_BYTES as u32)
            .map_err(|_| FlashError::OutOfWindow)
    }

    fn program_pair(&mut self, addr: WordAddr, words: [u16; 2]) -> Result<(), FlashError> {
        if !addr.is_pair_aligned() {
            return Err(FlashError::Misaligned);
        }
        let dev = self.device_addr(addr)?;
        let mut bytes = [0u8; 4];
        bytes[..2].copy_from_slice(&words[0].to_le_bytes());
        bytes[2..].copy_from_slice(&words[1].to_le_bytes());
        self.inner
            .write(dev, &bytes)
            .map_err(|_| FlashError::OutOfWindow)
    }

    fn is_busy(&self) -> bool {
        // NorFlash drivers block until the cycle completes
        false
    }
}
