//! On-media layout of the infomem directory
//!
//! The directory occupies a contiguous run of words inside the
//! four-segment window:
//!
//! ```text
//! word 0    identifier sentinel (0x5A74)
//! word 1    low byte: currentSize, high byte: maxSize (payload words)
//! word 2..  records, packed: each 1 tag byte + 1 length byte, then
//!           `length` payload words
//! word 2+currentSize
//!           terminator sentinel (0xDAF4)
//! ```
//!
//! This layout is the upgrade-in-place contract; it must stay
//! bit-compatible across firmware versions. Words are little-endian.

use kairos_hal::flash::WINDOW_BYTES;

/// Sentinel marking the first word of the directory
pub const IDENTIFIER: u16 = 0x5A74;

/// Sentinel written immediately after the payload area
pub const TERMINATOR: u16 = 0xDAF4;

/// Value of a virgin or reclaimed flash word
pub const ERASED_WORD: u16 = 0xFFFF;

/// Fixed directory overhead: identifier, size pair, terminator
pub const OVERHEAD_WORDS: u16 = 3;

/// Smallest region `init` accepts, in words
pub const MIN_REGION_WORDS: u16 = 10;

/// Largest payload a full-window directory can hold, in words
pub const MAX_PAYLOAD_WORDS: usize = (WINDOW_BYTES - 6) / 2;

/// Pack the size word: `currentSize` in the low byte, `maxSize` high
pub const fn pack_sizes(current: u8, max: u8) -> u16 {
    current as u16 | (max as u16) << 8
}

/// Split the size word back into `(currentSize, maxSize)`
pub const fn unpack_sizes(word: u16) -> (u8, u8) {
    (word as u8, (word >> 8) as u8)
}

/// Pack a record header: tag in the low byte, length-in-words high
pub const fn pack_record(tag: u8, len: u8) -> u16 {
    tag as u16 | (len as u16) << 8
}

/// Tag byte of a record header word
pub const fn record_tag(word: u16) -> u8 {
    word as u8
}

/// Length-in-words byte of a record header word
pub const fn record_len(word: u16) -> u8 {
    (word >> 8) as u8
}
