//! Typed record storage
//!
//! Applications mostly keep one small settings struct in their record.
//! This layer postcard-serializes a serde value into a record and back,
//! so callers never deal with the word packing themselves.
//!
//! Record shape: one word holding the serialized byte length, then the
//! bytes packed little-endian two to a word, an odd final byte padded
//! with `0xFF`.

use heapless::Vec;
use kairos_hal::flash::InfoFlash;
use kairos_hal::watchdog::Watchdog;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::layout::MAX_PAYLOAD_WORDS;
use crate::store::Infomem;

/// Largest serialized value a full-window record can hold
pub const MAX_VALUE_BYTES: usize = 2 * (MAX_PAYLOAD_WORDS - 1);

/// Serialize `value` into `tag`'s record, replacing any previous content
///
/// Returns the new total directory size in words.
pub fn store_value<F, W, T>(mem: &mut Infomem<F, W>, tag: u8, value: &T) -> Result<u8, Error>
where
    F: InfoFlash,
    W: Watchdog,
    T: Serialize,
{
    let mut bytes = [0u8; MAX_VALUE_BYTES];
    let used = postcard::to_slice(value, &mut bytes)
        .map_err(|_| Error::NoSpace)?
        .len();

    let mut words: Vec<u16, MAX_PAYLOAD_WORDS> = Vec::new();
    words.push(used as u16).map_err(|_| Error::NoSpace)?;
    let mut i = 0;
    while i < used {
        let lo = bytes[i];
        let hi = if i + 1 < used { bytes[i + 1] } else { 0xFF };
        words
            .push(u16::from_le_bytes([lo, hi]))
            .map_err(|_| Error::NoSpace)?;
        i += 2;
    }

    mem.app_replace(tag, &words)
}

/// Deserialize `tag`'s record back into a value
///
/// `None` if the tag is absent. A record whose word count disagrees with
/// its length prefix is reported as [`Error::ValueLayout`] rather than
/// decoded on a guess.
pub fn fetch_value<F, W, T>(mem: &mut Infomem<F, W>, tag: u8) -> Result<Option<T>, Error>
where
    F: InfoFlash,
    W: Watchdog,
    T: DeserializeOwned,
{
    let mut words = [0u16; MAX_PAYLOAD_WORDS];
    let read = mem.app_read(tag, &mut words, 0)? as usize;
    if read == 0 {
        return Ok(None);
    }

    let byte_len = words[0] as usize;
    if byte_len > MAX_VALUE_BYTES {
        return Err(Error::ValueLayout);
    }
    let expected_words = 1 + byte_len.div_ceil(2);
    if expected_words != read {
        return Err(Error::ValueLayout);
    }

    let mut bytes = [0u8; MAX_VALUE_BYTES];
    for (i, byte) in bytes[..byte_len].iter_mut().enumerate() {
        let word = words[1 + i / 2].to_le_bytes();
        *byte = word[i % 2];
    }

    postcard::from_bytes(&bytes[..byte_len])
        .map(Some)
        .map_err(|_| Error::ValueEncoding)
}
