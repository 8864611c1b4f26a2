//! Segment program primitive
//!
//! The one place that drives erase and program cycles. Everything above
//! this hands over a complete image of what an erasable segment should
//! contain and lets this module figure out the cheapest way to get there:
//! skip the erase when no bit needs to go 0 → 1, and program only the
//! word pairs that actually differ. Both checks save erase cycles, which
//! is what bounds the device's lifetime.
//!
//! The watchdog is parked for the whole commit - an erase plus a full
//! reprogram can outlast the watchdog period.

use kairos_hal::flash::{InfoFlash, WordAddr, SEGMENT_WORDS};
use kairos_hal::watchdog::{Watchdog, WatchdogPause};

use crate::error::Error;

/// Erase policy for a segment commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EraseMode {
    /// Caller guarantees the destination can take the image as-is
    None,
    /// Erase only if some bit needs to go from 0 to 1
    IfNeeded,
    /// Erase unconditionally
    Force,
}

/// Commit a full segment image
///
/// `segment` must be a segment base. Not reentrant; callers never overlap
/// commits.
pub(crate) fn write_segment<F: InfoFlash, W: Watchdog>(
    flash: &mut F,
    watchdog: &mut W,
    segment: WordAddr,
    image: &[u16; SEGMENT_WORDS],
    mode: EraseMode,
) -> Result<(), Error> {
    let mut erase = mode == EraseMode::Force;

    if mode == EraseMode::IfNeeded {
        for (i, &word) in image.iter().enumerate() {
            let current = flash.read_word(segment.add_words(i as u16))?;
            // erase needed if the image has 1 bits the flash has already cleared
            if current | word != current {
                erase = true;
                break;
            }
        }
    }

    let _pause = WatchdogPause::new(watchdog);

    while flash.is_busy() {}

    if erase {
        flash.erase_segment(segment)?;
        while flash.is_busy() {}
    }

    // program pairwise, skipping pairs that already match
    let mut i = 0;
    while i < SEGMENT_WORDS {
        let addr = segment.add_words(i as u16);
        let current = [
            flash.read_word(addr)?,
            flash.read_word(addr.add_words(1))?,
        ];
        if current != [image[i], image[i + 1]] {
            flash.program_pair(addr, [image[i], image[i + 1]])?;
            while flash.is_busy() {}
        }
        i += 2;
    }

    Ok(())
}
