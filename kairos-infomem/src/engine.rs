//! Combined delete/insert/patch rewrite engine
//!
//! The single primitive beneath every mutating operation. One call
//! deletes `del_words` at `start`, inserts `ins_words` of `source` in
//! their place (shifting everything up to `free_stop` by the difference),
//! and folds an arbitrary set of scattered single-word patches into the
//! same pass. Folding matters twice over: writing the directory header in
//! a separate pass would double the erase-cycle cost of every edit, and a
//! power loss between the two passes would leave the header disagreeing
//! with the record chain.
//!
//! Each affected erasable segment is rebuilt as a full in-memory image
//! and committed once. Growing edits walk segments from the highest
//! address down, shrinking edits from the lowest up, so a segment's
//! source words are always read before the segment they live in is
//! rewritten.

use kairos_hal::flash::{InfoFlash, WordAddr, SEGMENT_WORDS};
use kairos_hal::watchdog::Watchdog;

use crate::error::Error;
use crate::layout::ERASED_WORD;
use crate::program::{write_segment, EraseMode};

/// A single-word overwrite folded into the rewrite pass
///
/// `addr` names the word's position AFTER the shift. Patch lists must be
/// strictly ascending and must stay below `free_start + ins - del`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Patch {
    pub addr: WordAddr,
    pub value: u16,
}

/// Where inserted words come from
pub(crate) enum Source<'a> {
    /// Fill the inserted span with erased words
    Erased,
    /// Plain payload words
    Words(&'a [u16]),
    /// A record header word followed by its payload
    ///
    /// Used when appending a new record, so the header lands in the same
    /// segment commit as the data without a staging copy.
    Tagged { header: u16, words: &'a [u16] },
}

impl Source<'_> {
    fn word(&self, idx: usize) -> u16 {
        match self {
            Source::Erased => ERASED_WORD,
            Source::Words(words) => words[idx],
            Source::Tagged { header, words } => {
                if idx == 0 {
                    *header
                } else {
                    words[idx - 1]
                }
            }
        }
    }
}

/// Rewrite a word range in place
///
/// - deletes `del_words` at `start`, inserts `ins_words` of `source`
/// - everything between the insert and `free_stop` shifts by the
///   difference; words at and beyond `free_stop` are preserved bit-exact
/// - words between the new logical end (`free_start + ins - del`) and
///   `free_stop` are left erased
/// - `free_start` is the first word past the meaningful data BEFORE the
///   edit
pub(crate) fn insert_delete_modify<F: InfoFlash, W: Watchdog>(
    flash: &mut F,
    watchdog: &mut W,
    start: WordAddr,
    source: Source<'_>,
    del_words: u16,
    ins_words: u16,
    patches: &[Patch],
    free_start: WordAddr,
    free_stop: WordAddr,
) -> Result<(), Error> {
    let more = ins_words as i32 - del_words as i32;

    if del_words == 0 && ins_words == 0 && patches.is_empty() {
        return Ok(());
    }

    // first and last erasable segments touched by the shift or a patch
    let seg_first = match patches.first() {
        Some(p) if p.addr < start => p.addr.segment_base(),
        _ => start.segment_base(),
    };
    let seg_last = if more == 0 {
        let ins_end = start.add_words(ins_words);
        match patches.last() {
            Some(p) if p.addr >= ins_end => p.addr.segment_base(),
            _ => start.offset(ins_words as i32 - 1).segment_base(),
        }
    } else if more > 0 {
        free_start.offset(more - 1).segment_base()
    } else {
        free_start.offset(-1).segment_base()
    };

    // first word past the data that remains meaningful after the edit
    let new_end = free_start.offset(more);
    let ins_end = start.add_words(ins_words);

    let mut image = [ERASED_WORD; SEGMENT_WORDS];

    if more > 0 {
        // growing: walk segments high to low, consume patches from the end
        let mut next_patch = patches.len();
        let mut seg = seg_last;
        loop {
            for i in (0..SEGMENT_WORDS).rev() {
                let a = seg.add_words(i as u16);
                image[i] = if a >= free_stop {
                    flash.read_word(a)?
                } else if next_patch > 0 && a == patches[next_patch - 1].addr {
                    next_patch -= 1;
                    patches[next_patch].value
                } else if a >= new_end {
                    ERASED_WORD
                } else if a < start {
                    flash.read_word(a)?
                } else if a >= ins_end {
                    flash.read_word(a.offset(-more))?
                } else {
                    source.word(start.words_until(a) as usize)
                };
            }
            write_segment(flash, watchdog, seg, &image, EraseMode::IfNeeded)?;
            if seg == seg_first {
                break;
            }
            seg = seg.offset(-(SEGMENT_WORDS as i32));
        }
    } else {
        // shrinking or in-place: walk low to high, consume patches in order
        let mut next_patch = 0;
        let mut seg = seg_first;
        loop {
            for i in 0..SEGMENT_WORDS {
                let a = seg.add_words(i as u16);
                image[i] = if a >= free_stop {
                    flash.read_word(a)?
                } else if next_patch < patches.len() && a == patches[next_patch].addr {
                    next_patch += 1;
                    patches[next_patch - 1].value
                } else if a >= new_end {
                    ERASED_WORD
                } else if a < start {
                    flash.read_word(a)?
                } else if a >= ins_end {
                    flash.read_word(a.offset(-more))?
                } else {
                    source.word(start.words_until(a) as usize)
                };
            }
            write_segment(flash, watchdog, seg, &image, EraseMode::IfNeeded)?;
            if seg == seg_last {
                break;
            }
            seg = seg.add_words(SEGMENT_WORDS as u16);
        }
    }

    Ok(())
}
