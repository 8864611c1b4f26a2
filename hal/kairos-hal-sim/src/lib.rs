//! Simulated information-memory backend
//!
//! Implements the `kairos-hal` flash and watchdog traits over plain arrays
//! so the infomem allocator can be exercised on the host. The flash model
//! keeps real NOR semantics: erase sets a whole segment to all ones, and
//! programming ANDs the new data into the current contents, so code that
//! forgets to erase produces the same corruption it would on hardware.
//!
//! The model also counts erases per segment and pair programs in total,
//! which lets tests assert the wear-minimization behavior of the program
//! primitive (conditional erase, skip-unchanged pairs).

#![no_std]
#![deny(unsafe_code)]

use kairos_hal::flash::{
    FlashError, InfoFlash, WordAddr, SEGMENT_COUNT, SEGMENT_WORDS, WINDOW_BYTES,
};
use kairos_hal::watchdog::Watchdog;

/// Total words in the simulated window
pub const WINDOW_WORDS: usize = WINDOW_BYTES / 2;

/// In-memory NOR flash model
pub struct SimFlash {
    base: WordAddr,
    words: [u16; WINDOW_WORDS],
    erase_counts: [u32; SEGMENT_COUNT],
    program_count: u32,
}

impl SimFlash {
    /// Create a fully erased window starting at `base`
    ///
    /// `base` must itself be segment-aligned so segment masking stays
    /// inside the window.
    pub fn erased(base: WordAddr) -> Self {
        debug_assert_eq!(base, base.segment_base());
        Self {
            base,
            words: [0xFFFF; WINDOW_WORDS],
            erase_counts: [0; SEGMENT_COUNT],
            program_count: 0,
        }
    }

    /// Word index into the backing array
    fn index(&self, addr: WordAddr) -> Result<usize, FlashError> {
        if !self.contains(addr) {
            return Err(FlashError::OutOfWindow);
        }
        Ok(self.base.words_until(addr) as usize)
    }

    /// Bypass programming rules and set a word directly
    ///
    /// For tests that need to fabricate corrupt or foreign structures.
    pub fn poke(&mut self, addr: WordAddr, value: u16) {
        let i = self.base.words_until(addr) as usize;
        self.words[i] = value;
    }

    /// Read a word without going through the trait
    pub fn peek(&self, addr: WordAddr) -> u16 {
        let i = self.base.words_until(addr) as usize;
        self.words[i]
    }

    /// Erase cycles performed on the segment containing `addr`
    pub fn erases(&self, addr: WordAddr) -> u32 {
        let seg = self.base.words_until(addr.segment_base()) as usize / SEGMENT_WORDS;
        self.erase_counts[seg]
    }

    /// Total erase cycles across all segments
    pub fn total_erases(&self) -> u32 {
        self.erase_counts.iter().sum()
    }

    /// Total pair-program operations
    pub fn programs(&self) -> u32 {
        self.program_count
    }

    /// Reset the wear counters
    pub fn reset_counters(&mut self) {
        self.erase_counts = [0; SEGMENT_COUNT];
        self.program_count = 0;
    }
}

impl InfoFlash for SimFlash {
    fn base(&self) -> WordAddr {
        self.base
    }

    fn read_word(&mut self, addr: WordAddr) -> Result<u16, FlashError> {
        let i = self.index(addr)?;
        Ok(self.words[i])
    }

    fn erase_segment(&mut self, segment: WordAddr) -> Result<(), FlashError> {
        if segment != segment.segment_base() {
            return Err(FlashError::Misaligned);
        }
        let i = self.index(segment)?;
        self.words[i..i + SEGMENT_WORDS].fill(0xFFFF);
        self.erase_counts[i / SEGMENT_WORDS] += 1;
        Ok(())
    }

    fn program_pair(&mut self, addr: WordAddr, words: [u16; 2]) -> Result<(), FlashError> {
        if !addr.is_pair_aligned() {
            return Err(FlashError::Misaligned);
        }
        let i = self.index(addr)?;
        if i + 1 >= WINDOW_WORDS {
            return Err(FlashError::OutOfWindow);
        }
        // NOR programming can only clear bits
        self.words[i] &= words[0];
        self.words[i + 1] &= words[1];
        self.program_count += 1;
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }
}

/// Watchdog model that records hold/resume balance
#[derive(Debug, Default)]
pub struct SimWatchdog {
    holds: u32,
    resumes: u32,
}

impl SimWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every hold has been matched by a resume
    pub fn balanced(&self) -> bool {
        self.holds == self.resumes
    }

    pub fn holds(&self) -> u32 {
        self.holds
    }
}

impl Watchdog for SimWatchdog {
    fn hold(&mut self) {
        self.holds += 1;
    }

    fn resume(&mut self) {
        self.resumes += 1;
    }
}
