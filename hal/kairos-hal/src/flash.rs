//! Information-memory flash abstractions
//!
//! The information memory is a small span of flash separate from program
//! flash, made of a handful of segments that erase independently. The
//! trait here is the minimal surface the infomem allocator needs: word
//! reads, whole-segment erase, paired word programming, and a busy flag.
//!
//! NOR flash semantics apply throughout: programming can only clear bits
//! (1 → 0); only a segment erase sets bits back to 1.

/// Size of one erasable segment in bytes
pub const SEGMENT_BYTES: usize = 128;

/// Size of one erasable segment in 16-bit words
pub const SEGMENT_WORDS: usize = SEGMENT_BYTES / 2;

/// Number of segments in the information-memory window
pub const SEGMENT_COUNT: usize = 4;

/// Total window size in bytes
pub const WINDOW_BYTES: usize = SEGMENT_BYTES * SEGMENT_COUNT;

/// A word-granular flash address
///
/// Wraps an even byte address. All infomem addresses and counts are in
/// units of 16-bit words; this type keeps that contract explicit instead
/// of passing raw byte addresses around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WordAddr(u16);

impl WordAddr {
    /// Create from a byte address; `None` if the address is odd
    pub const fn from_byte(addr: u16) -> Option<Self> {
        if addr & 1 == 0 {
            Some(WordAddr(addr))
        } else {
            None
        }
    }

    /// The underlying byte address (always even)
    pub const fn byte(self) -> u16 {
        self.0
    }

    /// Address `words` 16-bit words forward
    pub const fn add_words(self, words: u16) -> Self {
        WordAddr(self.0 + words * 2)
    }

    /// Address offset by a signed number of words
    pub const fn offset(self, words: i32) -> Self {
        WordAddr((self.0 as i32 + words * 2) as u16)
    }

    /// Distance from `self` to `other` in words; `other` must not be lower
    pub const fn words_until(self, other: WordAddr) -> u16 {
        (other.0 - self.0) / 2
    }

    /// Base address of the erasable segment containing this word
    pub const fn segment_base(self) -> Self {
        WordAddr(self.0 & !(SEGMENT_BYTES as u16 - 1))
    }

    /// Whether this address starts an aligned pair (for block programming)
    pub const fn is_pair_aligned(self) -> bool {
        self.0 & 3 == 0
    }
}

/// Errors from the flash backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Address outside the information-memory window
    OutOfWindow,
    /// Address not aligned for the requested operation
    Misaligned,
    /// Controller busy with a previous erase/program cycle
    Busy,
}

/// Segmented information-memory flash
///
/// Implementations own a window of [`SEGMENT_COUNT`] physically adjacent
/// segments of [`SEGMENT_BYTES`] each, starting at [`base`](Self::base).
/// They are responsible for the controller-level details: unlocking
/// protected registers, issuing erase and block-write commands, and
/// re-locking afterwards. They are not responsible for deciding *whether*
/// to erase - the allocator's program primitive does that.
pub trait InfoFlash {
    /// First word of the information-memory window
    fn base(&self) -> WordAddr;

    /// Read one word; `addr` must be inside the window
    fn read_word(&mut self, addr: WordAddr) -> Result<u16, FlashError>;

    /// Erase the whole segment starting at `segment` (a segment base)
    ///
    /// After a successful erase every word of the segment reads as all
    /// ones.
    fn erase_segment(&mut self, segment: WordAddr) -> Result<(), FlashError>;

    /// Program two adjacent words in one write cycle
    ///
    /// `addr` must be pair-aligned and inside the window. Programming can
    /// only clear bits; callers that need bits set must erase first.
    fn program_pair(&mut self, addr: WordAddr, words: [u16; 2]) -> Result<(), FlashError>;

    /// Whether an erase or program cycle is still in flight
    fn is_busy(&self) -> bool;

    /// Last word address inside the window (inclusive)
    fn window_end(&self) -> WordAddr {
        self.base().add_words(WINDOW_BYTES as u16 / 2 - 1)
    }

    /// Whether `addr` falls inside the window
    fn contains(&self, addr: WordAddr) -> bool {
        addr >= self.base() && addr <= self.window_end()
    }
}
