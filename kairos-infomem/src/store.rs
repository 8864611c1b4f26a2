//! The infomem store: directory scan, readiness, and record operations
//!
//! One instance owns the flash backend and the watchdog. All mutating
//! operations serialize through a non-blocking write lock; a caller that
//! hits [`Error::Locked`] is expected to retry on a later main-loop pass,
//! never to spin.

use core::sync::atomic::{AtomicBool, Ordering};

use kairos_hal::flash::{InfoFlash, WordAddr, WINDOW_BYTES};
use kairos_hal::watchdog::Watchdog;

use crate::engine::{insert_delete_modify, Patch, Source};
use crate::error::Error;
use crate::layout::{
    pack_record, pack_sizes, record_len, record_tag, unpack_sizes, ERASED_WORD, IDENTIFIER,
    MIN_REGION_WORDS, OVERHEAD_WORDS, TERMINATOR,
};

/// Cached directory state, valid only after a successful readiness check
#[derive(Debug, Clone, Copy)]
struct Dir {
    start: WordAddr,
    size: u8,
    maxsize: u8,
}

impl Dir {
    /// First payload word
    fn data_start(&self) -> WordAddr {
        self.start.add_words(2)
    }

    /// First word past the meaningful payload
    fn free_start(&self) -> WordAddr {
        self.start.add_words(3 + self.size as u16)
    }

    /// First word past the reserved payload area
    fn free_stop(&self) -> WordAddr {
        self.start.add_words(3 + self.maxsize as u16)
    }
}

/// Non-blocking write lock, released on every exit path
struct WriteLock<'a> {
    flag: &'a AtomicBool,
}

impl<'a> WriteLock<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for WriteLock<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Flash-backed record store over the information-memory window
///
/// Records are byte-string runs identified by a one-byte tag. Tags are
/// unique by construction: the append path re-checks presence under the
/// lock, so this API cannot create duplicates. Should foreign code leave a
/// duplicate on media, the first record in chain order wins consistently.
///
/// Read operations also respect the write lock rather than returning
/// partially shifted data; reads racing a mutation from interrupt context
/// get [`Error::Locked`] like everyone else.
pub struct Infomem<F, W> {
    flash: F,
    watchdog: W,
    dir: Option<Dir>,
    hint: Option<WordAddr>,
    locked: AtomicBool,
}

impl<F: InfoFlash, W: Watchdog> Infomem<F, W> {
    /// Create a store over a backend; call [`ready`](Self::ready) (or
    /// [`init`](Self::init) on fresh flash) before anything else
    pub fn new(flash: F, watchdog: W) -> Self {
        Self {
            flash,
            watchdog,
            dir: None,
            hint: None,
            // locked until a readiness check or init succeeds
            locked: AtomicBool::new(true),
        }
    }

    /// Borrow the backend for low-level access
    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Consume the store and return the backend and watchdog
    pub fn into_parts(self) -> (F, W) {
        (self.flash, self.watchdog)
    }

    /// First byte address past the window (exclusive)
    fn window_end_byte(&self) -> u16 {
        self.flash.base().byte() + WINDOW_BYTES as u16
    }

    /// Check that the directory is present and structurally sound
    ///
    /// Returns the payload size in words. The result is cached on success
    /// only, so every failure is re-checked on the next call. A cached
    /// success also releases the write lock for mutation.
    pub fn ready(&mut self) -> Result<u8, Error> {
        if let Some(dir) = self.dir {
            return Ok(dir.size);
        }

        let window_end = self.window_end_byte();

        // a previously known start is trusted if the identifier is still there
        let mut start = None;
        if let Some(hint) = self.hint {
            if self.flash.contains(hint) && self.flash.read_word(hint)? == IDENTIFIER {
                start = Some(hint);
            } else {
                self.hint = None;
            }
        }

        // otherwise scan every word of the window
        if start.is_none() {
            let mut addr = self.flash.base();
            while addr.byte() < window_end {
                if self.flash.read_word(addr)? == IDENTIFIER {
                    start = Some(addr);
                    break;
                }
                addr = addr.add_words(1);
            }
        }

        let start = start.ok_or(Error::NotPresent)?;
        self.hint = Some(start);

        // a stray sentinel near the window end leaves no room for even the
        // fixed overhead; reject it before reading past the window
        let remaining = (window_end - start.byte()) / 2;
        if remaining < OVERHEAD_WORDS {
            return Err(Error::SizeFields);
        }
        let (size, maxsize) = unpack_sizes(self.flash.read_word(start.add_words(1))?);
        if size > maxsize || maxsize as u16 > remaining - OVERHEAD_WORDS {
            return Err(Error::SizeFields);
        }

        // the record chain must land exactly on the payload end
        let data_start = start.add_words(2);
        let data_end = data_start.add_words(size as u16);
        let mut addr = data_start;
        while addr < data_end {
            let len = record_len(self.flash.read_word(addr)?);
            addr = addr.add_words(len as u16 + 1);
        }
        if addr != data_end {
            return Err(Error::ChainMismatch);
        }

        if self.flash.read_word(data_end)? != TERMINATOR {
            return Err(Error::TerminatorMissing);
        }

        self.dir = Some(Dir {
            start,
            size,
            maxsize,
        });
        self.locked.store(false, Ordering::Release);
        Ok(size)
    }

    /// Create a fresh directory over `[start, end)` (byte addresses)
    ///
    /// The region must be fully erased; `end` is the first byte NOT used.
    /// Returns the new `maxSize` in words.
    pub fn init(&mut self, start: u16, end: u16) -> Result<u8, Error> {
        if self.dir.is_some() {
            return Err(Error::AlreadyPresent);
        }

        let (start, end) = match (WordAddr::from_byte(start), WordAddr::from_byte(end)) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(Error::Misaligned),
        };
        if end < start || start < self.flash.base() || end.byte() > self.window_end_byte() {
            return Err(Error::OutOfRange);
        }
        let numwords = start.words_until(end);
        if numwords < MIN_REGION_WORDS {
            return Err(Error::RegionTooSmall);
        }

        let mut addr = start;
        while addr < end {
            if self.flash.read_word(addr)? != ERASED_WORD {
                return Err(Error::NotErased);
            }
            addr = addr.add_words(1);
        }

        let maxsize = (numwords - OVERHEAD_WORDS) as u8;
        let header = [IDENTIFIER, pack_sizes(0, maxsize), TERMINATOR];
        insert_delete_modify(
            &mut self.flash,
            &mut self.watchdog,
            start,
            Source::Words(&header),
            3,
            3,
            &[],
            start.add_words(3),
            start.add_words(3 + maxsize as u16),
        )?;

        self.dir = Some(Dir {
            start,
            size: 0,
            maxsize,
        });
        self.hint = Some(start);
        self.locked.store(false, Ordering::Release);
        Ok(maxsize)
    }

    /// Free payload space in words (`maxSize − currentSize`)
    ///
    /// Unlike the record operations this re-checks readiness itself, so it
    /// doubles as a cheap "is the store usable" probe.
    pub fn space(&mut self) -> Result<u8, Error> {
        if self.dir.is_none() {
            self.ready()?;
        }
        let dir = self.dir.ok_or(Error::NotReady)?;
        if self.locked.load(Ordering::Acquire) {
            return Err(Error::Locked);
        }
        Ok(dir.maxsize - dir.size)
    }

    /// Move and/or resize the directory window to `[start, end)`
    ///
    /// Pure resize when `start` is unchanged, otherwise the whole
    /// structure shifts; the size header is patched in the same pass as
    /// the shift. Returns the new `maxSize`.
    pub fn relocate(&mut self, start: u16, end: u16) -> Result<u8, Error> {
        let (start, end) = match (WordAddr::from_byte(start), WordAddr::from_byte(end)) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(Error::Misaligned),
        };
        let dir = self.dir.ok_or(Error::NotReady)?;
        if end < start || start < self.flash.base() || end.byte() > self.window_end_byte() {
            return Err(Error::OutOfRange);
        }
        if start.words_until(end) < dir.size as u16 + OVERHEAD_WORDS {
            return Err(Error::RegionTooSmall);
        }
        let _guard = WriteLock::try_acquire(&self.locked).ok_or(Error::Locked)?;

        let old_end = dir.start.add_words(dir.maxsize as u16 + OVERHEAD_WORDS);
        let new_maxsize = (start.words_until(end) - OVERHEAD_WORDS) as u8;
        let size_word = pack_sizes(dir.size, new_maxsize);
        let size_addr = start.add_words(1);

        if start == dir.start {
            // no move, just rewrite the size word
            insert_delete_modify(
                &mut self.flash,
                &mut self.watchdog,
                size_addr,
                Source::Words(&[size_word]),
                1,
                1,
                &[],
                dir.free_start(),
                dir.free_stop(),
            )?;
        } else if start < dir.start {
            // left shift: delete the words in front of the structure
            let shift = start.words_until(dir.start);
            insert_delete_modify(
                &mut self.flash,
                &mut self.watchdog,
                start,
                Source::Erased,
                shift,
                0,
                &[Patch {
                    addr: size_addr,
                    value: size_word,
                }],
                dir.free_start(),
                old_end,
            )?;
        } else {
            // right shift: insert erased words in front of the structure
            let shift = dir.start.words_until(start);
            insert_delete_modify(
                &mut self.flash,
                &mut self.watchdog,
                dir.start,
                Source::Erased,
                0,
                shift,
                &[Patch {
                    addr: size_addr,
                    value: size_word,
                }],
                dir.free_start(),
                start.add_words(OVERHEAD_WORDS + new_maxsize as u16),
            )?;
        }

        self.dir = Some(Dir {
            start,
            size: dir.size,
            maxsize: new_maxsize,
        });
        self.hint = Some(start);
        Ok(new_maxsize)
    }

    /// Erase the whole reserved span back to filler and forget the
    /// directory
    pub fn delete_all(&mut self) -> Result<(), Error> {
        let dir = self.dir.ok_or(Error::NotReady)?;
        let _guard = WriteLock::try_acquire(&self.locked).ok_or(Error::Locked)?;

        let span = dir.maxsize as u16 + OVERHEAD_WORDS;
        insert_delete_modify(
            &mut self.flash,
            &mut self.watchdog,
            dir.start,
            Source::Erased,
            span,
            span,
            &[],
            dir.free_start(),
            dir.free_stop(),
        )?;

        self.dir = None;
        self.hint = None;
        Ok(())
    }

    /// Stored length of `tag`'s record in words, 0 if absent
    pub fn app_amount(&mut self, tag: u8) -> Result<u8, Error> {
        let dir = self.dir.ok_or(Error::NotReady)?;
        if self.locked.load(Ordering::Acquire) {
            return Err(Error::Locked);
        }
        match find_record(&mut self.flash, &dir, tag)? {
            Some((_, len)) => Ok(len),
            None => Ok(0),
        }
    }

    /// Copy `tag`'s payload into `dest`, starting `offset` words in
    ///
    /// Copies at most `dest.len()` words, clamped to what the record
    /// holds. Returns the number of words copied; 0 if the tag is absent
    /// or `offset` is at or past the stored length (`dest` untouched).
    pub fn app_read(&mut self, tag: u8, dest: &mut [u16], offset: u8) -> Result<u8, Error> {
        let dir = self.dir.ok_or(Error::NotReady)?;
        if self.locked.load(Ordering::Acquire) {
            return Err(Error::Locked);
        }
        let (addr, len) = match find_record(&mut self.flash, &dir, tag)? {
            Some(found) => found,
            None => return Ok(0),
        };
        if offset >= len {
            return Ok(0);
        }
        let count = dest.len().min((len - offset) as usize);
        let data = addr.add_words(1 + offset as u16);
        for (i, slot) in dest[..count].iter_mut().enumerate() {
            *slot = self.flash.read_word(data.add_words(i as u16))?;
        }
        Ok(count as u8)
    }

    /// Replace `tag`'s record with `data`, creating it if absent
    ///
    /// Empty `data` deletes the record entirely, header included. Returns
    /// the new total payload size in words.
    pub fn app_replace(&mut self, tag: u8, data: &[u16]) -> Result<u8, Error> {
        if data.is_empty() {
            return self.app_delete(tag, 0);
        }
        let dir = self.dir.ok_or(Error::NotReady)?;
        if data.len() > u8::MAX as usize {
            return Err(Error::NoSpace);
        }
        let count = data.len() as u8;
        let _guard = WriteLock::try_acquire(&self.locked).ok_or(Error::Locked)?;

        let new_size = match find_record(&mut self.flash, &dir, tag)? {
            Some((addr, old)) => {
                if dir.size as i32 + count as i32 - old as i32 > dir.maxsize as i32 {
                    return Err(Error::NoSpace);
                }
                let new_size = (dir.size as i32 + count as i32 - old as i32) as u8;
                // size header and record header ride along in the same pass
                let patches = [
                    Patch {
                        addr: dir.start.add_words(1),
                        value: pack_sizes(new_size, dir.maxsize),
                    },
                    Patch {
                        addr,
                        value: pack_record(tag, count),
                    },
                ];
                insert_delete_modify(
                    &mut self.flash,
                    &mut self.watchdog,
                    addr.add_words(1),
                    Source::Words(data),
                    old as u16,
                    count as u16,
                    &patches,
                    dir.free_start(),
                    dir.free_stop(),
                )?;
                new_size
            }
            None => {
                if dir.size as i32 + count as i32 + 1 > dir.maxsize as i32 {
                    return Err(Error::NoSpace);
                }
                let new_size = dir.size + count + 1;
                let patches = [Patch {
                    addr: dir.start.add_words(1),
                    value: pack_sizes(new_size, dir.maxsize),
                }];
                insert_delete_modify(
                    &mut self.flash,
                    &mut self.watchdog,
                    dir.start.add_words(2 + dir.size as u16),
                    Source::Tagged {
                        header: pack_record(tag, count),
                        words: data,
                    },
                    0,
                    count as u16 + 1,
                    &patches,
                    dir.free_start(),
                    dir.free_stop(),
                )?;
                new_size
            }
        };

        self.dir = Some(Dir { size: new_size, ..dir });
        Ok(new_size)
    }

    /// Remove `tag`'s record entirely
    pub fn app_clear(&mut self, tag: u8) -> Result<u8, Error> {
        self.app_delete(tag, 0)
    }

    /// Delete `tag`'s payload from `offset` onward
    ///
    /// `offset == 0` removes the record including its header; a positive
    /// `offset` truncates the record to `offset` words. Returns the new
    /// total payload size; 0 if the tag was absent.
    pub fn app_delete(&mut self, tag: u8, offset: u8) -> Result<u8, Error> {
        let dir = self.dir.ok_or(Error::NotReady)?;
        let _guard = WriteLock::try_acquire(&self.locked).ok_or(Error::Locked)?;

        let (addr, old) = match find_record(&mut self.flash, &dir, tag)? {
            Some(found) => found,
            None => return Ok(0),
        };

        let new_size = if offset == 0 {
            let new_size = dir.size - old - 1;
            let patches = [Patch {
                addr: dir.start.add_words(1),
                value: pack_sizes(new_size, dir.maxsize),
            }];
            insert_delete_modify(
                &mut self.flash,
                &mut self.watchdog,
                addr,
                Source::Erased,
                old as u16 + 1,
                0,
                &patches,
                dir.free_start(),
                dir.free_stop(),
            )?;
            new_size
        } else {
            if offset >= old {
                return Err(Error::BadOffset);
            }
            let deleted = old - offset;
            let new_size = dir.size - deleted;
            let patches = [
                Patch {
                    addr: dir.start.add_words(1),
                    value: pack_sizes(new_size, dir.maxsize),
                },
                Patch {
                    addr,
                    value: pack_record(tag, offset),
                },
            ];
            insert_delete_modify(
                &mut self.flash,
                &mut self.watchdog,
                addr.add_words(1 + offset as u16),
                Source::Erased,
                deleted as u16,
                0,
                &patches,
                dir.free_start(),
                dir.free_stop(),
            )?;
            new_size
        };

        self.dir = Some(Dir { size: new_size, ..dir });
        Ok(new_size)
    }

    /// Overwrite `data.len()` words of `tag`'s payload starting at
    /// `offset`, growing the record when the write runs past its end
    ///
    /// `offset` may equal the stored length (pure append). Returns the
    /// record's resulting length in words; 0 if the tag is absent (use
    /// [`app_replace`](Self::app_replace) to create it).
    pub fn app_modify(&mut self, tag: u8, data: &[u16], offset: u8) -> Result<u8, Error> {
        let dir = self.dir.ok_or(Error::NotReady)?;
        if data.len() > u8::MAX as usize {
            return Err(Error::NoSpace);
        }
        let count = data.len() as u8;
        let _guard = WriteLock::try_acquire(&self.locked).ok_or(Error::Locked)?;

        let (addr, old) = match find_record(&mut self.flash, &dir, tag)? {
            Some(found) => found,
            None => return Ok(0),
        };
        if offset > old {
            return Err(Error::BadOffset);
        }

        if count as u16 + offset as u16 <= old as u16 {
            // fits inside the current length, plain in-place overwrite
            insert_delete_modify(
                &mut self.flash,
                &mut self.watchdog,
                addr.add_words(1 + offset as u16),
                Source::Words(data),
                count as u16,
                count as u16,
                &[],
                dir.free_start(),
                dir.free_stop(),
            )?;
            return Ok(old);
        }

        // runs past the end: replace the old tail and grow the record
        let deleted = old - offset;
        if dir.size as i32 - deleted as i32 + count as i32 > dir.maxsize as i32 {
            return Err(Error::NoSpace);
        }
        let new_size = (dir.size as i32 - deleted as i32 + count as i32) as u8;
        let new_len = offset + count;
        let patches = [
            Patch {
                addr: dir.start.add_words(1),
                value: pack_sizes(new_size, dir.maxsize),
            },
            Patch {
                addr,
                value: pack_record(tag, new_len),
            },
        ];
        insert_delete_modify(
            &mut self.flash,
            &mut self.watchdog,
            addr.add_words(1 + offset as u16),
            Source::Words(data),
            deleted as u16,
            count as u16,
            &patches,
            dir.free_start(),
            dir.free_stop(),
        )?;

        self.dir = Some(Dir { size: new_size, ..dir });
        Ok(new_len)
    }
}

/// Walk the record chain for `tag`; returns its header address and length
fn find_record<F: InfoFlash>(
    flash: &mut F,
    dir: &Dir,
    tag: u8,
) -> Result<Option<(WordAddr, u8)>, Error> {
    let mut addr = dir.data_start();
    let data_end = dir.data_start().add_words(dir.size as u16);
    while addr < data_end {
        let header = flash.read_word(addr)?;
        if record_tag(header) == tag {
            return Ok(Some((addr, record_len(header))));
        }
        addr = addr.add_words(record_len(header) as u16 + 1);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_hal_sim::{SimFlash, SimWatchdog};

    const BASE: u16 = 0x1800;

    fn fresh() -> Infomem<SimFlash, SimWatchdog> {
        let flash = SimFlash::erased(WordAddr::from_byte(BASE).unwrap());
        Infomem::new(flash, SimWatchdog::new())
    }

    fn with_dir(start: u16, end: u16) -> Infomem<SimFlash, SimWatchdog> {
        let mut mem = fresh();
        mem.init(start, end).unwrap();
        mem
    }

    /// Sum of (len+1) over the chain, walked straight off the media
    fn chain_words(mem: &mut Infomem<SimFlash, SimWatchdog>) -> u16 {
        let dir = mem.dir.unwrap();
        let mut addr = dir.data_start();
        let end = dir.data_start().add_words(dir.size as u16);
        let mut total = 0;
        while addr < end {
            let header = mem.flash.peek(addr);
            total += record_len(header) as u16 + 1;
            addr = addr.add_words(record_len(header) as u16 + 1);
        }
        total
    }

    #[test]
    fn init_half_window_yields_61_words() {
        let mut mem = fresh();
        // 128-byte region: 64 words minus 3 overhead
        assert_eq!(mem.init(0x1880, 0x1900), Ok(61));
        assert_eq!(mem.ready(), Ok(0));
        assert_eq!(mem.space(), Ok(61));
    }

    #[test]
    fn init_validates_addresses() {
        let mut mem = fresh();
        assert_eq!(mem.init(0x1881, 0x1900), Err(Error::Misaligned));
        assert_eq!(mem.init(0x1880, 0x1901), Err(Error::Misaligned));
        assert_eq!(mem.init(0x1700, 0x1900), Err(Error::OutOfRange));
        assert_eq!(mem.init(0x1880, 0x1A02), Err(Error::OutOfRange));
        assert_eq!(mem.init(0x1900, 0x1880), Err(Error::OutOfRange));
        assert_eq!(mem.init(0x1880, 0x1890), Err(Error::RegionTooSmall));
    }

    #[test]
    fn init_requires_erased_flash() {
        let mut mem = fresh();
        mem.flash()
            .poke(WordAddr::from_byte(0x18A0).unwrap(), 0x1234);
        assert_eq!(mem.init(0x1880, 0x1900), Err(Error::NotErased));
    }

    #[test]
    fn init_twice_is_refused() {
        let mut mem = with_dir(0x1880, 0x1900);
        assert_eq!(mem.init(0x1880, 0x1900), Err(Error::AlreadyPresent));
    }

    #[test]
    fn replace_then_read_round_trips() {
        let mut mem = with_dir(0x1880, 0x1900);
        assert_eq!(mem.app_replace(0x01, &[0xAAAA, 0xBBBB]), Ok(3));
        assert_eq!(mem.app_amount(0x01), Ok(2));

        let mut buf = [0u16; 2];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(2));
        assert_eq!(buf, [0xAAAA, 0xBBBB]);
    }

    #[test]
    fn ready_is_idempotent() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2, 3]).unwrap();
        let first = mem.ready().unwrap();
        assert_eq!(mem.ready().unwrap(), first);
        assert_eq!(first, 4);
    }

    #[test]
    fn ready_rediscovers_from_cold_state() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[7, 8]).unwrap();
        let (flash, wdt) = mem.into_parts();

        // a new instance has to find the directory by scanning
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Ok(3));
        let mut buf = [0u16; 2];
        assert_eq!(cold.app_read(0x01, &mut buf, 0), Ok(2));
        assert_eq!(buf, [7, 8]);
    }

    #[test]
    fn ready_on_blank_flash_reports_not_present() {
        let mut mem = fresh();
        assert_eq!(mem.ready(), Err(Error::NotPresent));
    }

    #[test]
    fn ready_rejects_implausible_sizes() {
        let mut mem = with_dir(0x1880, 0x1900);
        let start = WordAddr::from_byte(0x1880).unwrap();
        // currentSize > maxSize
        mem.flash().poke(start.add_words(1), pack_sizes(10, 5));
        let (flash, wdt) = mem.into_parts();
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Err(Error::SizeFields));
    }

    #[test]
    fn ready_rejects_stray_identifier_near_window_end() {
        // a foreign sentinel in the last words leaves no room for the
        // directory; the scan must report corruption, not fault
        for addr in [0x19FA, 0x19FC, 0x19FE] {
            let mut mem = fresh();
            mem.flash()
                .poke(WordAddr::from_byte(addr).unwrap(), IDENTIFIER);
            assert_eq!(mem.ready(), Err(Error::SizeFields));
        }
    }

    #[test]
    fn ready_rejects_broken_chain() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        let start = WordAddr::from_byte(0x1880).unwrap();
        // corrupt the record length so the chain overshoots
        mem.flash().poke(start.add_words(2), pack_record(0x01, 7));
        let (flash, wdt) = mem.into_parts();
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Err(Error::ChainMismatch));
    }

    #[test]
    fn ready_rejects_missing_terminator() {
        let mut mem = with_dir(0x1880, 0x1900);
        let start = WordAddr::from_byte(0x1880).unwrap();
        mem.flash().poke(start.add_words(2), 0x0000);
        let (flash, wdt) = mem.into_parts();
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Err(Error::TerminatorMissing));
    }

    #[test]
    fn failed_ready_is_not_cached() {
        let mut mem = with_dir(0x1880, 0x1900);
        let start = WordAddr::from_byte(0x1880).unwrap();
        let terminator_addr = start.add_words(2);
        let old = mem.flash().peek(terminator_addr);
        mem.flash().poke(terminator_addr, 0x0000);
        let (flash, wdt) = mem.into_parts();

        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Err(Error::TerminatorMissing));
        // once the media recovers, the next check succeeds
        cold.flash().poke(terminator_addr, old);
        assert_eq!(cold.ready(), Ok(0));
    }

    #[test]
    fn modify_grows_a_record() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[0xAAAA, 0xBBBB]).unwrap();
        let before = mem.ready().unwrap();

        assert_eq!(mem.app_modify(0x01, &[0xCCCC, 0xDDDD, 0xEEEE], 0), Ok(3));
        let mut buf = [0u16; 3];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(3));
        assert_eq!(buf, [0xCCCC, 0xDDDD, 0xEEEE]);
        assert_eq!(chain_words(&mut mem), before as u16 + 1);
    }

    #[test]
    fn modify_in_place_keeps_size() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2, 3, 4]).unwrap();
        let size = mem.ready().unwrap();

        assert_eq!(mem.app_modify(0x01, &[9, 9], 1), Ok(4));
        let mut buf = [0u16; 4];
        mem.app_read(0x01, &mut buf, 0).unwrap();
        assert_eq!(buf, [1, 9, 9, 4]);
        assert_eq!(mem.ready().unwrap(), size);
    }

    #[test]
    fn modify_appends_at_exact_end() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        assert_eq!(mem.app_modify(0x01, &[3, 4], 2), Ok(4));
        let mut buf = [0u16; 4];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(4));
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn modify_rejects_offset_past_end() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        assert_eq!(mem.app_modify(0x01, &[9], 3), Err(Error::BadOffset));
    }

    #[test]
    fn modify_absent_tag_returns_zero() {
        let mut mem = with_dir(0x1880, 0x1900);
        assert_eq!(mem.app_modify(0x42, &[1], 0), Ok(0));
    }

    #[test]
    fn delete_removes_record_and_reclaims() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        mem.app_replace(0x02, &[3, 4, 5]).unwrap();
        let before = mem.ready().unwrap();

        assert_eq!(mem.app_delete(0x01, 0), Ok(before - 3));
        assert_eq!(mem.app_amount(0x01), Ok(0));
        // the survivor shifted down intact
        let mut buf = [0u16; 3];
        assert_eq!(mem.app_read(0x02, &mut buf, 0), Ok(3));
        assert_eq!(buf, [3, 4, 5]);
        assert_eq!(chain_words(&mut mem), (before - 3) as u16);
    }

    #[test]
    fn delete_truncates_at_offset() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.app_delete(0x01, 2), Ok(3));
        assert_eq!(mem.app_amount(0x01), Ok(2));
        let mut buf = [0u16; 4];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(2));
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn delete_rejects_offset_past_end() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        assert_eq!(mem.app_delete(0x01, 2), Err(Error::BadOffset));
        assert_eq!(mem.app_delete(0x01, 5), Err(Error::BadOffset));
    }

    #[test]
    fn delete_absent_tag_returns_zero() {
        let mut mem = with_dir(0x1880, 0x1900);
        assert_eq!(mem.app_delete(0x42, 0), Ok(0));
    }

    #[test]
    fn replace_with_empty_data_deletes() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        assert_eq!(mem.app_replace(0x01, &[]), Ok(0));
        assert_eq!(mem.app_amount(0x01), Ok(0));
    }

    #[test]
    fn replace_shrinks_and_grows_existing_records() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2, 3, 4]).unwrap();
        mem.app_replace(0x02, &[5]).unwrap();

        assert_eq!(mem.app_replace(0x01, &[9, 9]), Ok(5));
        let mut buf = [0u16; 4];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(2));
        assert_eq!(&buf[..2], &[9, 9]);
        // the neighbor survived both edits
        assert_eq!(mem.app_read(0x02, &mut buf, 0), Ok(1));
        assert_eq!(buf[0], 5);

        assert_eq!(mem.app_replace(0x01, &[7, 7, 7, 7, 7, 7]), Ok(9));
        assert_eq!(mem.app_amount(0x01), Ok(6));
        assert_eq!(chain_words(&mut mem), 9);
    }

    #[test]
    fn no_space_leaves_state_untouched() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2, 3]).unwrap();
        let space = mem.space().unwrap();

        let too_big = [0u16; 61];
        assert_eq!(mem.app_replace(0x02, &too_big), Err(Error::NoSpace));
        assert_eq!(mem.space(), Ok(space));
        let mut buf = [0u16; 3];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(3));
        assert_eq!(buf, [1, 2, 3]);

        assert_eq!(mem.app_modify(0x01, &too_big, 0), Err(Error::NoSpace));
        assert_eq!(mem.space(), Ok(space));
    }

    #[test]
    fn space_tracks_every_mutation() {
        let mut mem = with_dir(0x1880, 0x1900);
        assert_eq!(mem.space(), Ok(61));
        mem.app_replace(0x01, &[1, 2]).unwrap();
        assert_eq!(mem.space(), Ok(58));
        mem.app_delete(0x01, 1).unwrap();
        assert_eq!(mem.space(), Ok(59));
        mem.app_clear(0x01).unwrap();
        assert_eq!(mem.space(), Ok(61));
    }

    #[test]
    fn read_with_offset_clamps_and_bounds() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[10, 11, 12]).unwrap();

        let mut buf = [0xDEAD_u16; 4];
        assert_eq!(mem.app_read(0x01, &mut buf, 1), Ok(2));
        assert_eq!(&buf[..2], &[11, 12]);

        // offset at and past the stored length: nothing copied
        let mut untouched = [0xDEAD_u16; 4];
        assert_eq!(mem.app_read(0x01, &mut untouched, 3), Ok(0));
        assert_eq!(mem.app_read(0x01, &mut untouched, 200), Ok(0));
        assert_eq!(untouched, [0xDEAD; 4]);
    }

    #[test]
    fn locked_store_refuses_mutation_and_reads() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        let size = mem.ready().unwrap();

        // simulate a mutation in flight from another call path
        mem.locked.store(true, Ordering::Release);
        assert_eq!(mem.app_replace(0x02, &[9]), Err(Error::Locked));
        assert_eq!(mem.app_delete(0x01, 0), Err(Error::Locked));
        assert_eq!(mem.app_modify(0x01, &[9], 0), Err(Error::Locked));
        assert_eq!(mem.relocate(0x1880, 0x1900), Err(Error::Locked));
        assert_eq!(mem.delete_all(), Err(Error::Locked));
        assert_eq!(mem.space(), Err(Error::Locked));
        assert_eq!(mem.app_amount(0x01), Err(Error::Locked));
        let mut buf = [0u16; 2];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Err(Error::Locked));
        mem.locked.store(false, Ordering::Release);

        // nothing changed while locked
        assert_eq!(mem.ready(), Ok(size));
        assert_eq!(chain_words(&mut mem), size as u16);
    }

    #[test]
    fn lock_is_released_after_errors() {
        let mut mem = with_dir(0x1880, 0x1900);
        let too_big = [0u16; 62];
        assert_eq!(mem.app_replace(0x01, &too_big), Err(Error::NoSpace));
        // the failed call must not leave the store locked
        assert_eq!(mem.app_replace(0x01, &[1]), Ok(2));
    }

    #[test]
    fn operations_before_ready_are_refused() {
        let mut mem = fresh();
        assert_eq!(mem.app_amount(0x01), Err(Error::NotReady));
        assert_eq!(mem.app_replace(0x01, &[1]), Err(Error::NotReady));
        assert_eq!(mem.app_delete(0x01, 0), Err(Error::NotReady));
        assert_eq!(mem.delete_all(), Err(Error::NotReady));
        assert_eq!(mem.relocate(0x1880, 0x1900), Err(Error::NotReady));
    }

    #[test]
    fn delete_all_wipes_and_forgets() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2, 3]).unwrap();
        mem.delete_all().unwrap();

        assert_eq!(mem.app_amount(0x01), Err(Error::NotReady));
        assert_eq!(mem.ready(), Err(Error::NotPresent));
        // everything back to erased filler
        let start = WordAddr::from_byte(0x1880).unwrap();
        for i in 0..64 {
            assert_eq!(mem.flash().peek(start.add_words(i)), ERASED_WORD);
        }
        // re-init works on the wiped region
        assert_eq!(mem.init(0x1880, 0x1900), Ok(61));
    }

    #[test]
    fn relocate_resize_in_place() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[1, 2]).unwrap();
        // shrink the reserved area without moving
        assert_eq!(mem.relocate(0x1880, 0x18C0), Ok(29));
        let mut buf = [0u16; 2];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(2));
        assert_eq!(buf, [1, 2]);

        let (flash, wdt) = mem.into_parts();
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Ok(3));
    }

    #[test]
    fn relocate_left_moves_structure_down() {
        let mut mem = with_dir(0x1900, 0x1980);
        mem.app_replace(0x01, &[0x1111, 0x2222]).unwrap();

        assert_eq!(mem.relocate(0x1880, 0x1900), Ok(61));
        let mut buf = [0u16; 2];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(2));
        assert_eq!(buf, [0x1111, 0x2222]);

        // verifiable from scratch at the new address
        let (flash, wdt) = mem.into_parts();
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Ok(3));
        assert_eq!(
            cold.flash().peek(WordAddr::from_byte(0x1880).unwrap()),
            IDENTIFIER
        );
    }

    #[test]
    fn relocate_right_moves_structure_up() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[0x3333]).unwrap();

        assert_eq!(mem.relocate(0x1900, 0x1980), Ok(61));
        let mut buf = [0u16; 1];
        assert_eq!(mem.app_read(0x01, &mut buf, 0), Ok(1));
        assert_eq!(buf, [0x3333]);

        let (flash, wdt) = mem.into_parts();
        let mut cold = Infomem::new(flash, wdt);
        assert_eq!(cold.ready(), Ok(2));
        assert_eq!(
            cold.flash().peek(WordAddr::from_byte(0x1900).unwrap()),
            IDENTIFIER
        );
    }

    #[test]
    fn relocate_rejects_too_small_target() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[0u16; 20]).unwrap();
        // 21 payload words + 3 overhead would not fit in 16 words
        assert_eq!(mem.relocate(0x1880, 0x18A0), Err(Error::RegionTooSmall));
    }

    #[test]
    fn relocate_validates_addresses() {
        let mut mem = with_dir(0x1880, 0x1900);
        assert_eq!(mem.relocate(0x1881, 0x1900), Err(Error::Misaligned));
        assert_eq!(mem.relocate(0x1700, 0x1900), Err(Error::OutOfRange));
        assert_eq!(mem.relocate(0x1880, 0x1B00), Err(Error::OutOfRange));
    }

    #[test]
    fn append_costs_a_single_erase() {
        let mut mem = with_dir(0x1880, 0x1900);
        mem.app_replace(0x01, &[0xFFFF, 0xFFFF]).unwrap();
        mem.flash().reset_counters();

        // record header, payload, terminator, and size header all land in
        // one segment commit
        mem.app_replace(0x02, &[0x1234]).unwrap();
        assert_eq!(mem.flash().total_erases(), 1);
    }
}
