//! Watchdog hold/resume abstraction
//!
//! A full segment erase plus reprogram can outlast the watchdog period, so
//! the flash program primitive parks the watchdog for the duration of a
//! commit. The pairing is strict and local: held on entry, resumed on every
//! exit path, which is what the RAII guard below guarantees.

/// Watchdog timer control
pub trait Watchdog {
    /// Stop the watchdog counter
    fn hold(&mut self);

    /// Restart the watchdog counter, clearing any accumulated count
    fn resume(&mut self);
}

/// Scoped watchdog pause
///
/// Holds the watchdog on construction and resumes it when dropped.
pub struct WatchdogPause<'a, W: Watchdog> {
    watchdog: &'a mut W,
}

impl<'a, W: Watchdog> WatchdogPause<'a, W> {
    pub fn new(watchdog: &'a mut W) -> Self {
        watchdog.hold();
        Self { watchdog }
    }
}

impl<W: Watchdog> Drop for WatchdogPause<'_, W> {
    fn drop(&mut self) {
        self.watchdog.resume();
    }
}

/// No-op watchdog for platforms that run without one
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn hold(&mut self) {}
    fn resume(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingWatchdog {
        holds: u32,
        resumes: u32,
    }

    impl Watchdog for CountingWatchdog {
        fn hold(&mut self) {
            self.holds += 1;
        }
        fn resume(&mut self) {
            self.resumes += 1;
        }
    }

    #[test]
    fn pause_is_balanced() {
        let mut wdt = CountingWatchdog {
            holds: 0,
            resumes: 0,
        };
        {
            let _pause = WatchdogPause::new(&mut wdt);
        }
        assert_eq!(wdt.holds, 1);
        assert_eq!(wdt.resumes, 1);
    }

    #[test]
    fn pause_resumes_on_early_exit() {
        fn inner(wdt: &mut CountingWatchdog) -> Result<(), ()> {
            let _pause = WatchdogPause::new(wdt);
            Err(())
        }
        let mut wdt = CountingWatchdog {
            holds: 0,
            resumes: 0,
        };
        let _ = inner(&mut wdt);
        assert_eq!(wdt.holds, wdt.resumes);
    }
}
