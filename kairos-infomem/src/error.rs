//! Infomem error types

use kairos_hal::flash::FlashError;

/// Errors from infomem operations
///
/// Three classes with different recovery stories:
///
/// - structural corruption ([`Self::is_structural`]) - the on-media
///   directory disagrees with itself; nothing is auto-repaired and the
///   store stays unusable until re-`init`
/// - transient contention ([`Self::is_transient`]) - another operation is
///   in flight; retry on the next main-loop pass
/// - parameter validation - caller error, retrying unchanged will not help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No directory identifier anywhere in the window
    NotPresent,
    /// A sane directory already exists; `init` refused
    AlreadyPresent,
    /// Readiness has not been established; call `ready` first
    NotReady,
    /// `currentSize > maxSize`, or `maxSize` does not fit the window
    SizeFields,
    /// Walking the record chain does not land on the payload end
    ChainMismatch,
    /// No terminator word at the payload end
    TerminatorMissing,
    /// An operation is already in flight; retry later
    Locked,
    /// Byte address is odd; infomem addresses are word-granular
    Misaligned,
    /// Address range falls outside the four-segment window
    OutOfRange,
    /// Region too small for the directory overhead or existing payload
    RegionTooSmall,
    /// `init` target region is not fully erased
    NotErased,
    /// Payload would not fit in `maxSize`
    NoSpace,
    /// Offset beyond the record's stored length
    BadOffset,
    /// Typed value record shape disagrees with its length prefix
    #[cfg(feature = "serde")]
    ValueLayout,
    /// Typed value bytes failed to deserialize
    #[cfg(feature = "serde")]
    ValueEncoding,
    /// Flash backend failure
    Flash(FlashError),
}

impl Error {
    /// Recoverable by retrying once the in-flight operation finishes
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Locked)
    }

    /// Unrecoverable without re-`init`
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::SizeFields | Error::ChainMismatch | Error::TerminatorMissing
        )
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Error::Flash(e)
    }
}
