//! Declare an error type for the consensus networkstatus subsystem.

use std::sync::Arc;

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use crate::flavor::Flavor;

/// An error encountered while fetching, validating, or installing a
/// consensus document.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The parser (external to this crate) rejected the bytes we handed it.
    #[error("Could not parse consensus document")]
    UnparseableDocument(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The document's self-declared flavor disagrees with the slot we
    /// requested it for.
    #[error("Consensus has flavor {found:?}, expected {expected:?}")]
    WrongFlavor {
        /// The flavor we expected.
        expected: Flavor,
        /// The flavor the document declared.
        found: Flavor,
    },

    /// Local policy does not fetch or serve this flavor at all.
    #[error("Not interested in flavor {0:?}")]
    UninterestingFlavor(Flavor),

    /// Document was loaded from the on-disk cache but is too old to be used
    /// even as a bootstrap stopgap.
    #[error("Cached consensus has expired")]
    ExpiredFromCache,

    /// An install was attempted with digests that are already installed.
    #[error("Document is byte-identical to the one we already have")]
    Duplicate,

    /// `valid_after` of the candidate document does not strictly advance on
    /// the currently installed one.
    #[error("Candidate consensus is at least as old as the one we have")]
    AtLeastAsOldAsCurrent,

    /// The signature validator returned `Insufficient`: too few good
    /// signatures, and no plausible path to get more by fetching certs.
    #[error("Not enough valid signatures on consensus")]
    InsufficientSignatures,

    /// The signature validator returned `NeedsMoreCerts`: the document has
    /// been parked and a certificate fetch was launched. This is reported as
    /// an `Error` variant for uniformity, but callers should *not* treat it
    /// as a failure: see [`Error::bootstrap_action`].
    #[error("Waiting for authority certificates before this consensus can be verified")]
    WaitingForCerts,

    /// We could not read or write a cache file.
    #[error("Error while {action} cache file {fname}", fname = fname.display())]
    CacheIo {
        /// What we were doing when we encountered the error.
        action: &'static str,
        /// The file we were trying to access.
        fname: std::path::PathBuf,
        /// The underlying IO error.
        #[source]
        error: Arc<std::io::Error>,
    },

    /// We read a cache file, but its contents made no sense (not valid UTF-8,
    /// truncated, or otherwise not what we expect to have written).
    #[error("Corrupt cache: {0}")]
    CacheCorruption(&'static str),

    /// We couldn't take the advisory lock on the cache directory.
    #[error("Could not lock cache directory")]
    LockUnavailable(#[source] Arc<std::io::Error>),

    /// A problem accessing our cache directory's permissions (for example, a
    /// world-writable directory where one shouldn't exist).
    #[error("Problem accessing cache directory")]
    CacheAccess(#[from] fs_mistrust::Error),

    /// A programming problem, either in our code or the code calling it.
    #[error("Internal programming issue: {0}")]
    Bug(String),
}

impl Error {
    /// Construct a new `Error` from an I/O error encountered while `action`ing
    /// the cache file at `fname`.
    pub(crate) fn from_io(
        action: &'static str,
        fname: impl Into<std::path::PathBuf>,
        error: std::io::Error,
    ) -> Error {
        Error::CacheIo {
            action,
            fname: fname.into(),
            error: Arc::new(error),
        }
    }

    /// Return true if this is the "happy" non-failure case of waiting for
    /// certificates: the scheduler should not treat it as a download failure.
    pub fn is_waiting_for_certs(&self) -> bool {
        matches!(self, Error::WaitingForCerts)
    }

    /// Return information about what to do if this error occurs while the
    /// bootstrap controller is trying to reach a usable consensus.
    pub fn bootstrap_action(&self) -> BootstrapAction {
        use Error::*;
        match self {
            // Expected, benign outcomes: keep going, blame the source.
            WaitingForCerts | Duplicate | UninterestingFlavor(_) => BootstrapAction::Nonfatal,

            // The document looked plausible but turned out to be unusable;
            // restart the download from scratch.
            InsufficientSignatures | WrongFlavor { .. } | AtLeastAsOldAsCurrent
            | ExpiredFromCache => BootstrapAction::Reset,

            UnparseableDocument(_) => BootstrapAction::Nonfatal,

            // Local storage/filesystem trouble: nothing downloading again
            // will fix.
            CacheIo { .. } | CacheCorruption(_) | LockUnavailable(_) | CacheAccess(_)
            | Bug(_) => BootstrapAction::Fatal,
        }
    }
}

/// The effect that a given error has on our bootstrapping process.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootstrapAction {
    /// The error isn't fatal. Blame it on its source (if any) and continue.
    Nonfatal,
    /// The error requires that we restart bootstrapping this flavor from
    /// scratch: a document that looked plausible turned out to be unusable.
    Reset,
    /// The error indicates that we cannot bootstrap, and should stop trying.
    Fatal,
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error as E;
        use ErrorKind as EK;
        match self {
            E::UnparseableDocument(_) => EK::TorProtocolViolation,
            E::WrongFlavor { .. } => EK::TorProtocolViolation,
            E::UninterestingFlavor(_) => EK::BadApiUsage,
            E::ExpiredFromCache => EK::CacheCorrupted,
            E::Duplicate => EK::TorProtocolViolation,
            E::AtLeastAsOldAsCurrent => EK::TorProtocolViolation,
            E::InsufficientSignatures => EK::TorProtocolViolation,
            E::WaitingForCerts => EK::TorProtocolViolation,
            E::CacheIo { .. } => EK::CacheAccessFailed,
            E::CacheCorruption(_) => EK::CacheCorrupted,
            E::LockUnavailable(_) => EK::CacheAccessFailed,
            E::CacheAccess(_) => EK::CacheAccessFailed,
            E::Bug(_) => EK::Internal,
        }
    }
}

/// Alias for the `Result` type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
