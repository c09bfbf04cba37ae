//! The upstream interfaces this crate consumes but does not implement (§6
//! "Upstream (consumed)").
//!
//! Parsing, cryptography, and the directory-fetch transport itself are all
//! out of scope for this crate per §1; this module only declares the traits
//! [`Core`](crate::Core) calls into, following the `async_trait`-flavored
//! `DirProvider`/`NetDirProvider` pattern `tor-dirmgr` uses at its own
//! transport boundary.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::consensus::Consensus;
use crate::flavor::Flavor;

/// A directory server to prefer, or no preference.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum SourcePolicy {
    /// No preference; any directory server will do.
    #[default]
    Any,
    /// Prefer a directory authority.
    AuthorityOnly,
    /// Prefer a fallback mirror.
    FallbackOnly,
}

/// What a fetch is for, passed through to the transport layer for logging
/// and purpose-tagging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchPurpose {
    /// Fetching a consensus document of the given flavor.
    Consensus(Flavor),
    /// Fetching authority certificates needed to validate a parked document.
    Certificates,
}

/// A request for bytes that [`Core`](crate::Core) hands to the embedding
/// application's async runtime, per §5's "fetches are delegated to an
/// external asynchronous directory-transport layer" rule.
///
/// `Core`'s own methods never `.await`; they return a `FetchRequest`
/// describing work to launch, and the embedding application later reports
/// the outcome back through [`Core::on_download_complete`](crate::Core::on_download_complete)
/// or [`Core::on_download_failed`](crate::Core::on_download_failed).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchRequest {
    /// What is being fetched.
    pub purpose: FetchPurpose,
    /// A transport-defined resource string (e.g. a URL path fragment).
    pub resource: String,
    /// Which kind of directory server to prefer.
    pub source_policy: SourcePolicy,
}

/// The directory-fetch transport, modeled as a trait so `Core` can be
/// exercised against a fully synchronous mock in tests.
#[async_trait]
pub trait DirectoryTransport: std::fmt::Debug + Send + Sync {
    /// Asynchronously fetch the bytes described by `request`.
    async fn fetch(&self, request: &FetchRequest) -> std::io::Result<Vec<u8>>;
}

/// A single authority certificate: the (identity digest, signing-key
/// digest) pair a [`crate::consensus::Signature`] is checked against, plus
/// its expiry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cert {
    /// Identity digest of the authority that issued this certificate.
    pub identity_digest: [u8; 20],
    /// Digest of the medium-term signing key this certificate certifies.
    pub signing_key_digest: [u8; 20],
    /// When this certificate stops being valid.
    pub expires: SystemTime,
}

/// The authority-certificate store: component C's source of truth for
/// "does a certificate exist that could check this signature", and
/// component D/E's target for "go fetch the certificates we're missing".
#[async_trait]
pub trait AuthorityStore: std::fmt::Debug + Send + Sync {
    /// Look up a certificate by identity digest and signing-key digest.
    fn get(&self, identity_digest: &[u8; 20], signing_key_digest: &[u8; 20]) -> Option<Cert>;

    /// True if `cert`'s signing key has been administratively denylisted:
    /// component C forces any signature checked against it to `Bad` without
    /// doing the (comparatively expensive) cryptographic work.
    fn is_denylisted(&self, cert: &Cert) -> bool;

    /// Launch certificate downloads for whatever `document`'s voters are
    /// missing, preferring `preferred_source`.
    async fn fetch_missing(
        &self,
        document: &Consensus,
        now: SystemTime,
        preferred_source: SourcePolicy,
    );

    /// True if certificate-fetch attempts have themselves been failing
    /// recently, letting component C distinguish "still waiting" from "will
    /// never arrive" (the "uncertain" bit of §4.C step 2).
    fn downloads_failing(&self) -> bool;
}

/// Stand-in for the out-of-scope document parser (§1): turns signed bytes
/// into a structured [`Consensus`].
pub trait Parser: std::fmt::Debug + Send + Sync {
    /// Parse `bytes` as a consensus document of the expected flavor.
    fn parse(&self, bytes: &[u8]) -> Result<Consensus, ParseError>;
}

/// The parser rejected a document's bytes. Opaque by design: the parser
/// itself, and therefore the taxonomy of parse failures, is out of scope.
#[derive(Clone, Debug, thiserror::Error)]
#[error("could not parse consensus document: {0}")]
pub struct ParseError(pub String);

/// A source of the current time, mockable for deterministic tests.
pub trait Clock: std::fmt::Debug + Send + Sync {
    /// Return the current time.
    fn now(&self) -> SystemTime;
}

/// A source of uniformly-distributed random integers, mockable for
/// deterministic tests (used by component E's jittered `next_fetch_time`).
pub trait Random: std::fmt::Debug + Send + Sync {
    /// Return a uniformly distributed integer in `[0, bound)`. `bound == 0`
    /// always returns `0`.
    fn uniform_int(&self, bound: u64) -> u64;
}

/// The real-clock [`Clock`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// The real-randomness [`Random`] implementation, backed by `rand`'s
/// thread-local generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl Random for OsRandom {
    fn uniform_int(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        rand::Rng::gen_range(&mut rand::thread_rng(), 0..bound)
    }
}
