//! The consensus document data model and the lookup indices (component J)
//! built on top of it.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use itertools::{EitherOrBoth, Itertools};

use crate::flavor::Flavor;

/// One authority's vote, as reflected in a consensus document: an identity
/// digest and the signatures it contributed.
#[derive(Clone, Debug)]
pub struct Voter {
    /// SHA1 digest of the authority's long-term v3 identity key.
    pub identity_digest: [u8; 20],
    /// Signatures this voter attached to the document.
    pub signatures: Vec<Signature>,
}

/// A single signature entry within a [`Voter`].
#[derive(Clone, Debug)]
pub struct Signature {
    /// Name of the digest algorithm the signature was computed over.
    pub algorithm: DigestAlgorithm,
    /// SHA1 digest of the signing (not identity) key that produced this
    /// signature.
    pub signing_key_digest: [u8; 20],
    /// The raw signature bytes. Checking them is out of scope for this
    /// crate; see [`crate::transport::AuthorityStore`].
    pub signature: Vec<u8>,
    /// Filled in by [`crate::sigvalidator::validate`] so that re-validation
    /// after a certificate arrives only revisits unresolved signatures.
    pub outcome: OnceLock<SignatureOutcome>,
}

/// The per-signature classification bucket used by the signature validator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureOutcome {
    /// Signature checked out against a known, non-denylisted certificate.
    Good,
    /// A matching certificate exists but the signature didn't verify, or the
    /// key was administratively denylisted.
    Bad,
    /// No certificate is currently available to check this signature.
    MissingKey,
    /// The voter isn't a recognized v3 authority at all.
    Unrecognized,
}

/// The digest algorithms a consensus's signed-portion digest may be computed
/// with. Kept deliberately small: this crate does not compute digests
/// itself (that's the [`crate::transport::AuthorityStore`]'s job), it only
/// needs a key to look one up by.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DigestAlgorithm {
    /// SHA1, used by the legacy `Ns` flavor's signature digest.
    Sha1,
    /// SHA256, used by newer signature digests and by microdescriptors.
    Sha256,
}

/// Per-relay flags carried in a routerstatus line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RelayFlags(u16);

#[allow(non_upper_case_globals)]
impl RelayFlags {
    /// The relay is believed to be running right now.
    pub const Running: RelayFlags = RelayFlags(1 << 0);
    /// The relay is suitable as an exit.
    pub const Exit: RelayFlags = RelayFlags(1 << 1);
    /// The relay has been up long enough to be "stable".
    pub const Stable: RelayFlags = RelayFlags(1 << 2);
    /// The relay is "fast" enough for general use.
    pub const Fast: RelayFlags = RelayFlags(1 << 3);
    /// The relay is suitable as a guard.
    pub const Guard: RelayFlags = RelayFlags(1 << 4);
    /// The relay is a known bad exit.
    pub const BadExit: RelayFlags = RelayFlags(1 << 5);
    /// The relay provides hidden-service directory service.
    pub const HsDir: RelayFlags = RelayFlags(1 << 6);
    /// The relay supports the v2 directory protocol.
    pub const V2Dir: RelayFlags = RelayFlags(1 << 7);
    /// The relay is itself a directory authority.
    pub const Authority: RelayFlags = RelayFlags(1 << 8);
    /// The relay's nickname is officially bound to its identity.
    pub const Named: RelayFlags = RelayFlags(1 << 9);
    /// The relay's nickname is known to be unbound.
    pub const Unnamed: RelayFlags = RelayFlags(1 << 10);
    /// The relay's descriptor is valid per the authorities' checks.
    pub const Valid: RelayFlags = RelayFlags(1 << 11);
    /// The relay's descriptor is stale.
    pub const StaleDesc: RelayFlags = RelayFlags(1 << 12);

    /// True if every bit set in `other` is also set in `self`.
    pub fn contains(&self, other: RelayFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RelayFlags {
    type Output = RelayFlags;
    fn bitor(self, rhs: RelayFlags) -> RelayFlags {
        RelayFlags(self.0 | rhs.0)
    }
}

/// Whether a relay's advertised bandwidth is a consensus-computed measured
/// weight or an unmeasured self-report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RelayWeight {
    /// Weight as measured by the bandwidth-measurement infrastructure.
    Measured(u32),
    /// Self-reported, unmeasured bandwidth.
    Unmeasured(u32),
}

impl RelayWeight {
    /// True if this weight came from bandwidth measurement rather than a
    /// relay's own advertised value.
    pub fn is_measured(&self) -> bool {
        matches!(self, RelayWeight::Measured(_))
    }

    /// True if this weight is nonzero.
    pub fn is_nonzero(&self) -> bool {
        match self {
            RelayWeight::Measured(w) | RelayWeight::Unmeasured(w) => *w != 0,
        }
    }
}

/// How a [`DownloadStatus`] advances its next-attempt time on failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IncrementRule {
    /// Advance based on the number of consecutive failures (steady-state
    /// backoff).
    ByFailure,
    /// Advance based on the number of attempts made, regardless of outcome
    /// (bootstrap parallel-fetch policy).
    ByAttempt,
}

/// Per-entity download bookkeeping: when we may next try again, and how many
/// times we've tried or failed so far.
#[derive(Clone, Debug)]
pub struct DownloadStatus {
    /// The next time at which a fetch for this entity should be launched.
    pub next_attempt_at: SystemTime,
    /// Consecutive failure count since the last success.
    pub n_failures: u32,
    /// Total attempt count since the last success.
    pub n_attempts: u32,
    /// Which counter drives the backoff increment.
    pub increment: IncrementRule,
}

impl DownloadStatus {
    /// Construct a fresh download status ready to fire immediately.
    pub fn ready_now(now: SystemTime, increment: IncrementRule) -> Self {
        DownloadStatus {
            next_attempt_at: now,
            n_failures: 0,
            n_attempts: 0,
            increment,
        }
    }
}

/// One relay's row inside a consensus document.
#[derive(Clone, Debug)]
pub struct Routerstatus {
    /// SHA1 (or longer, depending on flavor) digest identifying the relay.
    pub identity_digest: Vec<u8>,
    /// Digest of the relay's currently-advertised descriptor (router
    /// descriptor for `Ns`, microdescriptor for `Microdesc`).
    pub descriptor_digest: Vec<u8>,
    /// The relay's self-chosen nickname. Not authenticated; for humans only.
    pub nickname: String,
    /// IPv4 address and OR port, if any.
    pub addr_v4: Option<(std::net::Ipv4Addr, u16)>,
    /// IPv6 address and OR port, if any.
    pub addr_v6: Option<(std::net::Ipv6Addr, u16)>,
    /// Flag bits asserted by the authorities about this relay.
    pub flags: RelayFlags,
    /// The relay's advertised or measured bandwidth weight.
    pub weight: RelayWeight,
    /// Per-relay download bookkeeping, carried forward across consensus
    /// installs by [`crate::registry::ConsensusRegistry::install`] when the
    /// descriptor digest is unchanged.
    pub download_status: DownloadStatus,
}

/// The three-phase validity window of a consensus document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Lifetime {
    /// When this consensus started being the authorities' answer.
    pub valid_after: SystemTime,
    /// When the *next* consensus is expected to become fresh; until then,
    /// this one is the unambiguous, undisputed answer.
    pub fresh_until: SystemTime,
    /// The last instant at which this consensus may still be used at all.
    pub valid_until: SystemTime,
}

impl Lifetime {
    /// Construct a lifetime, checking that `valid_after < fresh_until <
    /// valid_until`.
    pub fn new(
        valid_after: SystemTime,
        fresh_until: SystemTime,
        valid_until: SystemTime,
    ) -> Option<Lifetime> {
        if valid_after < fresh_until && fresh_until < valid_until {
            Some(Lifetime {
                valid_after,
                fresh_until,
                valid_until,
            })
        } else {
            None
        }
    }

    /// Duration from `valid_after` to `fresh_until`: the voting interval.
    pub fn voting_interval(&self) -> Duration {
        self.fresh_until
            .duration_since(self.valid_after)
            .unwrap_or_default()
    }

    /// Duration from `valid_after` to `valid_until`: the whole usable span.
    pub fn whole_lifetime(&self) -> Duration {
        self.valid_until
            .duration_since(self.valid_after)
            .unwrap_or_default()
    }

    /// True if `when` falls within `[valid_after, valid_until]`.
    pub fn valid_at(&self, when: SystemTime) -> bool {
        self.valid_after <= when && when <= self.valid_until
    }
}

/// A full consensus document, as installed by [`crate::registry`] or parked
/// by [`crate::certwaiter`].
///
/// Parsing the signed bytes into this structure, and checking its
/// signatures, are both out of scope for this crate: see
/// [`crate::transport::Parser`] and [`crate::sigvalidator`].
#[derive(Clone, Debug)]
pub struct Consensus {
    /// The validity window.
    pub lifetime: Lifetime,
    /// Authority propagation slack used by the clock-skew heuristic.
    pub dist_seconds: Duration,
    /// The flavor this document declares itself to be.
    pub flavor: Flavor,
    /// Routerstatus entries, sorted ascending and unique by
    /// `identity_digest` (invariant required by [`Consensus::by_identity`]).
    pub routerstatuses: Vec<Routerstatus>,
    /// The authorities who signed (or were expected to sign) this document.
    pub voters: Vec<Voter>,
    /// Signed `name=value` network parameters.
    pub net_params: BTreeMap<String, i32>,
    /// Signed bandwidth-weighting parameters (a distinct namespace from
    /// `net_params` in the wire format, though often read with the same
    /// accessor).
    pub weight_params: BTreeMap<String, i32>,
    /// Client protocol versions relays are required to have.
    pub required_client_protocols: crate::protover::ProtoSet,
    /// Client protocol versions relays are recommended to have.
    pub recommended_client_protocols: crate::protover::ProtoSet,
    /// Relay protocol versions relays are required to have.
    pub required_relay_protocols: crate::protover::ProtoSet,
    /// Relay protocol versions relays are recommended to have.
    pub recommended_relay_protocols: crate::protover::ProtoSet,
    /// Precomputed digests of the signed portion, one per algorithm.
    pub digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
    /// Lazily-built index from descriptor digest to routerstatus index.
    /// Built on first [`Consensus::by_descriptor`] call, per §9's "lazy
    /// descriptor-digest map" design note.
    desc_digest_map: OnceLock<BTreeMap<Vec<u8>, usize>>,
}

impl Consensus {
    /// Construct a consensus. `routerstatuses` must already be sorted and
    /// unique by identity digest; callers (the out-of-scope parser, or test
    /// fixtures) are responsible for that invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lifetime: Lifetime,
        dist_seconds: Duration,
        flavor: Flavor,
        routerstatuses: Vec<Routerstatus>,
        voters: Vec<Voter>,
        net_params: BTreeMap<String, i32>,
        weight_params: BTreeMap<String, i32>,
        digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
    ) -> Self {
        debug_assert!(routerstatuses.windows(2).all(|w| w[0].identity_digest < w[1].identity_digest));
        Consensus {
            lifetime,
            dist_seconds,
            flavor,
            routerstatuses,
            voters,
            net_params,
            weight_params,
            required_client_protocols: crate::protover::ProtoSet::default(),
            recommended_client_protocols: crate::protover::ProtoSet::default(),
            required_relay_protocols: crate::protover::ProtoSet::default(),
            recommended_relay_protocols: crate::protover::ProtoSet::default(),
            digests,
            desc_digest_map: OnceLock::new(),
        }
    }

    /// Component J: binary search by identity digest.
    ///
    /// Relies on `routerstatuses` being sorted ascending and unique by
    /// identity digest, per invariant 5.
    pub fn by_identity(&self, digest: &[u8]) -> Option<&Routerstatus> {
        self.routerstatuses
            .binary_search_by(|rs| rs.identity_digest.as_slice().cmp(digest))
            .ok()
            .map(|idx| &self.routerstatuses[idx])
    }

    /// Component J: lookup by descriptor digest, via a lazily-built index.
    pub fn by_descriptor(&self, digest: &[u8]) -> Option<&Routerstatus> {
        let map = self.desc_digest_map.get_or_init(|| {
            self.routerstatuses
                .iter()
                .enumerate()
                .map(|(i, rs)| (rs.descriptor_digest.clone(), i))
                .collect()
        });
        map.get(digest).map(|&idx| &self.routerstatuses[idx])
    }

    /// Component J: iterate all descriptor digests known to this document,
    /// via the same lazily-built index used by [`Consensus::by_descriptor`].
    pub fn all_descriptor_digests(&self) -> impl Iterator<Item = &[u8]> {
        let map = self.desc_digest_map.get_or_init(|| {
            self.routerstatuses
                .iter()
                .enumerate()
                .map(|(i, rs)| (rs.descriptor_digest.clone(), i))
                .collect()
        });
        map.keys().map(|k| k.as_slice())
    }
}

/// Order two routerstatus lists, both sorted by identity digest, finding
/// matching entries by identity so that per-entry state can be carried
/// forward. Grounded on `routerstatus_has_visibly_changed`'s merge-join
/// companion in the original `networkstatus.c`, and reused by both
/// component F's carry-over step and component G's diff computation.
pub(crate) fn merge_join_by_identity<'a>(
    old: &'a [Routerstatus],
    new: &'a [Routerstatus],
) -> Vec<(Option<&'a Routerstatus>, Option<&'a Routerstatus>)> {
    old.iter()
        .merge_join_by(new.iter(), |a, b| a.identity_digest.cmp(&b.identity_digest))
        .map(|pair| match pair {
            EitherOrBoth::Left(a) => (Some(a), None),
            EitherOrBoth::Right(b) => (None, Some(b)),
            EitherOrBoth::Both(a, b) => (Some(a), Some(b)),
        })
        .collect()
}
