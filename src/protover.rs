//! Component I: the protocol-version gate.
//!
//! The actual protocol-version table format (parsing `"Link=1-5
//! Relay=1-3"`-style strings) is an external parsing concern; this module
//! only models the small, fixed set of comparisons the consensus subsystem
//! itself performs.

use std::collections::BTreeSet;
use std::time::SystemTime;

use crate::consensus::Consensus;

/// A named protocol together with the set of versions supported or
/// required.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProtoSet {
    entries: BTreeSet<(String, u32)>,
}

impl ProtoSet {
    /// Construct a `ProtoSet` from `(name, version)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u32)>) -> Self {
        ProtoSet {
            entries: entries.into_iter().collect(),
        }
    }

    /// True if `(name, version)` is a member of this set.
    pub fn contains(&self, name: &str, version: u32) -> bool {
        self.entries.contains(&(name.to_string(), version))
    }

    /// Iterate over all `(name, version)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

/// Which role's protocol sets to check: a client evaluating relays, or a
/// relay evaluating its own required support.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Evaluate the consensus's client protocol sets.
    Client,
    /// Evaluate the consensus's relay protocol sets.
    Relay,
}

/// The outcome of checking our own capability set against a consensus's
/// declared requirements.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionCheckOutcome {
    /// If true, the embedding application must treat this as fatal and stop:
    /// the consensus requires a protocol version we do not implement.
    pub must_exit: bool,
    /// A human-readable warning, present when an upgrade is advised but not
    /// mandatory.
    pub warning: Option<&'static str>,
}

impl VersionCheckOutcome {
    /// The "everything is fine" outcome.
    fn ok() -> Self {
        VersionCheckOutcome {
            must_exit: false,
            warning: None,
        }
    }
}

/// Component I: `check(document, role) -> VersionCheckOutcome`.
///
/// `supported` is the implementation's own capability set; `approx_release`
/// is this binary's approximate release date, used to discard consensuses
/// that predate the binary (they cannot have an informed opinion about
/// what it supports).
pub fn check(
    doc: &Consensus,
    role: Role,
    supported: &ProtoSet,
    approx_release: SystemTime,
) -> VersionCheckOutcome {
    if doc.lifetime.valid_after < approx_release {
        return VersionCheckOutcome::ok();
    }

    let (required, recommended) = match role {
        Role::Client => (
            &doc.required_client_protocols,
            &doc.recommended_client_protocols,
        ),
        Role::Relay => (
            &doc.required_relay_protocols,
            &doc.recommended_relay_protocols,
        ),
    };

    let unsupported = |set: &ProtoSet| {
        set.iter().any(|(name, version)| !supported.contains(name, version))
    };

    if unsupported(required) {
        return VersionCheckOutcome {
            must_exit: true,
            warning: Some("upgrade required"),
        };
    }
    if unsupported(recommended) {
        return VersionCheckOutcome {
            must_exit: false,
            warning: Some("upgrade advised"),
        };
    }
    VersionCheckOutcome::ok()
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use crate::consensus::{DigestAlgorithm, Lifetime};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn doc_with(required: ProtoSet, recommended: ProtoSet, valid_after_secs: u64) -> Consensus {
        let epoch = SystemTime::UNIX_EPOCH;
        let mut c = Consensus::new(
            Lifetime::new(
                epoch + Duration::from_secs(valid_after_secs),
                epoch + Duration::from_secs(valid_after_secs + 100),
                epoch + Duration::from_secs(valid_after_secs + 200),
            )
            .unwrap(),
            Duration::from_secs(60),
            crate::flavor::Flavor::Ns,
            Vec::new(),
            Vec::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::<DigestAlgorithm, Vec<u8>>::new(),
        );
        c.required_client_protocols = required;
        c.recommended_client_protocols = recommended;
        c
    }

    #[test]
    fn fine_when_everything_supported() {
        let supported = ProtoSet::from_entries([("Link".into(), 4)]);
        let doc = doc_with(
            ProtoSet::from_entries([("Link".into(), 4)]),
            ProtoSet::default(),
            1000,
        );
        let out = check(&doc, Role::Client, &supported, SystemTime::UNIX_EPOCH);
        assert!(!out.must_exit);
        assert_eq!(out.warning, None);
    }

    #[test]
    fn must_exit_on_unsupported_required() {
        let supported = ProtoSet::from_entries([("Link".into(), 4)]);
        let doc = doc_with(
            ProtoSet::from_entries([("Link".into(), 99)]),
            ProtoSet::default(),
            1000,
        );
        let out = check(&doc, Role::Client, &supported, SystemTime::UNIX_EPOCH);
        assert!(out.must_exit);
    }

    #[test]
    fn advisory_on_unsupported_recommended() {
        let supported = ProtoSet::from_entries([("Link".into(), 4)]);
        let doc = doc_with(
            ProtoSet::from_entries([("Link".into(), 4)]),
            ProtoSet::from_entries([("Link".into(), 5)]),
            1000,
        );
        let out = check(&doc, Role::Client, &supported, SystemTime::UNIX_EPOCH);
        assert!(!out.must_exit);
        assert_eq!(out.warning, Some("upgrade advised"));
    }

    #[test]
    fn future_binary_ignores_stale_consensus() {
        let supported = ProtoSet::default();
        let doc = doc_with(ProtoSet::from_entries([("Link".into(), 99)]), ProtoSet::default(), 1000);
        let approx_release = SystemTime::UNIX_EPOCH + Duration::from_secs(5000);
        let out = check(&doc, Role::Client, &supported, approx_release);
        assert!(!out.must_exit);
    }
}
