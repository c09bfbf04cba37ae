//! Component K: the bootstrap controller.
//!
//! A pure, read-only predicate over components F and D: are we still
//! trying to reach a first usable consensus for the flavor local policy
//! actually relies on? Grounded on `tor-dirmgr`'s `bootstrap_started:
//! AtomicBool`/`scopeguard::guard` single-attempt gate in its `lib.rs`, but
//! generalized the way §4.K calls for: that gate protected a one-shot
//! background task from being launched twice, which has no counterpart
//! here since `Core` has no background task of its own (§5's
//! single-threaded cooperative model) — only the read-only query survives
//! into this crate. The single-attempt gating this crate still needs
//! (don't re-launch a bootstrap fetch that's already in flight) is instead
//! handled by `Scheduler`'s own in-flight tracking (component E).

use std::time::{Duration, SystemTime};

use crate::certwaiter::CertWaiter;
use crate::flavor::Flavor;
use crate::registry::ConsensusRegistry;

/// `is_bootstrapping(now, usable_flavor, registry, certwaiter, reasonably_live_slack) -> bool`,
/// exactly per §4.K:
///
/// - `false` if F has a reasonably-live document for `usable_flavor`.
/// - `false` if D has a parked document for `usable_flavor` (we're
///   bootstrapping *certificates*, not the consensus itself).
/// - `true` otherwise.
pub fn is_bootstrapping(
    now: SystemTime,
    usable_flavor: Flavor,
    registry: &ConsensusRegistry,
    certwaiter: &CertWaiter,
    reasonably_live_slack: Duration,
) -> bool {
    if registry.is_reasonably_live(usable_flavor, now, reasonably_live_slack) {
        return false;
    }
    if certwaiter.is_waiting(usable_flavor) {
        return false;
    }
    true
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use crate::consensus::{Consensus, Lifetime};
    use crate::scheduler::{Scheduler, SchedulerEnv};
    use crate::transport::mock::StepRandom;
    use std::collections::BTreeMap;

    #[derive(Debug, Default)]
    struct NullStore;
    impl crate::storage::CacheStore for NullStore {
        fn read(&self, _f: Flavor, _v: bool) -> crate::err::Result<Option<crate::storage::DocumentBytes>> {
            Ok(None)
        }
        fn write(&self, _f: Flavor, _v: bool, _b: &[u8]) -> crate::err::Result<()> {
            Ok(())
        }
        fn promote(&self, _f: Flavor) -> crate::err::Result<()> {
            Ok(())
        }
        fn erase(&self, _f: Flavor, _v: bool) -> crate::err::Result<()> {
            Ok(())
        }
    }

    fn consensus(valid_after_secs: u64) -> Consensus {
        let epoch = SystemTime::UNIX_EPOCH;
        Consensus::new(
            Lifetime::new(
                epoch + Duration::from_secs(valid_after_secs),
                epoch + Duration::from_secs(valid_after_secs + 1000),
                epoch + Duration::from_secs(valid_after_secs + 2000),
            )
            .unwrap(),
            Duration::from_secs(60),
            Flavor::Ns,
            Vec::new(),
            Vec::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn bootstrapping_with_nothing_installed_or_parked() {
        let registry = ConsensusRegistry::new();
        let certwaiter = CertWaiter::new();
        assert!(is_bootstrapping(
            SystemTime::UNIX_EPOCH,
            Flavor::Ns,
            &registry,
            &certwaiter,
            Duration::from_secs(24 * 60 * 60),
        ));
    }

    #[test]
    fn not_bootstrapping_once_reasonably_live_doc_installed() {
        let registry = ConsensusRegistry::new();
        let mut certwaiter = CertWaiter::new();
        let mut sched = Scheduler::new(SystemTime::UNIX_EPOCH, crate::retry::DownloadSchedule::default());
        let env = SchedulerEnv::default();
        let random = StepRandom::new(vec![0]);
        let store = NullStore;

        registry
            .install(
                Flavor::Ns,
                consensus(1000),
                crate::registry::Source::Fresh(b"bytes"),
                SystemTime::UNIX_EPOCH,
                &store,
                &mut certwaiter,
                &mut sched,
                &env,
                &random,
            )
            .unwrap();

        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1500);
        assert!(!is_bootstrapping(
            now,
            Flavor::Ns,
            &registry,
            &certwaiter,
            Duration::from_secs(24 * 60 * 60),
        ));
    }

    #[test]
    fn not_bootstrapping_while_document_parked_waiting_for_certs() {
        let registry = ConsensusRegistry::new();
        let mut certwaiter = CertWaiter::new();
        let store = NullStore;
        let now = SystemTime::UNIX_EPOCH;
        certwaiter.park(Flavor::Ns, consensus(1000), b"bytes", now, &store);

        assert!(!is_bootstrapping(
            now,
            Flavor::Ns,
            &registry,
            &certwaiter,
            Duration::from_secs(24 * 60 * 60),
        ));
    }

    #[test]
    fn still_bootstrapping_once_parked_document_is_cleared_without_install() {
        let registry = ConsensusRegistry::new();
        let mut certwaiter = CertWaiter::new();
        let store = NullStore;
        let now = SystemTime::UNIX_EPOCH;
        certwaiter.park(Flavor::Ns, consensus(1000), b"bytes", now, &store);
        certwaiter.clear_if_older(Flavor::Ns, SystemTime::UNIX_EPOCH + Duration::from_secs(5000), &store);

        assert!(is_bootstrapping(
            now,
            Flavor::Ns,
            &registry,
            &certwaiter,
            Duration::from_secs(24 * 60 * 60),
        ));
    }
}
