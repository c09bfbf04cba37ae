//! Component D: the certificate waiter.
//!
//! Holds, per flavor, a document that parsed and passed enough signature
//! checks to be plausible but can't yet be verified because required
//! authority certificates are missing. Grounded on
//! `consensus_waiting_for_certs`/`warn_consensus_is_not_reasonably_live`'s
//! sibling bookkeeping in `original_source/networkstatus.c`, with
//! `MAX_WAIT_FOR_CERTS`/`MIN_WAIT_BEFORE_FAILURE` matching that source's
//! `DELAY_WHILE_FETCHING_CERTS` (20 min) and
//! `MIN_DELAY_FOR_FETCH_CERT_STATUS_FAILURE` (60 s).

use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::consensus::Consensus;
use crate::flavor::{Flavor, Flavored};
use crate::scheduler::DocumentSchedule;
use crate::storage::CacheStore;

/// How long we'll wait for certificates to arrive before giving up on a
/// parked document and crediting a download failure.
pub const MAX_WAIT_FOR_CERTS: Duration = Duration::from_secs(20 * 60);

/// The minimum time a wait must have lasted before we blame the download
/// schedule for it; avoids penalizing a source for a wait that was always
/// going to be short.
pub const MIN_WAIT_BEFORE_FAILURE: Duration = Duration::from_secs(60);

/// One flavor's parked-document slot.
#[derive(Debug, Default)]
struct Slot {
    /// The parked document, if any.
    parked: Option<Consensus>,
    /// When it was parked.
    parked_at: Option<SystemTime>,
    /// Whether we've already credited a download failure for this wait.
    dl_failed: bool,
}

/// The outcome of probing a flavor's wait state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitDecision {
    /// Nothing parked for this flavor.
    NotWaiting,
    /// Still within the wait window; keep waiting.
    StillWaiting,
    /// The wait has exceeded `MAX_WAIT_FOR_CERTS`.
    WaitTimedOut,
}

/// Component D: one [`Slot`] per flavor.
#[derive(Debug, Default)]
pub struct CertWaiter {
    slots: Flavored<Slot>,
}

impl CertWaiter {
    /// Construct an empty certificate waiter.
    pub fn new() -> Self {
        CertWaiter::default()
    }

    /// True if a document is currently parked for `flavor`.
    pub fn is_waiting(&self, flavor: Flavor) -> bool {
        self.slots.get(flavor).parked.is_some()
    }

    /// Borrow the parked document for `flavor`, if any.
    pub fn parked(&self, flavor: Flavor) -> Option<&Consensus> {
        self.slots.get(flavor).parked.as_ref()
    }

    /// `park(flavor, document)`: per §4.D, replace the slot's contents if it
    /// is empty or the incoming document is strictly newer; otherwise
    /// discard the newcomer (§9's tie-break: reject on equal `valid_after`).
    ///
    /// On acceptance, writes `document`'s bytes to the unverified cache
    /// file via `store`, per invariant 4 ("the unverified file... exactly
    /// mirrors D's parked document").
    pub fn park(&mut self, flavor: Flavor, document: Consensus, bytes: &[u8], now: SystemTime, store: &dyn CacheStore) {
        let slot = self.slots.get_mut(flavor);
        let accept = match &slot.parked {
            None => true,
            Some(existing) => document.lifetime.valid_after > existing.lifetime.valid_after,
        };
        if !accept {
            debug!(?flavor, "discarding newly parked document: not newer than what's already parked");
            return;
        }
        slot.parked = Some(document);
        slot.parked_at = Some(now);
        slot.dl_failed = false;
        if let Err(e) = store.write(flavor, false, bytes) {
            debug!(?flavor, error = %e, "failed to write unverified cache file");
        }
    }

    /// `probe(flavor, now, dls) -> WaitDecision`, crediting a failure to
    /// `dls` (the steady download schedule) on the first timeout
    /// observation for a given wait.
    pub fn probe(&mut self, flavor: Flavor, now: SystemTime, dls: &mut DocumentSchedule) -> WaitDecision {
        let slot = self.slots.get_mut(flavor);
        let (Some(parked), Some(parked_at)) = (&slot.parked, slot.parked_at) else {
            return WaitDecision::NotWaiting;
        };

        let elapsed = now.duration_since(parked_at).unwrap_or_default();
        let still_valid = now <= parked.lifetime.valid_until;
        if elapsed < MAX_WAIT_FOR_CERTS && still_valid {
            return WaitDecision::StillWaiting;
        }

        if !slot.dl_failed && elapsed >= MIN_WAIT_BEFORE_FAILURE {
            dls.report_failure(now);
            slot.dl_failed = true;
        }
        WaitDecision::WaitTimedOut
    }

    /// `clear_if_older(flavor, cutoff_valid_after)`: drop the parked
    /// document once a fully-verified document at or after
    /// `cutoff_valid_after` has been installed, per §4.D and §4.F step 4.
    /// Deletes the unverified cache file to maintain invariant 4.
    pub fn clear_if_older(&mut self, flavor: Flavor, cutoff_valid_after: SystemTime, store: &dyn CacheStore) {
        let slot = self.slots.get_mut(flavor);
        let should_clear = matches!(
            &slot.parked,
            Some(p) if p.lifetime.valid_after <= cutoff_valid_after
        );
        if should_clear {
            slot.parked = None;
            slot.parked_at = None;
            slot.dl_failed = false;
            if let Err(e) = store.erase(flavor, false) {
                debug!(?flavor, error = %e, "failed to erase unverified cache file");
            }
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use std::collections::BTreeMap;

    fn doc(valid_after_secs: u64) -> Consensus {
        let epoch = SystemTime::UNIX_EPOCH;
        Consensus::new(
            crate::consensus::Lifetime::new(
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

    #[derive(Debug, Default)]
    struct NullStore;
    impl CacheStore for NullStore {
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

    #[test]
    fn empty_slot_not_waiting() {
        let mut cw = CertWaiter::new();
        let mut dls = DocumentSchedule::steady_ready_now(SystemTime::UNIX_EPOCH, crate::retry::DownloadSchedule::default());
        assert_eq!(cw.probe(Flavor::Ns, SystemTime::UNIX_EPOCH, &mut dls), WaitDecision::NotWaiting);
    }

    #[test]
    fn park_then_still_waiting_then_timeout() {
        let store = NullStore;
        let mut cw = CertWaiter::new();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(5000);
        cw.park(Flavor::Ns, doc(1000), b"bytes", now, &store);
        assert!(cw.is_waiting(Flavor::Ns));

        let mut dls = DocumentSchedule::steady_ready_now(now, crate::retry::DownloadSchedule::default());
        assert_eq!(cw.probe(Flavor::Ns, now + Duration::from_secs(60), &mut dls), WaitDecision::StillWaiting);

        // Exactly at MAX_WAIT_FOR_CERTS, we've not yet exceeded it (still <).
        let at_cutoff = now + MAX_WAIT_FOR_CERTS;
        assert_eq!(cw.probe(Flavor::Ns, at_cutoff, &mut dls), WaitDecision::StillWaiting);

        let past_cutoff = now + MAX_WAIT_FOR_CERTS + Duration::from_secs(1);
        assert_eq!(cw.probe(Flavor::Ns, past_cutoff, &mut dls), WaitDecision::WaitTimedOut);
        assert_eq!(dls.n_failures(), 1);

        // A second probe after timeout doesn't double-credit the failure.
        cw.probe(Flavor::Ns, past_cutoff + Duration::from_secs(10), &mut dls);
        assert_eq!(dls.n_failures(), 1);
    }

    #[test]
    fn equal_valid_after_rejects_newcomer() {
        let store = NullStore;
        let mut cw = CertWaiter::new();
        let now = SystemTime::UNIX_EPOCH;
        cw.park(Flavor::Ns, doc(1000), b"first", now, &store);
        cw.park(Flavor::Ns, doc(1000), b"second", now, &store);
        // Still the first one: tie goes to the incumbent.
        assert_eq!(
            cw.parked(Flavor::Ns).unwrap().lifetime.valid_after,
            doc(1000).lifetime.valid_after
        );
    }

    #[test]
    fn newer_document_replaces_older_parked_one() {
        let store = NullStore;
        let mut cw = CertWaiter::new();
        let now = SystemTime::UNIX_EPOCH;
        cw.park(Flavor::Ns, doc(1000), b"first", now, &store);
        cw.park(Flavor::Ns, doc(2000), b"second", now, &store);
        assert_eq!(
            cw.parked(Flavor::Ns).unwrap().lifetime.valid_after,
            doc(2000).lifetime.valid_after
        );
    }

    #[test]
    fn clear_if_older_drops_stale_parked_doc() {
        let store = NullStore;
        let mut cw = CertWaiter::new();
        let now = SystemTime::UNIX_EPOCH;
        cw.park(Flavor::Ns, doc(1000), b"bytes", now, &store);
        cw.clear_if_older(Flavor::Ns, SystemTime::UNIX_EPOCH + Duration::from_secs(1000), &store);
        assert!(!cw.is_waiting(Flavor::Ns));
    }

    #[test]
    fn clear_if_older_keeps_parked_doc_when_still_newer() {
        let store = NullStore;
        let mut cw = CertWaiter::new();
        let now = SystemTime::UNIX_EPOCH;
        cw.park(Flavor::Ns, doc(2000), b"bytes", now, &store);
        cw.clear_if_older(Flavor::Ns, SystemTime::UNIX_EPOCH + Duration::from_secs(1000), &store);
        assert!(cw.is_waiting(Flavor::Ns));
    }
}
