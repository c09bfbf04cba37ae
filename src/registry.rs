//! Component F: the current-consensus registry.
//!
//! Owns the one slot per flavor that downstream readers (component J's
//! lookups, component H's parameter resolver, component K's bootstrap
//! check) actually see. Grounded on `tor-dirmgr`'s `shared_ref.rs` for the
//! "swap an `Arc` under a lock, never hold the lock across an await" shape,
//! generalized here to one slot per [`Flavor`] via [`Flavored`].

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::certwaiter::CertWaiter;
use crate::consensus::{merge_join_by_identity, Consensus};
use crate::err::{Error, Result};
use crate::flavor::{Flavor, Flavored};
use crate::scheduler::{Scheduler, SchedulerEnv};
use crate::shared_ref::SharedMutArc;
use crate::storage::CacheStore;
use crate::transport::Random;

/// How long a document loaded from the on-disk cache is still allowed to
/// install after its `valid_until` has passed, giving a client something to
/// bootstrap with briefly rather than rejecting a just-barely-stale cache
/// outright. Only applies to [`Source::FromCache`]; a freshly downloaded or
/// promoted-from-parked document is never subject to it.
pub const MAX_EXPIRED_CACHE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// How the bytes behind a candidate document reached us, which decides how
/// component F persists them (§4.F step 5) and whether the expired-cache
/// precondition applies.
#[derive(Clone, Copy, Debug)]
pub enum Source<'a> {
    /// Freshly fetched and verified bytes that were never parked; write
    /// them straight to the verified cache file.
    Fresh(&'a [u8]),
    /// The candidate is exactly what component D had parked for this
    /// flavor; promote the existing unverified file instead of rewriting
    /// it.
    Promoted,
    /// The candidate was loaded from component B's verified cache file at
    /// startup; subject to the [`MAX_EXPIRED_CACHE_AGE`] grace period
    /// instead of being installed unconditionally.
    FromCache,
}

/// How one routerstatus changed between the previous and new document, as
/// computed during install (§4.F step 2, feeding component G).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RelayChange {
    /// A new identity digest appeared.
    Added {
        /// The relay's identity digest.
        identity_digest: Vec<u8>,
    },
    /// A previously-listed identity digest is now gone.
    Removed {
        /// The relay's identity digest.
        identity_digest: Vec<u8>,
    },
    /// The identity digest persisted, but its descriptor digest or flags
    /// changed.
    Changed {
        /// The relay's identity digest.
        identity_digest: Vec<u8>,
    },
}

/// The successful result of [`ConsensusRegistry::install`]: the set of
/// per-relay changes a change notifier should publish, in identity-digest
/// order.
#[derive(Clone, Debug, Default)]
pub struct InstallOutcome {
    /// Changes relative to whatever was previously installed for this
    /// flavor (empty if nothing was previously installed).
    pub changes: Vec<RelayChange>,
}

/// Component F: one current-consensus slot per flavor.
#[derive(Debug, Default)]
pub struct ConsensusRegistry {
    slots: Flavored<SharedMutArc<Consensus>>,
}

impl ConsensusRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        ConsensusRegistry::default()
    }

    /// The currently installed document for `flavor`, if any.
    pub fn current(&self, flavor: Flavor) -> Option<Arc<Consensus>> {
        self.slots.get(flavor).get()
    }

    /// True if a document is installed for `flavor` and `now` falls within
    /// its full validity window.
    pub fn is_live(&self, flavor: Flavor, now: SystemTime) -> bool {
        self.current(flavor)
            .is_some_and(|c| c.lifetime.valid_at(now))
    }

    /// True if a document is installed for `flavor` and `now` is within
    /// its validity window extended by `slack` past `valid_until` — the
    /// "reasonably live" notion component K's bootstrap check uses so a
    /// client doesn't treat a consensus that expired moments ago as if it
    /// had never bootstrapped at all.
    pub fn is_reasonably_live(&self, flavor: Flavor, now: SystemTime, slack: Duration) -> bool {
        self.current(flavor).is_some_and(|c| {
            c.lifetime.valid_after <= now && now <= c.lifetime.valid_until + slack
        })
    }

    /// `install(flavor, candidate, source, ...)`: the full seven-step
    /// install procedure of §4.F.
    ///
    /// Preconditions are checked first and reported as the matching
    /// [`Error`] variant; none of them mutate any state.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        &self,
        flavor: Flavor,
        mut candidate: Consensus,
        source: Source<'_>,
        now: SystemTime,
        store: &dyn CacheStore,
        certwaiter: &mut CertWaiter,
        scheduler: &mut Scheduler,
        scheduler_env: &SchedulerEnv,
        random: &dyn Random,
    ) -> Result<InstallOutcome> {
        if candidate.flavor != flavor {
            return Err(Error::WrongFlavor {
                expected: flavor,
                found: candidate.flavor,
            });
        }
        if matches!(source, Source::FromCache) {
            let cutoff = now.checked_sub(MAX_EXPIRED_CACHE_AGE).unwrap_or(now);
            if candidate.lifetime.valid_until < cutoff {
                return Err(Error::ExpiredFromCache);
            }
        }

        let previous = self.current(flavor);
        if let Some(previous) = &previous {
            if candidate.lifetime.valid_after <= previous.lifetime.valid_after {
                if candidate.digests == previous.digests {
                    return Err(Error::Duplicate);
                }
                return Err(Error::AtLeastAsOldAsCurrent);
            }
        }

        // Step 1: carry forward per-relay download bookkeeping for any
        // routerstatus whose descriptor digest is unchanged, so a relay
        // that didn't re-publish its descriptor doesn't get its backoff
        // state reset for no reason.
        let changes = if let Some(previous) = &previous {
            let joined = merge_join_by_identity(&previous.routerstatuses, &candidate.routerstatuses);
            let mut changes = Vec::with_capacity(joined.len());
            let mut carry_over = std::collections::BTreeMap::new();
            for (old, new) in &joined {
                match (old, new) {
                    (Some(old), Some(new)) => {
                        if old.descriptor_digest == new.descriptor_digest && old.flags == new.flags {
                            carry_over.insert(new.identity_digest.clone(), old.download_status.clone());
                        } else {
                            changes.push(RelayChange::Changed {
                                identity_digest: new.identity_digest.clone(),
                            });
                            if old.descriptor_digest == new.descriptor_digest {
                                carry_over.insert(new.identity_digest.clone(), old.download_status.clone());
                            }
                        }
                    }
                    (Some(old), None) => changes.push(RelayChange::Removed {
                        identity_digest: old.identity_digest.clone(),
                    }),
                    (None, Some(new)) => changes.push(RelayChange::Added {
                        identity_digest: new.identity_digest.clone(),
                    }),
                    (None, None) => unreachable!("merge-join never yields a (None, None) pair"),
                }
            }
            for rs in &mut candidate.routerstatuses {
                if let Some(status) = carry_over.remove(&rs.identity_digest) {
                    rs.download_status = status;
                }
            }
            changes
        } else {
            candidate
                .routerstatuses
                .iter()
                .map(|rs| RelayChange::Added {
                    identity_digest: rs.identity_digest.clone(),
                })
                .collect()
        };

        // Step 2 (pre-change notification) is the caller's responsibility:
        // it can inspect `changes` on the previous document's data before
        // this call returns, since we haven't mutated the slot yet. We
        // proceed straight to replacement, matching the single-threaded
        // cooperative model of §5 (nothing else can observe the slot
        // between "compute diff" and "replace" without an intervening
        // await point).

        // Step 3: slot replacement.
        let valid_after = candidate.lifetime.valid_after;
        self.slots.get(flavor).replace(candidate);

        // Step 4: clear any parked document this install supersedes.
        certwaiter.clear_if_older(flavor, valid_after, store);

        // Step 5: persistence.
        match source {
            Source::Fresh(bytes) => {
                if let Err(e) = store.write(flavor, true, bytes) {
                    debug!(?flavor, error = %e, "failed to persist freshly installed consensus");
                }
            }
            Source::Promoted => {
                if let Err(e) = store.promote(flavor) {
                    debug!(?flavor, error = %e, "failed to promote unverified consensus to verified");
                }
            }
            // Already on disk as the verified file; nothing to persist.
            Source::FromCache => {}
        }

        // Step 6: schedule reset.
        if let Some(installed) = self.current(flavor) {
            scheduler.on_successful_install(flavor, &installed.lifetime, now, scheduler_env, random);
        }

        // Step 7 (post-change notification) is again the caller's job: it
        // has `changes` and can now also read the freshly installed
        // document back via `self.current(flavor)`.
        Ok(InstallOutcome { changes })
    }
}
