#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
//! # tor-consensus
//!
//! Fetch, validate, cache, and publish the authoritative consensus
//! networkstatus document used to build circuits and route traffic.
//!
//! This crate owns the multi-step download state machine with
//! certificate prerequisites (components D and E), threshold signature
//! validation over a document co-signed by a quorum of directory
//! authorities (component C), ordered document replacement across
//! "live"/"reasonably-live"/"bootstrap" time regimes (components F and
//! K), on-disk persistence of the `Ns` and `Microdesc` flavors with
//! atomic promotion of a quarantined version (component B), and a
//! change-notification fan-out to downstream subsystems (component G).
//! Parsing the signed document body, cryptographic primitives, and the
//! directory-fetch transport itself are all out of scope: see
//! [`transport`] for the traits this crate consumes instead of
//! implementing them.
//!
//! The entry point is [`Core`], which owns every component and is driven
//! by an external event loop calling [`Core::tick`] and its
//! `on_download_complete`/`on_download_failed`/`on_cert_arrived`
//! siblings. `Core` never suspends internally: fetches it wants launched
//! are returned as [`transport::FetchRequest`]s for the embedding
//! application's async runtime to execute.
// @@ begin lint list maintained by maint/add_warning @@
#![cfg_attr(not(ci_arti_stable), allow(renamed_and_removed_lints))]
#![cfg_attr(not(ci_arti_nightly), allow(unknown_lints))]
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unchecked_duration_subtraction)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_arguments)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

pub mod authority;
mod bootstrap;
pub mod certwaiter;
pub mod config;
pub mod consensus;
mod err;
pub mod event;
pub mod flavor;
pub mod paramresolver;
pub mod protover;
pub mod registry;
pub mod retry;
mod shared_ref;
pub mod scheduler;
pub mod sigvalidator;
pub mod storage;
pub mod transport;

use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use tracing::{debug, warn};

pub use authority::{default_authorities, Authority, AuthorityBuilder, AuthorityList};
pub use bootstrap::is_bootstrapping;
pub use config::{Config, ConfigBuilder, ConfigBuilderError, NodeRole};
pub use consensus::{Consensus, Lifetime, Routerstatus};
pub use err::{BootstrapAction, Error, Result};
pub use event::{ChangeNotifier, Event};
pub use flavor::Flavor;
pub use registry::{ConsensusRegistry, InstallOutcome, RelayChange, Source};
pub use scheduler::{Action, Scheduler};
pub use sigvalidator::Verdict;
pub use transport::{AuthorityStore, Cert, DirectoryTransport, FetchPurpose, FetchRequest, Parser, Random, SourcePolicy};

use certwaiter::CertWaiter;
use scheduler::{FlavorState, SchedulerEnv};
use sigvalidator::WarnLevel;
use storage::CacheStore;

/// The consensus networkstatus subsystem, owning components B through K
/// plus configuration and the out-of-scope collaborators it consumes.
///
/// Not a singleton: the embedding application constructs and threads its
/// own `Core`, exactly as `tor-dirmgr`'s `DirMgr<R: Runtime>` is threaded
/// by `arti-client`, but with the `Runtime` type parameter dropped in
/// favor of the single-threaded cooperative model of §5 — `Core`'s
/// methods never `.await`; an external event loop drives `tick` and the
/// `on_*` callbacks and executes whatever [`FetchRequest`]s they return.
#[derive(Debug)]
pub struct Core {
    /// Static and role configuration.
    config: Config,
    /// Component B.
    store: Box<dyn CacheStore>,
    /// Certificate lookups and denylisting (component C's collaborator).
    authorities: Box<dyn AuthorityStore>,
    /// The out-of-scope document parser.
    parser: Box<dyn Parser>,
    /// Jitter source for component E's `next_fetch_time`.
    random: Box<dyn Random>,
    /// Which flavor local policy actually uses to build circuits; drives
    /// component K and component E's bootstrap fan-out.
    usable_flavor: Flavor,
    /// Component F.
    registry: ConsensusRegistry,
    /// Component D.
    certwaiter: CertWaiter,
    /// Component E.
    scheduler: Scheduler,
    /// Component G.
    notifier: ChangeNotifier,
    /// Count of document fetches per flavor that have been handed back to
    /// the caller as a [`FetchRequest`] but not yet resolved via
    /// `on_download_complete`/`on_download_failed`, feeding component E's
    /// `in_flight` steady-state parallelism cap (§4.E).
    in_flight: flavor::Flavored<u32>,
    /// Sticky flag gating repeated warnings from
    /// [`Core::check_protocol_versions`] about a required protocol version
    /// this build cannot satisfy.
    have_warned_about_old_version: bool,
    /// Sticky flag gating repeated warnings from
    /// [`Core::check_protocol_versions`] about a recommended protocol
    /// version this build does not support.
    have_warned_about_new_version: bool,
}

impl Core {
    /// Construct a new `Core`.
    ///
    /// `usable_flavor` is the one flavor local policy relies on to build
    /// circuits; it drives component K's bootstrap query and component
    /// E's bootstrap parallel fan-out (§4.E step 5, §4.K).
    pub fn new(
        config: Config,
        store: Box<dyn CacheStore>,
        authorities: Box<dyn AuthorityStore>,
        parser: Box<dyn Parser>,
        random: Box<dyn Random>,
        usable_flavor: Flavor,
        now: SystemTime,
    ) -> Self {
        let scheduler = Scheduler::new(now, config.schedule);
        Core {
            config,
            store,
            authorities,
            parser,
            random,
            usable_flavor,
            registry: ConsensusRegistry::new(),
            certwaiter: CertWaiter::new(),
            scheduler,
            notifier: ChangeNotifier::new(),
            in_flight: flavor::Flavored::new(|_| 0),
            have_warned_about_old_version: false,
            have_warned_about_new_version: false,
        }
    }

    /// `latest(flavor)`: the currently installed document, if any.
    pub fn latest(&self, flavor: Flavor) -> Option<Arc<Consensus>> {
        self.registry.current(flavor)
    }

    /// `live(flavor, now)`: is there an installed document whose full
    /// validity window contains `now`?
    pub fn live(&self, flavor: Flavor, now: SystemTime) -> bool {
        self.registry.is_live(flavor, now)
    }

    /// `reasonably_live(flavor, now)`: as [`Core::live`], but tolerant of
    /// `now` up to [`Config::reasonably_live_slack`] past `valid_until`.
    pub fn reasonably_live(&self, flavor: Flavor, now: SystemTime) -> bool {
        self.registry
            .is_reasonably_live(flavor, now, self.config.reasonably_live_slack)
    }

    /// Component J: `by_identity(flavor, digest)`.
    pub fn by_identity(&self, flavor: Flavor, digest: &[u8]) -> Option<Routerstatus> {
        self.registry.current(flavor)?.by_identity(digest).cloned()
    }

    /// Component J: `by_descriptor(flavor, digest)`.
    pub fn by_descriptor(&self, flavor: Flavor, digest: &[u8]) -> Option<Routerstatus> {
        self.registry.current(flavor)?.by_descriptor(digest).cloned()
    }

    /// Component H: `get_int(flavor, name, default, low, high)`, honoring
    /// a configured override and falling back to `default` (itself
    /// clipped) when no document is installed yet.
    pub fn get_int(&self, flavor: Flavor, name: &str, default: i32, low: i32, high: i32) -> i32 {
        match self.registry.current(flavor) {
            Some(doc) => paramresolver::get_overridable_int(&doc, &self.config.override_net_params, name, default, low, high),
            None => self
                .config
                .override_net_params
                .get(name)
                .copied()
                .unwrap_or(default)
                .clamp(low, high),
        }
    }

    /// Component H: `get_bw_weight(flavor, name, default)`.
    pub fn get_bw_weight(&self, flavor: Flavor, name: &str, default: i32) -> i32 {
        match self.registry.current(flavor) {
            Some(doc) => paramresolver::get_bw_weight(&doc, name, default),
            None => default.clamp(-1, i32::MAX),
        }
    }

    /// Component K: `is_bootstrapping(now)`, evaluated against the
    /// `usable_flavor` passed to [`Core::new`].
    pub fn is_bootstrapping(&self, now: SystemTime) -> bool {
        bootstrap::is_bootstrapping(now, self.usable_flavor, &self.registry, &self.certwaiter, self.config.reasonably_live_slack)
    }

    /// Component I: `check_protocol_versions(flavor, role, supported,
    /// approx_release)`. Returns `None` if no document is installed for
    /// `flavor` yet. Warns via `tracing` at most once per sticky flag per
    /// process — see [`Core::reset_warnings`] — mirroring
    /// `have_warned_about_old_version`/`have_warned_about_new_version` in
    /// `original_source/networkstatus.c`, adapted from that function's
    /// recommended-version-string comparison (out of scope here; see §1)
    /// to this crate's protocol-version-set comparison.
    pub fn check_protocol_versions(
        &mut self,
        flavor: Flavor,
        role: protover::Role,
        supported: &protover::ProtoSet,
        approx_release: SystemTime,
    ) -> Option<protover::VersionCheckOutcome> {
        let doc = self.registry.current(flavor)?;
        let outcome = protover::check(&doc, role, supported, approx_release);
        if outcome.must_exit {
            if !self.have_warned_about_old_version {
                warn!(?flavor, ?role, "directory authorities require a protocol version this build does not support");
                self.have_warned_about_old_version = true;
            }
        } else if outcome.warning.is_some() && !self.have_warned_about_new_version {
            warn!(?flavor, ?role, "directory authorities recommend a protocol version this build does not support");
            self.have_warned_about_new_version = true;
        }
        Some(outcome)
    }

    /// Clear both of [`Core::check_protocol_versions`]'s sticky warning
    /// flags, letting a subsequent unchanged outcome warn again (e.g. after
    /// an embedding application reloads its configuration).
    pub fn reset_warnings(&mut self) {
        self.have_warned_about_old_version = false;
        self.have_warned_about_new_version = false;
    }

    /// Subscribe to component G's change notifications.
    pub fn events(&self) -> postage::watch::Receiver<Event> {
        self.notifier.subscribe()
    }

    /// Component E: `tick(now)`. Returns the [`Action`]s the caller
    /// should execute: a [`FetchRequest`] via [`DirectoryTransport`], or
    /// a certificate refresh via [`AuthorityStore::fetch_missing`] fed
    /// with [`Core::certs_wanted_for`].
    pub fn tick(&mut self, now: SystemTime) -> Vec<Action> {
        let env = self.config.scheduler_env();
        let registry = &self.registry;
        let certwaiter = &mut self.certwaiter;
        let scheduler = &mut self.scheduler;
        let usable_flavor = self.usable_flavor;
        let in_flight = &self.in_flight;
        let state = flavor::Flavored::new(|flavor| {
            flavor_state(registry, certwaiter, scheduler, flavor, now, usable_flavor, *in_flight.get(flavor))
        });
        let actions = self.scheduler.tick(now, &env, &state);
        for action in &actions {
            if let Action::FetchDocument(request) = action {
                if let FetchPurpose::Consensus(flavor) = request.purpose {
                    *self.in_flight.get_mut(flavor) += 1;
                }
            }
        }
        actions
    }

    /// The document component E's `RefreshCertificates` action concerns,
    /// for a caller that needs to hand something to
    /// [`AuthorityStore::fetch_missing`]: the parked document if one
    /// exists, else the currently installed one.
    pub fn certs_wanted_for(&self, flavor: Flavor) -> Option<Arc<Consensus>> {
        if let Some(parked) = self.certwaiter.parked(flavor) {
            return Some(Arc::new(parked.clone()));
        }
        self.registry.current(flavor)
    }

    /// Credit a failed document fetch to component E's steady schedule.
    pub fn on_download_failed(&mut self, flavor: Flavor, now: SystemTime) {
        let in_flight = self.in_flight.get_mut(flavor);
        *in_flight = in_flight.saturating_sub(1);
        self.scheduler.report_failure(flavor, now);
    }

    /// Handle newly downloaded consensus bytes for `flavor`: parse,
    /// validate, and either install (component F), park pending
    /// certificates (component D), or reject.
    ///
    /// On `Err(Error::WaitingForCerts)`, the document has been parked and
    /// the caller should launch a certificate fetch via
    /// [`AuthorityStore::fetch_missing`] (fed by
    /// [`Core::certs_wanted_for`]); this is not a scheduler failure. All
    /// other `Err` variants credit component E's steady schedule with a
    /// failure.
    pub fn on_download_complete(&mut self, flavor: Flavor, bytes: Vec<u8>, now: SystemTime) -> Result<InstallOutcome> {
        let in_flight = self.in_flight.get_mut(flavor);
        *in_flight = in_flight.saturating_sub(1);

        let consensus = self
            .parser
            .parse(&bytes)
            .map_err(|e| Error::UnparseableDocument(Arc::new(e)))?;

        if consensus.flavor != flavor {
            self.scheduler.report_failure(flavor, now);
            return Err(Error::WrongFlavor {
                expected: flavor,
                found: consensus.flavor,
            });
        }

        let verdict = sigvalidator::validate(&consensus, &self.config.authorities, self.authorities.as_ref(), WarnLevel::WarnOnInsufficient);
        match verdict {
            Verdict::FullyVerified | Verdict::QuorumVerified => self.install(flavor, consensus, Source::Fresh(&bytes), now),
            Verdict::NeedsMoreCerts => {
                debug!(?flavor, "consensus parked pending authority certificates");
                self.certwaiter.park(flavor, consensus, &bytes, now, self.store.as_ref());
                Err(Error::WaitingForCerts)
            }
            Verdict::Insufficient => {
                self.scheduler.report_failure(flavor, now);
                Err(Error::InsufficientSignatures)
            }
        }
    }

    /// Handle a certificate having arrived: re-validate whatever
    /// component D has parked for `flavor`, promoting it into component F
    /// on success.
    pub fn on_cert_arrived(&mut self, flavor: Flavor, now: SystemTime) -> Result<InstallOutcome> {
        let Some(parked) = self.certwaiter.parked(flavor).cloned() else {
            return Err(Error::Bug("on_cert_arrived called with nothing parked for this flavor".into()));
        };

        let verdict = sigvalidator::validate(&parked, &self.config.authorities, self.authorities.as_ref(), WarnLevel::WarnOnInsufficient);
        match verdict {
            Verdict::FullyVerified | Verdict::QuorumVerified => self.install(flavor, parked, Source::Promoted, now),
            Verdict::NeedsMoreCerts => Err(Error::WaitingForCerts),
            Verdict::Insufficient => {
                self.scheduler.report_failure(flavor, now);
                Err(Error::InsufficientSignatures)
            }
        }
    }

    /// Load component B's cached bytes into F and D at startup, per §4.B
    /// ("B feeds F at startup"): for every flavor, the verified cache file
    /// (if any) is parsed, validated, and installed via
    /// [`Source::FromCache`] (subject to `install`'s
    /// `MAX_EXPIRED_CACHE_AGE` grace period rather than being treated as a
    /// fresh download); the unverified cache file (if any) is parsed and
    /// either installed by promoting it (its certificates turned out to
    /// already be sufficient) or re-parked in D, exactly as if it had just
    /// been downloaded again. Failures are logged and otherwise ignored:
    /// a corrupt or stale cache should not prevent bootstrapping from
    /// scratch.
    pub fn load_from_cache(&mut self, now: SystemTime) {
        for flavor in Flavor::ALL {
            self.load_one_from_cache(flavor, now);
        }
    }

    /// One flavor's worth of [`Core::load_from_cache`].
    fn load_one_from_cache(&mut self, flavor: Flavor, now: SystemTime) {
        match self.store.read(flavor, true) {
            Ok(Some(bytes)) => match self.parser.parse(bytes.as_ref()) {
                Ok(consensus) if consensus.flavor == flavor => {
                    let verdict = sigvalidator::validate(&consensus, &self.config.authorities, self.authorities.as_ref(), WarnLevel::Quiet);
                    if matches!(verdict, Verdict::FullyVerified | Verdict::QuorumVerified) {
                        if let Err(e) = self.install(flavor, consensus, Source::FromCache, now) {
                            debug!(?flavor, error = %e, "cached verified consensus not installed");
                        }
                    } else {
                        debug!(?flavor, ?verdict, "cached verified consensus no longer has enough signatures");
                    }
                }
                Ok(_) => debug!(?flavor, "cached verified consensus has the wrong flavor; ignoring"),
                Err(e) => debug!(?flavor, error = %e, "could not parse cached verified consensus"),
            },
            Ok(None) => {}
            Err(e) => debug!(?flavor, error = %e, "could not read cached verified consensus"),
        }

        match self.store.read(flavor, false) {
            Ok(Some(bytes)) => match self.parser.parse(bytes.as_ref()) {
                Ok(consensus) if consensus.flavor == flavor => {
                    let verdict = sigvalidator::validate(&consensus, &self.config.authorities, self.authorities.as_ref(), WarnLevel::Quiet);
                    match verdict {
                        Verdict::FullyVerified | Verdict::QuorumVerified => {
                            if let Err(e) = self.install(flavor, consensus, Source::Promoted, now) {
                                debug!(?flavor, error = %e, "cached unverified consensus not installed");
                            }
                        }
                        Verdict::NeedsMoreCerts => {
                            self.certwaiter.park(flavor, consensus, bytes.as_ref(), now, self.store.as_ref());
                        }
                        Verdict::Insufficient => {
                            debug!(?flavor, "cached unverified consensus has insufficient signatures; discarding");
                        }
                    }
                }
                Ok(_) => debug!(?flavor, "cached unverified consensus has the wrong flavor; ignoring"),
                Err(e) => debug!(?flavor, error = %e, "could not parse cached unverified consensus"),
            },
            Ok(None) => {}
            Err(e) => debug!(?flavor, error = %e, "could not read cached unverified consensus"),
        }
    }

    /// Shared install path for both the freshly-fetched and
    /// promoted-from-cert-wait cases.
    fn install(&mut self, flavor: Flavor, candidate: Consensus, source: Source<'_>, now: SystemTime) -> Result<InstallOutcome> {
        let env = self.config.scheduler_env();
        let outcome = self.registry.install(
            flavor,
            candidate,
            source,
            now,
            self.store.as_ref(),
            &mut self.certwaiter,
            &mut self.scheduler,
            &env,
            self.random.as_ref(),
        );
        match outcome {
            Ok(outcome) => {
                self.notifier.publish(Event::Installed {
                    flavor,
                    changes: Arc::new(outcome.changes.clone()),
                });
                Ok(outcome)
            }
            Err(e) => {
                if !matches!(e, Error::Duplicate) {
                    self.scheduler.report_failure(flavor, now);
                }
                Err(e)
            }
        }
    }
}

/// Build one flavor's [`FlavorState`] for [`Core::tick`], probing
/// component D's wait state against component E's steady schedule. A free
/// function (rather than a `Core` method) so the disjoint `&mut
/// CertWaiter` / `&mut Scheduler` borrows it needs don't have to fight
/// over `&mut self`.
fn flavor_state(
    registry: &ConsensusRegistry,
    certwaiter: &mut CertWaiter,
    scheduler: &mut Scheduler,
    flavor: Flavor,
    now: SystemTime,
    usable_flavor: Flavor,
    in_flight: u32,
) -> FlavorState {
    let has_live_current_doc = registry.is_live(flavor, now);
    let cert_wait = certwaiter.probe(flavor, now, scheduler.steady_mut(flavor));
    FlavorState {
        has_live_current_doc,
        cert_wait,
        is_usable_flavor: flavor == usable_flavor,
        in_flight: in_flight as usize,
    }
}
