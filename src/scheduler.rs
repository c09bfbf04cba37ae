//! Component E: the download scheduler.
//!
//! Decides when, from whom, and how many parallel document fetches to
//! launch, and tracks per-flavor failure backoff. Grounded on
//! `update_consensus_networkstatus_fetch_time_impl` and
//! `update_consensus_networkstatus_downloads` in
//! `original_source/networkstatus.c`, with the per-schedule backoff timer
//! itself reusing `tor-dirmgr`'s [`crate::retry::DownloadSchedule`] /
//! `tor_basic_utils::retry::RetryDelay` machinery rather than
//! reimplementing decorrelated jitter from scratch.

use std::time::{Duration, SystemTime};

use tor_basic_utils::retry::RetryDelay;
use tracing::{debug, trace};

use crate::certwaiter::WaitDecision;
use crate::consensus::Lifetime;
use crate::flavor::{Flavor, Flavored};
use crate::retry::DownloadSchedule as RetryConfig;
use crate::transport::{FetchPurpose, FetchRequest, SourcePolicy};

/// How a [`DocumentSchedule`] advances its next-attempt time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IncrementRule {
    /// Advance based on consecutive failures (steady-state backoff).
    ByFailure,
    /// Advance based on attempts made, regardless of outcome (bootstrap
    /// parallel-fetch policy).
    ByAttempt,
}

/// One schedule's worth of "when may we next try, and how many times have
/// we tried" bookkeeping, per §3's download-status record.
#[derive(Debug, Clone)]
pub struct DocumentSchedule {
    next_attempt_at: SystemTime,
    n_failures: u32,
    n_attempts: u32,
    increment: IncrementRule,
    source_policy: SourcePolicy,
    retry_config: RetryConfig,
    backoff: RetryDelay,
}

impl DocumentSchedule {
    /// Construct a schedule that is immediately ready to fire.
    fn ready_now(now: SystemTime, increment: IncrementRule, source_policy: SourcePolicy, config: RetryConfig) -> Self {
        DocumentSchedule {
            next_attempt_at: now,
            n_failures: 0,
            n_attempts: 0,
            increment,
            source_policy,
            retry_config: config,
            backoff: config.schedule(),
        }
    }

    /// The steady-state schedule: by-failure increment, no source
    /// preference.
    pub fn steady_ready_now(now: SystemTime, config: RetryConfig) -> Self {
        Self::ready_now(now, IncrementRule::ByFailure, SourcePolicy::Any, config)
    }

    /// The authority-only bootstrap schedule: by-attempt increment.
    pub fn bootstrap_authority_ready_now(now: SystemTime, config: RetryConfig) -> Self {
        Self::ready_now(now, IncrementRule::ByAttempt, SourcePolicy::AuthorityOnly, config)
    }

    /// The fallback-mirror bootstrap schedule: by-attempt increment.
    pub fn bootstrap_fallback_ready_now(now: SystemTime, config: RetryConfig) -> Self {
        Self::ready_now(now, IncrementRule::ByAttempt, SourcePolicy::FallbackOnly, config)
    }

    /// True if this schedule's next-attempt time has arrived.
    pub fn ready(&self, now: SystemTime) -> bool {
        now >= self.next_attempt_at
    }

    /// Number of consecutive failures since the last success.
    pub fn n_failures(&self) -> u32 {
        self.n_failures
    }

    /// Total attempts since the last success.
    pub fn n_attempts(&self) -> u32 {
        self.n_attempts
    }

    /// The next time this schedule will be ready.
    pub fn next_attempt_at(&self) -> SystemTime {
        self.next_attempt_at
    }

    /// Credit a failed fetch: bumps both counters and, for a `ByFailure`
    /// schedule, pushes `next_attempt_at` out via the backoff timer.
    pub fn report_failure(&mut self, now: SystemTime) {
        self.n_failures += 1;
        self.n_attempts += 1;
        if self.increment == IncrementRule::ByFailure {
            self.advance(now);
        }
    }

    /// Reset failure/attempt counters and the backoff timer, e.g. after a
    /// successful install (§4.F step 6).
    pub fn reset(&mut self, now: SystemTime) {
        self.n_failures = 0;
        self.n_attempts = 0;
        self.backoff = self.retry_config.schedule();
        self.next_attempt_at = now;
    }

    /// Record a launch from a `ByAttempt` schedule: bumps the attempt
    /// counter and advances `next_attempt_at`, so that a bootstrap tick
    /// that launches several fetches back-to-back still ends with a
    /// sensible next-attempt time (§4.E step 5).
    pub fn record_attempt_launch(&mut self, now: SystemTime) {
        self.n_attempts += 1;
        if self.increment == IncrementRule::ByAttempt {
            self.advance(now);
        }
    }

    /// Directly set `next_attempt_at`, used by the success-path
    /// `next_fetch_time` recalculation (§4.E).
    pub fn set_next_attempt_at(&mut self, when: SystemTime) {
        self.next_attempt_at = when;
    }

    /// Advance `next_attempt_at` by the backoff schedule's next delay.
    fn advance(&mut self, now: SystemTime) {
        let mut rng = rand::thread_rng();
        let delay = self.backoff.next_delay(&mut rng);
        self.next_attempt_at = now + delay;
    }
}

/// Environment flags bearing on §4.E's decisions, read from configuration
/// and the local node's role.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerEnv {
    /// `DisableNetwork`, hibernating, or bridge prerequisites unmet: all
    /// downloads are globally deferred.
    pub downloads_deferred: bool,
    /// This node is a directory cache that fetches early.
    pub fetch_dir_info_early: bool,
    /// As above, but even earlier (authorities and fast caches).
    pub fetch_dir_info_extra_early: bool,
    /// This node is a client (not itself a cache or authority).
    pub is_client: bool,
    /// This node uses bridges.
    pub use_bridges: bool,
    /// Maximum parallel bootstrap fetches to allow for the usable flavor.
    pub max_parallel_bootstrap: u8,
}

/// Per-tick, per-flavor facts the scheduler needs but doesn't own: whether a
/// current document exists and is within its validity window, the
/// certificate-wait state, and whether this is the flavor bootstrap
/// parallelism applies to.
#[derive(Clone, Copy, Debug)]
pub struct FlavorState {
    /// Is there a currently installed document for this flavor, and is
    /// `now` within `[valid_after, valid_until]`?
    pub has_live_current_doc: bool,
    /// Result of probing the certificate waiter for this flavor.
    pub cert_wait: WaitDecision,
    /// True for the one flavor the local policy actually uses to build
    /// circuits (§4.E step 5's "usable" flavor).
    pub is_usable_flavor: bool,
    /// Number of fetches already in flight for this flavor's steady
    /// resource.
    pub in_flight: usize,
}

/// A decision to launch a fetch, or to instead request a certificate
/// refresh.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    /// Launch a document fetch.
    FetchDocument(FetchRequest),
    /// Ask the certificate subsystem to refresh (steady-state, while
    /// waiting on certs).
    RefreshCertificates,
}

/// Component E: one steady and two bootstrap schedules, per flavor.
#[derive(Debug)]
pub struct Scheduler {
    steady: Flavored<DocumentSchedule>,
    bootstrap_authority: Flavored<DocumentSchedule>,
    bootstrap_fallback: Flavored<DocumentSchedule>,
}

impl Scheduler {
    /// Construct a scheduler with every schedule ready to fire immediately,
    /// using `retry_config` (§6, from [`crate::Config::schedule`]) for each
    /// schedule's per-fetch backoff timer.
    pub fn new(now: SystemTime, retry_config: RetryConfig) -> Self {
        Scheduler {
            steady: Flavored::new(|_| DocumentSchedule::steady_ready_now(now, retry_config)),
            bootstrap_authority: Flavored::new(|_| DocumentSchedule::bootstrap_authority_ready_now(now, retry_config)),
            bootstrap_fallback: Flavored::new(|_| DocumentSchedule::bootstrap_fallback_ready_now(now, retry_config)),
        }
    }

    /// Borrow the steady schedule for `flavor` (exposed so [`crate::Core`]
    /// can hand it to the certificate waiter's `probe`).
    pub fn steady_mut(&mut self, flavor: Flavor) -> &mut DocumentSchedule {
        self.steady.get_mut(flavor)
    }

    /// `report_failure(flavor, status_code)`: credit the steady schedule.
    /// The spec says this should "re-invoke tick(now) immediately"; that
    /// orchestration is [`crate::Core`]'s job; this method just updates
    /// state.
    pub fn report_failure(&mut self, flavor: Flavor, now: SystemTime) {
        self.steady.get_mut(flavor).report_failure(now);
    }

    /// On a successful install, reset the steady schedule's failure count
    /// and recompute `next_fetch_time` per §4.E's formula.
    pub fn on_successful_install(&mut self, flavor: Flavor, lifetime: &Lifetime, now: SystemTime, env: &SchedulerEnv, random: &dyn crate::transport::Random) {
        let schedule = self.steady.get_mut(flavor);
        schedule.reset(now);
        let next = next_fetch_time(lifetime, env, random);
        schedule.set_next_attempt_at(next);
    }

    /// `tick(now)`: the full per-flavor decision procedure of §4.E, run in
    /// flavor declaration order. Returns the actions to take, in order;
    /// callers perform the actual fetch launches and advance in-flight
    /// counters accordingly.
    pub fn tick(&mut self, now: SystemTime, env: &SchedulerEnv, state: &Flavored<FlavorState>) -> Vec<Action> {
        let mut actions = Vec::new();
        if env.downloads_deferred {
            trace!("downloads globally deferred; skipping tick");
            return actions;
        }

        for (flavor, fl_state) in state.iter() {
            if !fl_state.has_live_current_doc {
                // Step 2: no usable current document; force immediate fetch.
                self.steady.get_mut(flavor).set_next_attempt_at(now);
            }

            if fl_state.is_usable_flavor {
                self.bootstrap_tick(flavor, now, env, fl_state, &mut actions);
            }

            self.steady_tick(flavor, now, fl_state, &mut actions);
        }

        actions
    }

    /// Steady-state decision (§4.E steps 3,4,6).
    fn steady_tick(&mut self, flavor: Flavor, now: SystemTime, fl_state: &FlavorState, actions: &mut Vec<Action>) {
        let schedule = self.steady.get_mut(flavor);
        if !schedule.ready(now) {
            return;
        }
        const MAX_PARALLEL_STEADY: usize = 1;
        if fl_state.in_flight >= MAX_PARALLEL_STEADY {
            return;
        }
        if fl_state.cert_wait == WaitDecision::StillWaiting {
            debug!(?flavor, "still waiting on certificates; requesting a refresh instead of a new fetch");
            actions.push(Action::RefreshCertificates);
            return;
        }
        schedule.record_attempt_launch(now);
        actions.push(Action::FetchDocument(FetchRequest {
            purpose: FetchPurpose::Consensus(flavor),
            resource: format!("consensus/{}", flavor.name()),
            source_policy: SourcePolicy::Any,
        }));
    }

    /// Bootstrap parallel-launch decision for the usable flavor (§4.E step
    /// 5): launch from the other bootstrap schedule unless it reports
    /// `StillWaiting`, advancing it (possibly more than once per tick, per
    /// its own by-attempt schedule).
    fn bootstrap_tick(&mut self, flavor: Flavor, now: SystemTime, env: &SchedulerEnv, fl_state: &FlavorState, actions: &mut Vec<Action>) {
        if fl_state.cert_wait == WaitDecision::StillWaiting {
            return;
        }
        let max_parallel = env.max_parallel_bootstrap.max(1) as usize;
        for schedule in [&mut self.bootstrap_authority, &mut self.bootstrap_fallback] {
            let sched = schedule.get_mut(flavor);
            let mut launched = 0;
            while sched.ready(now) && launched < max_parallel {
                sched.record_attempt_launch(now);
                actions.push(Action::FetchDocument(FetchRequest {
                    purpose: FetchPurpose::Consensus(flavor),
                    resource: format!("consensus/{}", flavor.name()),
                    source_policy: sched.source_policy,
                }));
                launched += 1;
            }
        }
    }
}

/// `next_fetch_time` recalculation (§4.E), run after a successful install.
///
/// `I = fresh_until - valid_after`; `S = max(1, min(120, I/16))` is the
/// minimum slack before caching. Early-fetching caches start right after
/// `fresh_until + S`; regular clients wait three quarters of the way
/// through the interval. Bridge users get an additional shift to land
/// after the cache window. The window is clamped to be at least one second
/// and to keep `start + window` strictly inside `valid_until`.
pub fn next_fetch_time(lifetime: &Lifetime, env: &SchedulerEnv, random: &dyn crate::transport::Random) -> SystemTime {
    let interval = lifetime
        .fresh_until
        .duration_since(lifetime.valid_after)
        .unwrap_or_default();
    let interval_secs = interval.as_secs().max(1);
    let slack_secs = interval_secs.div_ceil(16).clamp(1, 120);
    let slack = Duration::from_secs(slack_secs);

    let (mut start, mut window) = if env.fetch_dir_info_early || env.fetch_dir_info_extra_early {
        let start = lifetime.fresh_until + slack;
        let window_secs = if env.fetch_dir_info_extra_early {
            60
        } else {
            (interval_secs / 2).max(1)
        };
        (start, Duration::from_secs(window_secs))
    } else {
        let three_quarters = Duration::from_secs((interval_secs * 3) / 4);
        let start = lifetime.valid_after + three_quarters;
        let remaining = lifetime
            .valid_until
            .duration_since(start)
            .unwrap_or(Duration::from_secs(1));
        let window_secs = (remaining.as_secs() * 7) / 8;
        (start, Duration::from_secs(window_secs.max(1)))
    };

    if env.use_bridges {
        // Bridge users shift start past the cache window so they don't
        // compete with the cache-fetching traffic pattern.
        start += window;
    }

    if window < Duration::from_secs(1) {
        window = Duration::from_secs(1);
    }
    if start + window >= lifetime.valid_until {
        let cap = lifetime
            .valid_until
            .duration_since(start)
            .unwrap_or(Duration::from_secs(2));
        window = if cap > Duration::from_secs(1) {
            cap - Duration::from_secs(1)
        } else {
            Duration::from_secs(1)
        };
    }

    let jitter_secs = random.uniform_int(window.as_secs().max(1));
    start + Duration::from_secs(jitter_secs)
}
