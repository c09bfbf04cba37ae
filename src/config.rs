//! Configuration for the consensus networkstatus subsystem.
//!
//! Grounded on `tor-dirmgr`'s `DirMgrConfig`, but rebuilt with
//! [`derive_builder`] in the style of [`crate::authority::Authority`]'s
//! builder: unlike the teacher, this crate doesn't have an `arti-client`
//! consumer gluing every field together by hand, so letting the struct grow
//! optional fields without breaking callers is worth the small indirection.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;

use crate::authority::{default_authorities, AuthorityList};
use crate::retry::DownloadSchedule;
use crate::scheduler::SchedulerEnv;

/// This node's role (distinct from `protover::Role`, which picks which
/// protocol table to check), deciding when [`crate::scheduler`] fetches
/// directory information relative to a document's validity window (§4.E).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum NodeRole {
    /// An ordinary client: fetch once safely within the voting interval.
    #[default]
    Client,
    /// A directory cache: fetch early so other clients can rely on us.
    Cache,
    /// A directory authority: fetch as early as possible.
    Authority,
}

/// Configuration for the consensus networkstatus subsystem.
#[derive(Debug, Clone, Builder)]
#[builder(derive(Debug), build_fn(validate = "Self::validate"))]
pub struct Config {
    /// Location to use for storing and reading cached consensus documents.
    #[builder(setter(into))]
    pub cache_dir: PathBuf,

    /// Rules for whether to trust the permissions on `cache_dir`.
    #[builder(default)]
    pub cache_trust: fs_mistrust::Mistrust,

    /// The set of directory authorities trusted to co-sign a consensus.
    #[builder(default = "default_authorities()")]
    pub authorities: AuthorityList,

    /// How to retry a single failed document or certificate fetch.
    #[builder(default)]
    pub schedule: DownloadSchedule,

    /// Network parameters that override the consensus's signed values,
    /// taking effect on the next successful install (component H).
    #[builder(default)]
    pub override_net_params: BTreeMap<String, i32>,

    /// This node's role, affecting component E's `next_fetch_time` formula.
    #[builder(default)]
    pub role: NodeRole,

    /// Whether this client connects via bridges rather than directly.
    #[builder(default)]
    pub use_bridges: bool,

    /// Disable all network activity: component E's `tick` becomes a no-op
    /// and component K reports permanently not-bootstrapped.
    #[builder(default)]
    pub disable_network: bool,

    /// Accept descriptors/microdescriptors that no circuit-building policy
    /// would actually use. This crate doesn't build circuits or fetch
    /// descriptors itself (both out of scope per §1); the flag is carried
    /// here only so a value configured once at the `arti-client` layer has
    /// somewhere to live alongside the other directory-fetch knobs.
    #[builder(default)]
    pub fetch_useless_descriptors: bool,

    /// Accept relay identities extended with an Ed25519 component. As with
    /// `fetch_useless_descriptors`, parsing such identities is the
    /// out-of-scope parser's job; this flag only rides along.
    #[builder(default = "true")]
    pub extend_by_ed25519_id: bool,

    /// How many bootstrap fetches to allow in flight at once, per §4.E
    /// step 5 (`ClientBootstrapConsensusMaxInProgressTries`).
    #[builder(default = "3")]
    pub max_parallel_bootstrap: u8,

    /// Slack applied past `valid_until` when component K decides whether an
    /// installed document is still "reasonably live" (§4.K: within roughly
    /// a day of `valid_after`).
    #[builder(default = "Duration::from_secs(24 * 60 * 60)")]
    pub reasonably_live_slack: Duration,
}

impl Config {
    /// Start building a new `Config`.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Derive the [`SchedulerEnv`] component E's `tick` needs from this
    /// configuration.
    pub fn scheduler_env(&self) -> SchedulerEnv {
        SchedulerEnv {
            downloads_deferred: self.disable_network,
            fetch_dir_info_early: matches!(self.role, NodeRole::Cache),
            fetch_dir_info_extra_early: matches!(self.role, NodeRole::Authority),
            is_client: matches!(self.role, NodeRole::Client),
            use_bridges: self.use_bridges,
            max_parallel_bootstrap: self.max_parallel_bootstrap,
        }
    }
}

impl ConfigBuilder {
    /// Cross-field validation: `max_parallel_bootstrap` of zero would make
    /// bootstrap progress impossible.
    fn validate(&self) -> std::result::Result<(), ConfigBuilderError> {
        if self.max_parallel_bootstrap == Some(0) {
            return Err(ConfigBuilderError::ValidationError(
                "max_parallel_bootstrap must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::builder().cache_dir("/tmp/nonexistent").build().unwrap();
        assert_eq!(cfg.authorities.len(), default_authorities().len());
        assert_eq!(cfg.role, NodeRole::Client);
        assert!(!cfg.disable_network);
        assert_eq!(cfg.max_parallel_bootstrap, 3);
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = Config::builder()
            .cache_dir("/tmp/nonexistent")
            .max_parallel_bootstrap(0)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn scheduler_env_reflects_role() {
        let cfg = Config::builder()
            .cache_dir("/tmp/nonexistent")
            .role(NodeRole::Cache)
            .build()
            .unwrap();
        let env = cfg.scheduler_env();
        assert!(env.fetch_dir_info_early);
        assert!(!env.fetch_dir_info_extra_early);
    }

    #[test]
    fn missing_cache_dir_is_rejected() {
        assert!(Config::builder().build().is_err());
    }
}
