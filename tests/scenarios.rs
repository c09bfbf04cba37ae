//! End-to-end scenarios against a fully in-memory [`tor_consensus::Core`],
//! covering the literal S1-S6 walkthroughs: cold start, cert-waiting,
//! cert-wait timeout, ordered replacement with carry-forward, stale-document
//! rejection, and parameter resolution.
//!
//! Parsing real consensus text is out of scope for this crate (see
//! `tor_consensus::transport::Parser`), so every scenario builds its
//! `Consensus` fixtures directly and feeds them through a queue-based fake
//! parser, the way `tor-dirmgr`'s own integration tests stand in for a real
//! directory-fetch transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use tor_consensus::consensus::{
    DigestAlgorithm, DownloadStatus, IncrementRule, RelayFlags, RelayWeight, Routerstatus, Signature,
    Voter,
};
use tor_consensus::transport::ParseError;
use tor_consensus::{
    Action, Authority, AuthorityList, AuthorityStore, Cert, Config, Consensus, Core, Error, Flavor,
    FetchPurpose, Lifetime, Parser, Random, Result as StoreResult, SourcePolicy,
};
use tor_consensus::storage::{CacheStore, DocumentBytes};

#[derive(Debug, Default)]
struct MemStore;

impl CacheStore for MemStore {
    fn read(&self, _flavor: Flavor, _verified: bool) -> StoreResult<Option<DocumentBytes>> {
        Ok(None)
    }
    fn write(&self, _flavor: Flavor, _verified: bool, _bytes: &[u8]) -> StoreResult<()> {
        Ok(())
    }
    fn promote(&self, _flavor: Flavor) -> StoreResult<()> {
        Ok(())
    }
    fn erase(&self, _flavor: Flavor, _verified: bool) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeAuthorityStore {
    good_signing_keys: Mutex<Vec<[u8; 20]>>,
}

#[async_trait]
impl AuthorityStore for FakeAuthorityStore {
    fn get(&self, identity_digest: &[u8; 20], signing_key_digest: &[u8; 20]) -> Option<Cert> {
        if self.good_signing_keys.lock().expect("poisoned").contains(signing_key_digest) {
            Some(Cert {
                identity_digest: *identity_digest,
                signing_key_digest: *signing_key_digest,
                expires: SystemTime::UNIX_EPOCH + Duration::from_secs(365 * 24 * 3600 * 10),
            })
        } else {
            None
        }
    }
    fn is_denylisted(&self, _cert: &Cert) -> bool {
        false
    }
    async fn fetch_missing(&self, _document: &Consensus, _now: SystemTime, _preferred_source: SourcePolicy) {}
    fn downloads_failing(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct QueuedParser {
    next: Arc<Mutex<Option<Consensus>>>,
}

impl Parser for QueuedParser {
    fn parse(&self, _bytes: &[u8]) -> std::result::Result<Consensus, ParseError> {
        self.next
            .lock()
            .expect("poisoned")
            .take()
            .ok_or_else(|| ParseError("no document queued".into()))
    }
}

#[derive(Debug, Default)]
struct ZeroRandom;

impl Random for ZeroRandom {
    fn uniform_int(&self, _bound: u64) -> u64 {
        0
    }
}

fn authorities(n: u8) -> AuthorityList {
    (0..n)
        .map(|i| {
            Authority::builder()
                .name(format!("auth{i}"))
                .v3ident([i; 20].into())
                .build()
                .expect("built-in fields always set")
        })
        .collect()
}

fn voter(id: u8) -> Voter {
    Voter {
        identity_digest: [id; 20],
        signatures: vec![Signature {
            algorithm: DigestAlgorithm::Sha256,
            signing_key_digest: [id; 20],
            signature: vec![1; 8],
            outcome: Default::default(),
        }],
    }
}

fn routerstatus(id: u8, descriptor_id: u8, now: SystemTime) -> Routerstatus {
    Routerstatus {
        identity_digest: vec![id; 20],
        descriptor_digest: vec![descriptor_id; 20],
        nickname: format!("relay{id}"),
        addr_v4: None,
        addr_v6: None,
        flags: RelayFlags::Running,
        weight: RelayWeight::Unmeasured(10),
        download_status: DownloadStatus::ready_now(now, IncrementRule::ByFailure),
    }
}

/// Build a fixture consensus, `n_voters` of whom co-signed it, covering
/// relays `relay_ids` (each routerstatus's descriptor digest matches its
/// identity digest unless noted otherwise by the caller).
fn fixture_doc(
    valid_after_secs: u64,
    n_voters: u8,
    relay_ids: &[u8],
    net_params: BTreeMap<String, i32>,
    weight_params: BTreeMap<String, i32>,
) -> Consensus {
    let epoch = SystemTime::UNIX_EPOCH;
    let valid_after = epoch + Duration::from_secs(valid_after_secs);
    let routerstatuses = relay_ids.iter().map(|&id| routerstatus(id, id, valid_after)).collect();
    Consensus::new(
        Lifetime::new(
            valid_after,
            valid_after + Duration::from_secs(1000),
            valid_after + Duration::from_secs(2000),
        )
        .expect("strictly increasing by construction"),
        Duration::from_secs(60),
        Flavor::Ns,
        routerstatuses,
        (0..n_voters).map(voter).collect(),
        net_params,
        weight_params,
        BTreeMap::new(),
    )
}

struct Harness {
    core: Core,
    authorities: Arc<FakeAuthorityStore>,
    next: Arc<Mutex<Option<Consensus>>>,
}

fn harness(cache_dir: &std::path::Path, n_auth: u8) -> Harness {
    let config = Config::builder()
        .cache_dir(cache_dir)
        .authorities(authorities(n_auth))
        .build()
        .expect("cache_dir and authorities are both set");
    let authorities = Arc::new(FakeAuthorityStore::default());
    for i in 0..n_auth {
        authorities.good_signing_keys.lock().unwrap().push([i; 20]);
    }
    let next = Arc::new(Mutex::new(None));

    #[derive(Debug)]
    struct SharedAuthorityStore(Arc<FakeAuthorityStore>);
    #[async_trait]
    impl AuthorityStore for SharedAuthorityStore {
        fn get(&self, identity_digest: &[u8; 20], signing_key_digest: &[u8; 20]) -> Option<Cert> {
            self.0.get(identity_digest, signing_key_digest)
        }
        fn is_denylisted(&self, cert: &Cert) -> bool {
            self.0.is_denylisted(cert)
        }
        async fn fetch_missing(&self, document: &Consensus, now: SystemTime, preferred_source: SourcePolicy) {
            self.0.fetch_missing(document, now, preferred_source).await
        }
        fn downloads_failing(&self) -> bool {
            self.0.downloads_failing()
        }
    }

    let core = Core::new(
        config,
        Box::new(MemStore),
        Box::new(SharedAuthorityStore(authorities.clone())),
        Box::new(QueuedParser { next: next.clone() }),
        Box::new(ZeroRandom),
        Flavor::Ns,
        SystemTime::UNIX_EPOCH,
    );
    Harness { core, authorities, next }
}

/// S1: cold start, happy path.
#[test]
fn s1_cold_start_happy_path() {
    let td = tempfile::tempdir().unwrap();
    let mut h = harness(td.path(), 4);
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);

    let actions = h.core.tick(now);
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::FetchDocument(r) if r.purpose == FetchPurpose::Consensus(Flavor::Ns))));

    *h.next.lock().unwrap() = Some(fixture_doc(1000, 4, &[1, 2], BTreeMap::new(), BTreeMap::new()));
    let outcome = h.core.on_download_complete(Flavor::Ns, b"irrelevant".to_vec(), now).unwrap();
    assert_eq!(outcome.changes.len(), 2);
    assert!(h.core.live(Flavor::Ns, now));
    assert!(!h.core.is_bootstrapping(now));
}

/// S2: cert-waiting path, then promotion once certificates arrive.
#[test]
fn s2_cert_waiting_path() {
    let td = tempfile::tempdir().unwrap();
    let mut h = harness(td.path(), 5);
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);

    // 2 good signing keys + 3 missing, out of 5 voters and a threshold of 3:
    // good(2) + missing(3) >= 3 -> NeedsMoreCerts, good(2) < 3 alone.
    h.authorities.good_signing_keys.lock().unwrap().truncate(2);
    *h.next.lock().unwrap() = Some(fixture_doc(1000, 5, &[1, 2], BTreeMap::new(), BTreeMap::new()));

    let err = h.core.on_download_complete(Flavor::Ns, b"irrelevant".to_vec(), now).unwrap_err();
    assert!(matches!(err, Error::WaitingForCerts));
    assert!(h.core.latest(Flavor::Ns).is_none());
    assert!(h.core.certs_wanted_for(Flavor::Ns).is_some());

    h.authorities.good_signing_keys.lock().unwrap().extend([[2u8; 20], [3u8; 20], [4u8; 20]]);
    let outcome = h.core.on_cert_arrived(Flavor::Ns, now).unwrap();
    assert_eq!(outcome.changes.len(), 2);
    assert!(h.core.live(Flavor::Ns, now));
    assert!(!h.core.is_bootstrapping(now));
}

/// S3: a cert-waiting document that never gets its certificates times out
/// after 20 minutes, and the scheduler stops asking for a certificate
/// refresh and starts fetching a fresh document again.
#[test]
fn s3_cert_wait_timeout() {
    let td = tempfile::tempdir().unwrap();
    let mut h = harness(td.path(), 5);
    let parked_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);

    h.authorities.good_signing_keys.lock().unwrap().truncate(2);
    *h.next.lock().unwrap() = Some(fixture_doc(1000, 5, &[1, 2], BTreeMap::new(), BTreeMap::new()));
    let err = h.core.on_download_complete(Flavor::Ns, b"irrelevant".to_vec(), parked_at).unwrap_err();
    assert!(matches!(err, Error::WaitingForCerts));

    let still_within = parked_at + Duration::from_secs(60);
    let actions = h.core.tick(still_within);
    assert!(actions.iter().any(|a| matches!(a, Action::RefreshCertificates)));

    let after_timeout = parked_at + Duration::from_secs(20 * 60 + 1);
    let actions = h.core.tick(after_timeout);
    assert!(!actions.iter().any(|a| matches!(a, Action::RefreshCertificates)));
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::FetchDocument(r) if r.purpose == FetchPurpose::Consensus(Flavor::Ns))));
}

/// S4: installing a second document that shares relays with the first
/// carries the unchanged ones' download status forward byte-for-byte.
#[test]
fn s4_ordered_replacement_with_carry_forward() {
    let td = tempfile::tempdir().unwrap();
    let mut h = harness(td.path(), 4);

    let now1 = SystemTime::UNIX_EPOCH + Duration::from_secs(2000);
    *h.next.lock().unwrap() = Some(fixture_doc(2000, 4, &[1, 2, 3, 4], BTreeMap::new(), BTreeMap::new()));
    h.core.on_download_complete(Flavor::Ns, b"d1".to_vec(), now1).unwrap();
    let carried_status = h.core.by_identity(Flavor::Ns, &[3; 20]).unwrap().download_status;

    let now2 = SystemTime::UNIX_EPOCH + Duration::from_secs(3000);
    // d2 shares relays 1,2,3,4 (same descriptor digests) and adds relay 5.
    *h.next.lock().unwrap() = Some(fixture_doc(3000, 4, &[1, 2, 3, 4, 5], BTreeMap::new(), BTreeMap::new()));
    let outcome = h.core.on_download_complete(Flavor::Ns, b"d2".to_vec(), now2).unwrap();
    assert_eq!(outcome.changes.len(), 1); // only relay 5 added

    let rs3 = h.core.by_identity(Flavor::Ns, &[3; 20]).unwrap();
    assert_eq!(rs3.download_status.n_failures, carried_status.n_failures);
    assert_eq!(rs3.download_status.n_attempts, carried_status.n_attempts);
    assert_eq!(rs3.download_status.next_attempt_at, carried_status.next_attempt_at);
}

/// S5: an older document can never displace a newer installed one.
#[test]
fn s5_old_document_rejected() {
    let td = tempfile::tempdir().unwrap();
    let mut h = harness(td.path(), 4);

    let now2 = SystemTime::UNIX_EPOCH + Duration::from_secs(3000);
    *h.next.lock().unwrap() = Some(fixture_doc(3000, 4, &[1, 2], BTreeMap::new(), BTreeMap::new()));
    h.core.on_download_complete(Flavor::Ns, b"d2".to_vec(), now2).unwrap();

    let now1 = SystemTime::UNIX_EPOCH + Duration::from_secs(2000);
    *h.next.lock().unwrap() = Some(fixture_doc(2000, 4, &[1, 2], BTreeMap::new(), BTreeMap::new()));
    let err = h.core.on_download_complete(Flavor::Ns, b"d1".to_vec(), now1).unwrap_err();
    assert!(matches!(err, Error::AtLeastAsOldAsCurrent));
    assert_eq!(h.core.latest(Flavor::Ns).unwrap().lifetime.valid_after, now2);
}

/// S6: parameter resolution against a document's signed `net_params`.
#[test]
fn s6_parameter_resolution() {
    let td = tempfile::tempdir().unwrap();
    let mut h = harness(td.path(), 4);
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);

    let mut net_params = BTreeMap::new();
    net_params.insert("foo".to_string(), 5);
    net_params.insert("bar".to_string(), 10_000);
    *h.next.lock().unwrap() = Some(fixture_doc(1000, 4, &[1, 2], net_params, BTreeMap::new()));
    h.core.on_download_complete(Flavor::Ns, b"irrelevant".to_vec(), now).unwrap();

    assert_eq!(h.core.get_int(Flavor::Ns, "foo", 3, 1, 9), 5);
    assert_eq!(h.core.get_int(Flavor::Ns, "bar", 3, 1, 9), 9);
    assert_eq!(h.core.get_int(Flavor::Ns, "baz", 3, 1, 9), 3);
}
