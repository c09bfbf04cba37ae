//! Component B: on-disk read/write/promote/erase of verified and quarantined
//! consensus bytes, one pair of files per flavor.
//!
//! Grounded on `tor-dirmgr`'s `storage.rs` for the "document text is an
//! opaque, possibly-mapped byte blob" framing, with the sqlite-backed
//! general document store traded out for the flat-file layout §6 of the
//! specification actually calls for.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::err::{Error, Result};
use crate::flavor::Flavor;

/// A document's bytes as loaded from the cache.
///
/// We keep this as a newtype (rather than a bare `Vec<u8>`) so that callers
/// don't need to think about whether it came from a `read()` or a memory
/// map.
#[derive(Debug)]
pub struct DocumentBytes(InputBytes);

impl AsRef<[u8]> for DocumentBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Internal representation, mirroring the teacher's `InputString`: small
/// files are read to a `Vec`, large ones on supporting platforms are
/// memory-mapped.
#[derive(Debug)]
enum InputBytes {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mapped(memmap2::Mmap),
}

impl AsRef<[u8]> for InputBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            InputBytes::Owned(v) => v.as_slice(),
            #[cfg(feature = "mmap")]
            InputBytes::Mapped(m) => m.as_ref(),
        }
    }
}

impl InputBytes {
    fn load(path: &Path) -> std::io::Result<Self> {
        let f = fs::File::open(path)?;
        #[cfg(feature = "mmap")]
        {
            // SAFETY: nothing else in this process writes to cache files
            // except through `FileCacheStore`'s write-then-rename path,
            // which never mutates a file in place. Another *process*
            // concurrently truncating the file is a misuse the spec already
            // declares unsupported (two processes sharing a cache dir).
            if let Ok(mapping) = unsafe { memmap2::Mmap::map(&f) } {
                return Ok(InputBytes::Mapped(mapping));
            }
        }
        use std::io::Read;
        let mut f = f;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        Ok(InputBytes::Owned(buf))
    }
}

/// Filenames for a flavor's verified and unverified cache files, per §6.
fn filenames(flavor: Flavor) -> (&'static str, &'static str) {
    match flavor {
        Flavor::Ns => ("cached-consensus", "unverified-consensus"),
        Flavor::Microdesc => ("cached-microdesc-consensus", "unverified-microdesc-consensus"),
    }
}

/// Component B's interface, kept as a trait so that `Core` can be tested
/// against an in-memory fake without touching a real filesystem.
pub trait CacheStore: std::fmt::Debug {
    /// Read the verified (if `verified`) or unverified cache file for
    /// `flavor`. Returns `Ok(None)` if the file is absent; I/O errors that
    /// aren't "file not found" are non-fatal per §4.B and are logged and
    /// folded into `Ok(None)`.
    fn read(&self, flavor: Flavor, verified: bool) -> Result<Option<DocumentBytes>>;

    /// Write `bytes` to the verified or unverified cache file for `flavor`,
    /// using write-to-temp-then-rename for atomicity.
    fn write(&self, flavor: Flavor, verified: bool, bytes: &[u8]) -> Result<()>;

    /// Atomically rename the flavor's unverified file over its verified
    /// file. No-op (but not an error) if there is no unverified file.
    fn promote(&self, flavor: Flavor) -> Result<()>;

    /// Remove the verified or unverified cache file for `flavor`, if
    /// present.
    fn erase(&self, flavor: Flavor, verified: bool) -> Result<()>;
}

/// A [`CacheStore`] backed by a directory of flat files, one pair per
/// flavor, as specified in §6.
#[derive(Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
    /// Advisory exclusive lock on the whole cache directory. Held for the
    /// lifetime of the store: §5 says two processes sharing a directory is
    /// unsupported, so we only need to guard against the *embedding
    /// application* accidentally opening the same directory twice.
    #[allow(dead_code)]
    lock: Option<fslock_guard::LockGuard>,
}

impl FileCacheStore {
    /// Open (creating if necessary) a cache store rooted at `dir`, checking
    /// `dir`'s permissions against `mistrust` (§6, [`crate::Config::cache_trust`])
    /// before trusting anything already on disk there.
    pub fn new(dir: impl Into<PathBuf>, mistrust: &fs_mistrust::Mistrust) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::from_io("creating", &dir, e))?;
        mistrust.check_directory(&dir)?;
        let lock = fslock_guard::LockGuard::acquire(&dir).unwrap_or_else(|e| {
            warn!("could not lock cache directory {}: {e}; proceeding without it", dir.display());
            None
        });
        Ok(FileCacheStore { dir, lock })
    }

    fn path_for(&self, flavor: Flavor, verified: bool) -> PathBuf {
        let (verified_name, unverified_name) = filenames(flavor);
        self.dir.join(if verified { verified_name } else { unverified_name })
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self, flavor: Flavor, verified: bool) -> Result<Option<DocumentBytes>> {
        let path = self.path_for(flavor, verified);
        match InputBytes::load(&path) {
            Ok(bytes) => Ok(Some(DocumentBytes(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                debug!("error reading cache file {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn write(&self, flavor: Flavor, verified: bool, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(flavor, verified);
        let tmp_path = path.with_extension("tmp");
        let mut f = fs::File::create(&tmp_path).map_err(|e| Error::from_io("creating", &tmp_path, e))?;
        f.write_all(bytes).map_err(|e| Error::from_io("writing", &tmp_path, e))?;
        f.sync_all().map_err(|e| Error::from_io("syncing", &tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| Error::from_io("renaming", &path, e))?;
        Ok(())
    }

    fn promote(&self, flavor: Flavor) -> Result<()> {
        let unverified = self.path_for(flavor, false);
        let verified = self.path_for(flavor, true);
        match fs::rename(&unverified, &verified) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io("promoting", &verified, e)),
        }
    }

    fn erase(&self, flavor: Flavor, verified: bool) -> Result<()> {
        let path = self.path_for(flavor, verified);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io("erasing", &path, e)),
        }
    }
}

/// A tiny wrapper around `fslock` so the rest of this module can treat
/// "can't lock" as a warning rather than a hard dependency on a specific
/// error type.
mod fslock_guard {
    use std::path::Path;

    #[derive(Debug)]
    pub(super) struct LockGuard(#[cfg(not(target_arch = "wasm32"))] fslock::LockFile);

    impl LockGuard {
        #[cfg(not(target_arch = "wasm32"))]
        pub(super) fn acquire(dir: &Path) -> std::io::Result<Option<LockGuard>> {
            let mut lock = fslock::LockFile::open(&dir.join("lock"))?;
            if lock.try_lock()? {
                Ok(Some(LockGuard(lock)))
            } else {
                Ok(None)
            }
        }

        #[cfg(target_arch = "wasm32")]
        pub(super) fn acquire(_dir: &Path) -> std::io::Result<Option<LockGuard>> {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_missing_is_none() {
        let td = tempdir().unwrap();
        let store = FileCacheStore::new(td.path(), &fs_mistrust::Mistrust::new_dangerously_trust_everyone()).unwrap();
        assert!(store.read(Flavor::Ns, true).unwrap().is_none());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let td = tempdir().unwrap();
        let store = FileCacheStore::new(td.path(), &fs_mistrust::Mistrust::new_dangerously_trust_everyone()).unwrap();
        store.write(Flavor::Ns, true, b"hello consensus").unwrap();
        let back = store.read(Flavor::Ns, true).unwrap().unwrap();
        assert_eq!(back.as_ref(), b"hello consensus");
    }

    #[test]
    fn promote_moves_unverified_over_verified() {
        let td = tempdir().unwrap();
        let store = FileCacheStore::new(td.path(), &fs_mistrust::Mistrust::new_dangerously_trust_everyone()).unwrap();
        store.write(Flavor::Ns, true, b"old").unwrap();
        store.write(Flavor::Ns, false, b"new").unwrap();
        store.promote(Flavor::Ns).unwrap();
        assert_eq!(store.read(Flavor::Ns, true).unwrap().unwrap().as_ref(), b"new");
        assert!(store.read(Flavor::Ns, false).unwrap().is_none());
    }

    #[test]
    fn erase_is_idempotent() {
        let td = tempdir().unwrap();
        let store = FileCacheStore::new(td.path(), &fs_mistrust::Mistrust::new_dangerously_trust_everyone()).unwrap();
        store.erase(Flavor::Ns, true).unwrap();
        store.write(Flavor::Ns, true, b"x").unwrap();
        store.erase(Flavor::Ns, true).unwrap();
        assert!(store.read(Flavor::Ns, true).unwrap().is_none());
    }

    #[test]
    fn filenames_match_spec() {
        assert_eq!(filenames(Flavor::Ns), ("cached-consensus", "unverified-consensus"));
        assert_eq!(
            filenames(Flavor::Microdesc),
            ("cached-microdesc-consensus", "unverified-microdesc-consensus")
        );
    }
}
