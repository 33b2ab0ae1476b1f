//! On-demand property paging and the forked snapshot dumper.
//!
//! Large worlds keep most property trees cold. The paging store leaves
//! ISUNLOADED stubs in memory and materializes subtrees from a blob
//! file on first touch. The index keys records by an MD5 digest of the
//! (dbref, lowercased path) pair.
//!
//! `dump_forked` snapshots the whole arena from a child process: fork
//! gives the child a frozen copy of the address space, the parent keeps
//! serving, and the child renames its output over the old files only
//! on success.

use crate::dbref::Dbref;
use crate::error::Error;
use crate::hash::md5hex;
use crate::obj::Arena;
use crate::prop::{PropNode, PropTree};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct IndexEntry {
    dbref: i32,
    /// MD5 digest of "dbref/lowercased-path".
    key: String,
    offset: u64,
    len: u32,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct IndexFile {
    entries: Vec<IndexEntry>,
}

fn record_key(dbref: Dbref, path: &str) -> String {
    md5hex(format!("{}/{}", dbref.0, path.to_ascii_lowercase()).as_bytes())
}

/// Read side of the paging store.
#[derive(Debug)]
pub struct Pager {
    index: HashMap<String, (u64, u32)>,
    blob: File,
    blob_path: PathBuf,
    index_path: PathBuf,
}

impl Pager {
    pub fn open(index_path: &Path, blob_path: &Path) -> Result<Self, Error> {
        let mut raw = Vec::new();
        File::open(index_path)?.read_to_end(&mut raw)?;
        let file: IndexFile = postcard::from_bytes(&raw)?;
        let mut index = HashMap::with_capacity(file.entries.len());
        for e in file.entries {
            index.insert(e.key, (e.offset, e.len));
        }
        Ok(Pager {
            index,
            blob: File::open(blob_path)?,
            blob_path: blob_path.to_path_buf(),
            index_path: index_path.to_path_buf(),
        })
    }

    /// A second read handle on the same store, for the dump child.
    pub fn reopen(&self) -> Result<Pager, Error> {
        Pager::open(&self.index_path, &self.blob_path)
    }

    /// Materialize the subtree stored for (dbref, dir-path).
    pub fn fetch(&mut self, dbref: Dbref, path: &str) -> Result<PropNode, Error> {
        let (offset, len) =
            *self
                .index
                .get(&record_key(dbref, path))
                .ok_or_else(|| Error::NoPageRecord {
                    dbref,
                    path: path.to_string(),
                })?;
        let mut buf = vec![0u8; len as usize];
        self.blob.seek(SeekFrom::Start(offset))?;
        self.blob.read_exact(&mut buf)?;
        Ok(postcard::from_bytes(&buf)?)
    }

    /// Resolve every stub a path lookup would cross, in place.
    pub fn fetch_into(&mut self, dbref: Dbref, tree: &mut PropTree, path: &str) -> Result<(), Error> {
        while let Some(prefix) = tree.unloaded_prefix(path) {
            let node = self.fetch(dbref, &prefix)?;
            tree.replace_subtree(&prefix, node)?;
        }
        Ok(())
    }

    /// Materialize everything still unloaded in one tree.
    pub fn fetch_all(&mut self, dbref: Dbref, tree: &mut PropTree) -> Result<(), Error> {
        loop {
            let stubs = tree.unloaded_paths();
            if stubs.is_empty() {
                return Ok(());
            }
            for path in stubs {
                let node = self.fetch(dbref, &path)?;
                tree.replace_subtree(&path, node)?;
            }
        }
    }
}

/// Write side, used while producing a snapshot.
struct PagerWriter {
    blob: File,
    entries: Vec<IndexEntry>,
    offset: u64,
}

impl PagerWriter {
    fn create(blob_path: &Path) -> Result<Self, Error> {
        Ok(PagerWriter {
            blob: File::create(blob_path)?,
            entries: Vec::new(),
            offset: 0,
        })
    }

    fn write_record(&mut self, dbref: Dbref, path: &str, node: &PropNode) -> Result<(), Error> {
        let bytes = postcard::to_allocvec(node)?;
        self.blob.write_all(&bytes)?;
        self.entries.push(IndexEntry {
            dbref: dbref.0,
            key: record_key(dbref, path),
            offset: self.offset,
            len: bytes.len() as u32,
        });
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn finish(mut self, index_path: &Path) -> Result<(), Error> {
        self.blob.sync_all()?;
        let bytes = postcard::to_allocvec(&IndexFile { entries: self.entries })?;
        let mut f = File::create(index_path)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
        Ok(())
    }
}

/// Snapshot output locations. Blob/index are written only in diskbase
/// mode.
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub db: PathBuf,
    pub index: Option<PathBuf>,
    pub blob: Option<PathBuf>,
}

impl SnapshotPaths {
    pub fn inline(db: &Path) -> Self {
        SnapshotPaths {
            db: db.to_path_buf(),
            index: None,
            blob: None,
        }
    }

    pub fn diskbase(db: &Path) -> Self {
        SnapshotPaths {
            db: db.to_path_buf(),
            index: Some(db.with_extension("index")),
            blob: Some(db.with_extension("blob")),
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    version: u32,
    arena: Arena,
}

const SNAPSHOT_VERSION: u32 = 1;

fn scratch_name(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".#new#");
    PathBuf::from(name)
}

/// Write a complete snapshot synchronously. `pager` supplies any
/// still-unloaded subtrees; in diskbase mode props move to the blob
/// and the db file keeps root stubs.
pub fn write_snapshot(
    arena: &Arena,
    pager: Option<&Pager>,
    paths: &SnapshotPaths,
) -> Result<(), Error> {
    let mut arena = arena.clone();
    let mut reader = match pager {
        Some(p) => Some(p.reopen()?),
        None => None,
    };

    // materialize everything first so the walk below never blocks on a
    // stub the parent may have repaged meanwhile
    for d in arena.iter_live().collect::<Vec<_>>() {
        let obj = arena.get_mut(d)?;
        let mut tree = std::mem::take(&mut obj.props);
        if let Some(r) = reader.as_mut() {
            r.fetch_all(d, &mut tree)?;
        } else if !tree.unloaded_paths().is_empty() {
            return Err(Error::NoPageRecord {
                dbref: d,
                path: String::new(),
            });
        }
        arena.get_mut(d)?.props = tree;
    }

    if let (Some(index_path), Some(blob_path)) = (&paths.index, &paths.blob) {
        let blob_scratch = scratch_name(blob_path);
        let index_scratch = scratch_name(index_path);
        let mut writer = PagerWriter::create(&blob_scratch)?;
        for d in arena.iter_live().collect::<Vec<_>>() {
            let obj = arena.get_mut(d)?;
            if obj.props.is_empty() {
                continue;
            }
            let root = obj.props.take_root();
            writer.write_record(d, "", &PropNode::wrap_dir(root))?;
            obj.props.set_root_unloaded();
        }
        writer.finish(&index_scratch)?;
        std::fs::rename(&blob_scratch, blob_path)?;
        std::fs::rename(&index_scratch, index_path)?;
    }

    for d in arena.iter_live().collect::<Vec<_>>() {
        arena.get_mut(d)?.dirty = false;
    }

    let bytes = postcard::to_allocvec(&SnapshotFile {
        version: SNAPSHOT_VERSION,
        arena,
    })?;
    let db_scratch = scratch_name(&paths.db);
    let mut f = File::create(&db_scratch)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    std::fs::rename(&db_scratch, &paths.db)?;
    Ok(())
}

/// Load a snapshot. When its companion index/blob exist the props stay
/// stubbed and a pager is returned alongside.
pub fn load_snapshot(paths: &SnapshotPaths) -> Result<(Arena, Option<Pager>), Error> {
    let mut raw = Vec::new();
    File::open(&paths.db)?.read_to_end(&mut raw)?;
    let file: SnapshotFile = postcard::from_bytes(&raw)?;
    let pager = match (&paths.index, &paths.blob) {
        (Some(i), Some(b)) if i.exists() && b.exists() => Some(Pager::open(i, b)?),
        _ => None,
    };
    Ok((file.arena, pager))
}

/// Exit status the dump child uses when the write fails.
pub const DUMP_CHILD_PANIC: i32 = 135;

/// Fork a snapshot child. The parent gets the child pid back
/// immediately; the child writes the snapshot and `_exit`s. Safe here
/// because the server runs a current-thread runtime: there are no
/// sibling threads to lose across the fork.
pub fn dump_forked(
    arena: &Arena,
    pager: Option<&Pager>,
    paths: &SnapshotPaths,
) -> Result<libc::pid_t, Error> {
    match unsafe { libc::fork() } {
        -1 => Err(Error::Fork(std::io::Error::last_os_error())),
        0 => {
            // Child: crashes must stay visible and must not take the
            // parent's handlers with them.
            unsafe {
                libc::signal(libc::SIGPIPE, libc::SIG_IGN);
                libc::signal(libc::SIGHUP, libc::SIG_IGN);
                libc::signal(libc::SIGCHLD, libc::SIG_IGN);
                libc::signal(libc::SIGSEGV, libc::SIG_DFL);
            }
            let code = match write_snapshot(arena, pager, paths) {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("dump child: {err}");
                    DUMP_CHILD_PANIC
                }
            };
            unsafe { libc::_exit(code) }
        }
        pid => Ok(pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::ObjType;
    use crate::prop::{PropFlags, PropValue};

    fn arena_with_props() -> (Arena, Dbref) {
        let mut arena = Arena::new();
        let room = arena.create(ObjType::Room, Dbref(0), "Limbo");
        let obj = arena.get_mut(room).unwrap();
        obj.props
            .set("_desc", PropValue::Str("A featureless void.".into()), PropFlags::empty())
            .unwrap();
        obj.props
            .set("stats/visits", PropValue::Int(7), PropFlags::empty())
            .unwrap();
        (arena, room)
    }

    #[test]
    fn snapshot_roundtrips_inline() {
        let (arena, room) = arena_with_props();
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::inline(&dir.path().join("world.db"));
        write_snapshot(&arena, None, &paths).unwrap();
        let (loaded, pager) = load_snapshot(&paths).unwrap();
        assert!(pager.is_none());
        assert_eq!(
            loaded.get(room).unwrap().props.get_value("stats/visits"),
            Some(&PropValue::Int(7))
        );
    }

    #[test]
    fn diskbase_snapshot_stubs_and_fetches() {
        let (arena, room) = arena_with_props();
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::diskbase(&dir.path().join("world.db"));
        write_snapshot(&arena, None, &paths).unwrap();

        let (mut loaded, pager) = load_snapshot(&paths).unwrap();
        let mut pager = pager.expect("diskbase snapshot yields a pager");
        // props come back as a root stub
        assert!(loaded.get(room).unwrap().props.root_is_unloaded());
        assert!(loaded.get(room).unwrap().props.get_value("_desc").is_none());

        let mut tree = std::mem::take(&mut loaded.get_mut(room).unwrap().props);
        pager.fetch_into(room, &mut tree, "_desc").unwrap();
        assert_eq!(
            tree.get_value("_desc"),
            Some(&PropValue::Str("A featureless void.".into()))
        );
        assert_eq!(tree.get_value("stats/visits"), Some(&PropValue::Int(7)));
        loaded.get_mut(room).unwrap().props = tree;
    }

    #[test]
    fn missing_record_is_an_error() {
        let (arena, _room) = arena_with_props();
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::diskbase(&dir.path().join("world.db"));
        write_snapshot(&arena, None, &paths).unwrap();
        let (_, pager) = load_snapshot(&paths).unwrap();
        let err = pager.unwrap().fetch(Dbref(99), "nope").unwrap_err();
        assert!(matches!(err, Error::NoPageRecord { .. }));
    }

    #[test]
    fn dump_child_crash_is_isolated_from_the_parent() {
        let (arena, _room) = arena_with_props();
        let dir = tempfile::tempdir().unwrap();
        let good = SnapshotPaths::inline(&dir.path().join("world.db"));
        write_snapshot(&arena, None, &good).unwrap();
        let before = std::fs::read(&good.db).unwrap();

        // the child cannot create its scratch file and must panic-exit
        let bad = SnapshotPaths::inline(&dir.path().join("missing/sub/world.db"));
        let pid = dump_forked(&arena, None, &bad).unwrap();
        let mut status: libc::c_int = 0;
        assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), DUMP_CHILD_PANIC);
        // the parent and the old snapshot are untouched
        assert_eq!(std::fs::read(&good.db).unwrap(), before);
    }

    #[test]
    fn forked_dump_succeeds_and_parent_reaps_zero() {
        let (arena, room) = arena_with_props();
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::inline(&dir.path().join("world.db"));
        let pid = dump_forked(&arena, None, &paths).unwrap();
        let mut status: libc::c_int = 0;
        assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);
        let (loaded, _) = load_snapshot(&paths).unwrap();
        assert_eq!(
            loaded.get(room).unwrap().props.get_value("stats/visits"),
            Some(&PropValue::Int(7))
        );
    }

    #[test]
    fn redump_from_stubs_reads_through_the_old_store() {
        let (arena, room) = arena_with_props();
        let dir = tempfile::tempdir().unwrap();
        let paths = SnapshotPaths::diskbase(&dir.path().join("world.db"));
        write_snapshot(&arena, None, &paths).unwrap();
        let (loaded, pager) = load_snapshot(&paths).unwrap();
        // second generation: everything is stubbed, the writer must
        // materialize through the pager it was handed
        write_snapshot(&loaded, pager.as_ref(), &paths).unwrap();
        let (mut second, pager2) = load_snapshot(&paths).unwrap();
        let mut pager2 = pager2.unwrap();
        let mut tree = std::mem::take(&mut second.get_mut(room).unwrap().props);
        pager2.fetch_all(room, &mut tree).unwrap();
        assert_eq!(tree.get_value("stats/visits"), Some(&PropValue::Int(7)));
    }
}
