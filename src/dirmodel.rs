//! A sorted, filtered, monitored view of one directory.
//!
//! ```text
//! open(uri) ──enumerate──► classify {file, subdir} ──filter──► sort ──► Reloaded
//!
//! notify thread ──mpsc──► process_events() on the owner's thread
//!                         paths coalesced, each re-queried once:
//!                           exists + visible  → insert / replace / reclassify
//!                           otherwise         → remove
//!                         ──► FilesChanged / SubdirsChanged
//! ```
//!
//! ## Ordering
//!
//! Entries sort by the chosen [`SortField`]; ties fall back to the collate
//! key and then the raw name. Subdirectories compare keys with the prefix
//! rule: a name that is a strict prefix of another sorts *after* it, which
//! is the order [`DirectoryModel::next_directory`] walks in. Descending
//! reverses the whole comparison.
//!
//! ## Filtering
//!
//! With filtering on, hidden entries (leading `.`, trailing `~`) and files
//! whose extension no decoder claims are left out.

use crate::codecs::path_to_uri;
use crate::collate::{collate_key, compare_prefix_last};
use crate::error::Error;
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Invalid location: {0}")]
    Location(#[from] Error),
}

/// Extensions with a dedicated decoder in this crate. Everything the
/// `image` fallback recognizes is accepted as well.
const EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jpe", "jfif", "png", "apng", "gif", "webp", "bmp", "tga", "svg", "svgz", "avif",
    "heif", "heic", "tif", "tiff", "cr2", "cr3", "nef", "arw", "raf", "orf", "rw2", "mrw", "dng",
];

/// One directory child. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub uri: String,
    /// Where a symbolic link points.
    pub target_uri: Option<String>,
    pub display_name: String,
    pub collate_key: String,
    pub filesize: u64,
    pub mtime_msec: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Name,
    Mtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    Reloaded,
    FilesChanged,
    SubdirsChanged,
    Error(String),
}

#[derive(Debug, Clone, Copy)]
struct SortOrder {
    field: SortField,
    descending: bool,
}

impl SortOrder {
    fn compare(self, a: &Entry, b: &Entry, prefix_last: bool) -> Ordering {
        let by_key = || {
            if prefix_last {
                compare_prefix_last(&a.collate_key, &b.collate_key)
            } else {
                a.collate_key.cmp(&b.collate_key)
            }
            .then_with(|| a.display_name.cmp(&b.display_name))
        };
        let ordering = match self.field {
            SortField::Name => by_key(),
            SortField::Mtime => a.mtime_msec.cmp(&b.mtime_msec).then_with(by_key),
        };
        if self.descending { ordering.reverse() } else { ordering }
    }
}

/// Filtered, sorted listing of a directory, optionally kept up to date
/// by a filesystem monitor.
pub struct DirectoryModel {
    filtering: bool,
    order: SortOrder,
    path: Option<PathBuf>,
    files: Vec<Arc<Entry>>,
    subdirs: Vec<Arc<Entry>>,
    pending: Vec<DirectoryEvent>,
    // Kept alive for its event thread.
    _watcher: Option<RecommendedWatcher>,
    events: Option<Receiver<notify::Result<notify::Event>>>,
}

impl Default for DirectoryModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryModel {
    pub fn new() -> Self {
        Self {
            filtering: true,
            order: SortOrder {
                field: SortField::Name,
                descending: false,
            },
            path: None,
            files: Vec::new(),
            subdirs: Vec::new(),
            pending: Vec::new(),
            _watcher: None,
            events: None,
        }
    }

    pub fn filtering(&self) -> bool {
        self.filtering
    }

    pub fn sort_field(&self) -> SortField {
        self.order.field
    }

    pub fn sort_descending(&self) -> bool {
        self.order.descending
    }

    /// Changing the filter re-enumerates an open directory.
    pub fn set_filtering(&mut self, filtering: bool) -> Result<(), DirectoryError> {
        if self.filtering == filtering {
            return Ok(());
        }
        self.filtering = filtering;
        match self.path.clone() {
            Some(path) => self.load(&path),
            None => Ok(()),
        }
    }

    pub fn set_sort_field(&mut self, field: SortField) {
        if self.order.field != field {
            self.order.field = field;
            self.resort();
        }
    }

    pub fn set_sort_descending(&mut self, descending: bool) {
        if self.order.descending != descending {
            self.order.descending = descending;
            self.resort();
        }
    }

    /// Enumerate the directory at `uri` (or plain path) and start
    /// monitoring it when the platform allows.
    pub fn open(&mut self, uri: &str) -> Result<(), DirectoryError> {
        let path = crate::codecs::uri_to_path(uri)?;
        self.load(&path)?;
        self.watch(&path);
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn files(&self) -> &[Arc<Entry>] {
        &self.files
    }

    pub fn subdirs(&self) -> &[Arc<Entry>] {
        &self.subdirs
    }

    fn load(&mut self, path: &Path) -> Result<(), DirectoryError> {
        let (files, subdirs) = enumerate(path, self.filtering, self.order)?;
        self.files = files;
        self.subdirs = subdirs;
        self.path = Some(path.to_path_buf());
        self.pending.push(DirectoryEvent::Reloaded);
        debug!(
            target: "glance_io::dirmodel",
            "{}: {} files, {} subdirs",
            path.display(),
            self.files.len(),
            self.subdirs.len()
        );
        Ok(())
    }

    fn watch(&mut self, path: &Path) {
        self._watcher = None;
        self.events = None;
        let (tx, rx) = channel();
        let watcher = notify::recommended_watcher(tx).and_then(|mut w| {
            w.watch(path, RecursiveMode::NonRecursive)?;
            Ok(w)
        });
        match watcher {
            Ok(w) => {
                self._watcher = Some(w);
                self.events = Some(rx);
            }
            Err(e) => warn!(target: "glance_io::dirmodel", "no monitor for {}: {e}", path.display()),
        }
    }

    fn resort(&mut self) {
        let order = self.order;
        self.files.sort_by(|a, b| order.compare(a, b, false));
        self.subdirs.sort_by(|a, b| order.compare(a, b, true));
        if self.path.is_some() {
            self.pending.push(DirectoryEvent::Reloaded);
        }
    }

    /// Drain monitor events and return everything that happened since the
    /// last call, in order.
    pub fn process_events(&mut self) -> Vec<DirectoryEvent> {
        let mut touched = BTreeSet::new();
        if let Some(rx) = &self.events {
            loop {
                match rx.try_recv() {
                    Ok(Ok(event)) => collect_paths(&event, &mut touched),
                    Ok(Err(e)) => self.pending.push(DirectoryEvent::Error(e.to_string())),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.pending
                            .push(DirectoryEvent::Error("directory monitor stopped".into()));
                        break;
                    }
                }
            }
        }
        if !touched.is_empty() {
            let paths: Vec<PathBuf> = touched.into_iter().collect();
            self.refresh_paths(&paths);
        }
        std::mem::take(&mut self.pending)
    }

    /// Re-query each path once and fold the result into the listing.
    pub(crate) fn refresh_paths(&mut self, paths: &[PathBuf]) {
        let Some(dir) = self.path.clone() else {
            return;
        };
        let order = self.order;
        let (mut files_changed, mut subdirs_changed) = (false, false);
        for path in paths {
            if path == &dir {
                if !dir.is_dir() {
                    self.pending.push(DirectoryEvent::Error(format!(
                        "{} is no longer available",
                        dir.display()
                    )));
                }
                continue;
            }
            if path.parent() != Some(dir.as_path()) {
                continue;
            }
            let Ok(uri) = path_to_uri(path) else {
                continue;
            };
            files_changed |= remove_uri(&mut self.files, &uri);
            subdirs_changed |= remove_uri(&mut self.subdirs, &uri);

            match classify(path, self.filtering) {
                Some((entry, true)) => {
                    insert_sorted(&mut self.subdirs, entry, |a, b| order.compare(a, b, true));
                    subdirs_changed = true;
                }
                Some((entry, false)) => {
                    insert_sorted(&mut self.files, entry, |a, b| order.compare(a, b, false));
                    files_changed = true;
                }
                None => {}
            }
        }
        if files_changed {
            self.pending.push(DirectoryEvent::FilesChanged);
        }
        if subdirs_changed {
            self.pending.push(DirectoryEvent::SubdirsChanged);
        }
    }

    /// The directory before this one in traversal order: the previous
    /// sibling's deepest last subdirectory, else the parent.
    pub fn previous_directory(&self) -> Result<Option<PathBuf>, DirectoryError> {
        let Some(current) = self.path.as_deref() else {
            return Ok(None);
        };
        let Some(parent) = current.parent() else {
            return Ok(None);
        };
        let siblings = self.subdir_paths(parent)?;
        let index = siblings.iter().position(|p| p == current);
        match index {
            Some(i) if i > 0 => {
                let mut dir = siblings[i - 1].clone();
                while let Some(last) = self.subdir_paths(&dir)?.pop() {
                    dir = last;
                }
                Ok(Some(dir))
            }
            _ => Ok(Some(parent.to_path_buf())),
        }
    }

    /// The directory after this one in traversal order: the first
    /// subdirectory, else the next sibling of the nearest ancestor that has
    /// one.
    pub fn next_directory(&self) -> Result<Option<PathBuf>, DirectoryError> {
        let Some(current) = self.path.as_deref() else {
            return Ok(None);
        };
        if let Some(first) = self.subdirs.first() {
            return Ok(Some(crate::codecs::uri_to_path(&first.uri)?));
        }
        let mut dir = current.to_path_buf();
        while let Some(parent) = dir.parent() {
            let siblings = self.subdir_paths(parent)?;
            if let Some(i) = siblings.iter().position(|p| p == &dir)
                && let Some(next) = siblings.get(i + 1)
            {
                return Ok(Some(next.clone()));
            }
            dir = parent.to_path_buf();
        }
        Ok(None)
    }

    fn subdir_paths(&self, dir: &Path) -> Result<Vec<PathBuf>, DirectoryError> {
        let (_, subdirs) = enumerate(dir, self.filtering, self.order)?;
        Ok(subdirs.iter().map(|e| dir.join(&e.display_name)).collect())
    }
}

/// Whether a decoder is likely to accept a file with this name.
pub fn is_supported_name(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS.contains(&ext.as_str()) || image::ImageFormat::from_extension(&ext).is_some()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~')
}

fn enumerate(
    dir: &Path,
    filtering: bool,
    order: SortOrder,
) -> Result<(Vec<Arc<Entry>>, Vec<Arc<Entry>>), DirectoryError> {
    let io = |source| DirectoryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.is_dir() {
        return Err(DirectoryError::NotADirectory(dir.to_path_buf()));
    }
    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for child in std::fs::read_dir(dir).map_err(io)? {
        let child = child.map_err(io)?;
        match classify(&child.path(), filtering) {
            Some((entry, true)) => subdirs.push(entry),
            Some((entry, false)) => files.push(entry),
            None => {}
        }
    }
    files.sort_by(|a, b| order.compare(a, b, false));
    subdirs.sort_by(|a, b| order.compare(a, b, true));
    Ok((files, subdirs))
}

/// Build the entry for `path`, with whether it is a directory. `None` for
/// filtered, vanished and dangling entries.
fn classify(path: &Path, filtering: bool) -> Option<(Arc<Entry>, bool)> {
    let display_name = path.file_name()?.to_string_lossy().into_owned();
    if filtering && is_hidden(&display_name) {
        return None;
    }
    let link = std::fs::symlink_metadata(path).ok()?;
    let meta = std::fs::metadata(path).ok()?;
    let is_dir = meta.is_dir();
    if filtering && !is_dir && !is_supported_name(&display_name) {
        return None;
    }
    let target_uri = if link.file_type().is_symlink() {
        std::fs::canonicalize(path)
            .ok()
            .and_then(|target| path_to_uri(&target).ok())
    } else {
        None
    };
    let mtime_msec = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let entry = Entry {
        uri: path_to_uri(path).ok()?,
        target_uri,
        collate_key: collate_key(&display_name),
        display_name,
        filesize: if is_dir { 0 } else { meta.len() },
        mtime_msec,
    };
    Some((Arc::new(entry), is_dir))
}

fn remove_uri(list: &mut Vec<Arc<Entry>>, uri: &str) -> bool {
    let before = list.len();
    list.retain(|e| e.uri != uri);
    list.len() != before
}

fn insert_sorted(list: &mut Vec<Arc<Entry>>, entry: Arc<Entry>, cmp: impl Fn(&Entry, &Entry) -> Ordering) {
    let at = list.partition_point(|e| cmp(e, &entry) != Ordering::Greater);
    list.insert(at, entry);
}

fn collect_paths(event: &notify::Event, touched: &mut BTreeSet<PathBuf>) {
    // Access events are hints only. Renames carry both ends and each end is
    // re-queried, which moves or reclassifies the entry.
    if !matches!(event.kind, EventKind::Access(_)) {
        touched.extend(event.paths.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn names(entries: &[Arc<Entry>]) -> Vec<&str> {
        entries.iter().map(|e| e.display_name.as_str()).collect()
    }

    fn open(dir: &Path) -> DirectoryModel {
        let mut model = DirectoryModel::new();
        model.open(dir.to_str().unwrap()).unwrap();
        model
    }

    /// Without a monitor, so only explicit refreshes change the listing.
    fn load(dir: &Path) -> DirectoryModel {
        let mut model = DirectoryModel::new();
        model.load(dir).unwrap();
        model.process_events();
        model
    }

    fn touch(path: &Path, secs: u64) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    // =========================================================================
    // Enumeration and filtering
    // =========================================================================

    #[test]
    fn open_classifies_and_filters() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "b.png", b"x");
        write_file(tmp.path(), "a.JPG", b"x");
        write_file(tmp.path(), ".hidden.png", b"x");
        write_file(tmp.path(), "notes.txt", b"x");
        write_file(tmp.path(), "backup.png~", b"x");
        fs::create_dir(tmp.path().join("album")).unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();

        let mut model = open(tmp.path());
        assert_eq!(names(model.files()), vec!["a.JPG", "b.png"]);
        assert_eq!(names(model.subdirs()), vec!["album"]);
        assert_eq!(model.process_events(), vec![DirectoryEvent::Reloaded]);

        model.set_filtering(false).unwrap();
        assert_eq!(model.files().len(), 5);
        assert_eq!(model.subdirs().len(), 2);
    }

    #[test]
    fn entries_carry_attributes() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "Photo 1.png", b"12345");
        touch(&path, 1_000);
        let model = open(tmp.path());
        let entry = &model.files()[0];
        assert_eq!(entry.filesize, 5);
        assert_eq!(entry.mtime_msec, 1_000_000);
        assert_eq!(entry.collate_key, collate_key("Photo 1.png"));
        assert_eq!(entry.uri, path_to_uri(&path).unwrap());
        assert_eq!(entry.target_uri, None);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_record_their_target() {
        let tmp = TempDir::new().unwrap();
        let real = write_file(tmp.path(), "real.png", b"x");
        std::os::unix::fs::symlink(&real, tmp.path().join("link.png")).unwrap();
        let model = open(tmp.path());
        let link = model.files().iter().find(|e| e.display_name == "link.png").unwrap();
        let canonical = fs::canonicalize(&real).unwrap();
        assert_eq!(link.target_uri, Some(path_to_uri(&canonical).unwrap()));
    }

    #[test]
    fn open_rejects_files() {
        let tmp = TempDir::new().unwrap();
        let file = write_file(tmp.path(), "a.png", b"x");
        let mut model = DirectoryModel::new();
        assert!(matches!(
            model.open(file.to_str().unwrap()),
            Err(DirectoryError::NotADirectory(_))
        ));
    }

    // =========================================================================
    // Sorting
    // =========================================================================

    #[test]
    fn name_sort_is_natural() {
        let tmp = TempDir::new().unwrap();
        for name in ["img10.png", "img2.png", "IMG1.png"] {
            write_file(tmp.path(), name, b"x");
        }
        let mut model = open(tmp.path());
        assert_eq!(names(model.files()), vec!["IMG1.png", "img2.png", "img10.png"]);
        model.set_sort_descending(true);
        assert_eq!(names(model.files()), vec!["img10.png", "img2.png", "IMG1.png"]);
    }

    #[test]
    fn mtime_sort_breaks_ties_by_name() {
        let tmp = TempDir::new().unwrap();
        touch(&write_file(tmp.path(), "c.png", b"x"), 100);
        touch(&write_file(tmp.path(), "b.png", b"x"), 300);
        touch(&write_file(tmp.path(), "a.png", b"x"), 300);
        let mut model = open(tmp.path());
        model.set_sort_field(SortField::Mtime);
        assert_eq!(names(model.files()), vec!["c.png", "a.png", "b.png"]);
    }

    #[test]
    fn directory_prefix_sorts_after_extension() {
        let tmp = TempDir::new().unwrap();
        for dir in ["trip", "trip day 2", "trap", "zoo"] {
            fs::create_dir(tmp.path().join(dir)).unwrap();
        }
        let model = open(tmp.path());
        assert_eq!(names(model.subdirs()), vec!["trap", "trip day 2", "trip", "zoo"]);

        // Adjacent entries that are not prefixes of each other are ordered.
        let order = model.order;
        for pair in model.subdirs().windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if !b.collate_key.starts_with(&a.collate_key) && !a.collate_key.starts_with(&b.collate_key) {
                assert_ne!(order.compare(a, b, true), Ordering::Greater);
            }
        }
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    #[test]
    fn refresh_adds_removes_and_reclassifies() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.png", b"x");
        let mut model = load(tmp.path());

        let added = write_file(tmp.path(), "b.png", b"x");
        model.refresh_paths(&[added.clone()]);
        assert_eq!(names(model.files()), vec!["a.png", "b.png"]);
        assert_eq!(model.process_events(), vec![DirectoryEvent::FilesChanged]);

        fs::remove_file(&added).unwrap();
        let dir = tmp.path().join("b.png");
        fs::create_dir(&dir).unwrap();
        model.refresh_paths(&[dir]);
        assert_eq!(names(model.files()), vec!["a.png"]);
        assert_eq!(names(model.subdirs()), vec!["b.png"]);
        assert_eq!(
            model.process_events(),
            vec![DirectoryEvent::FilesChanged, DirectoryEvent::SubdirsChanged]
        );
    }

    #[test]
    fn refresh_ignores_hidden_and_foreign_paths() {
        let tmp = TempDir::new().unwrap();
        let mut model = load(tmp.path());
        let hidden = write_file(tmp.path(), ".tmp.png", b"x");
        let elsewhere = TempDir::new().unwrap();
        let foreign = write_file(elsewhere.path(), "c.png", b"x");
        model.refresh_paths(&[hidden, foreign]);
        assert!(model.files().is_empty());
        assert!(model.process_events().is_empty());
    }

    #[test]
    fn vanished_directory_reports_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("gone");
        fs::create_dir(&dir).unwrap();
        let mut model = load(&dir);
        fs::remove_dir(&dir).unwrap();
        model.refresh_paths(&[dir]);
        assert!(matches!(model.process_events().as_slice(), [DirectoryEvent::Error(_)]));
    }

    // =========================================================================
    // Sibling navigation
    // =========================================================================

    fn tree() -> TempDir {
        // root/{a/{a1, a2/{deep}}, b, c/}
        let tmp = TempDir::new().unwrap();
        for dir in ["a/a1", "a/a2/deep", "b", "c"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        tmp
    }

    #[test]
    fn next_descends_then_moves_on() {
        let tmp = tree();
        let root = tmp.path();
        let next = |dir: &str| open(&root.join(dir)).next_directory().unwrap();
        assert_eq!(next("a"), Some(root.join("a/a1")));
        assert_eq!(next("a/a1"), Some(root.join("a/a2")));
        assert_eq!(next("a/a2/deep"), Some(root.join("b")));
        assert_eq!(next("b"), Some(root.join("c")));
    }

    #[test]
    fn previous_goes_to_deepest_last_or_parent() {
        let tmp = tree();
        let root = tmp.path();
        let previous = |dir: &str| open(&root.join(dir)).previous_directory().unwrap();
        assert_eq!(previous("b"), Some(root.join("a/a2/deep")));
        assert_eq!(previous("a/a1"), Some(root.join("a")));
        assert_eq!(previous("a/a2"), Some(root.join("a/a1")));
    }
}
