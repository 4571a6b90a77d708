//! File access behind an `open(path)` capability.
//!
//! [`DirFileSystem`] roots request paths at a directory on disk and
//! [`GuardedFileSystem`] wraps any [`FileSystem`] with a deny-list check that
//! runs before the inner filesystem is touched.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::deny::DenyList;
use crate::logging::LoggingExt;

/// An opened regular file.
pub struct OpenFile {
    pub name: String,
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub reader: Box<dyn Read + Send>,
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Raw file name; not necessarily UTF-8.
    pub name: Vec<u8>,
    pub is_dir: bool,
}

#[derive(Debug)]
pub enum Node {
    File(OpenFile),
    /// Entries sorted by name.
    Directory(Vec<DirEntry>),
}

pub trait FileSystem: Send + Sync {
    /// Opens a slash separated path, relative to the filesystem root.
    fn open(&self, path: &[u8]) -> io::Result<Node>;
}

/// A directory on disk.
///
/// Only normal path components are honoured, so `..` never climbs above the
/// root. Symlinks that resolve outside the root are reported as missing.
#[derive(Debug, Clone)]
pub struct DirFileSystem {
    root: PathBuf,
}

impl DirFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &[u8]) -> io::Result<PathBuf> {
        if path.contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path contains a NUL byte",
            ));
        }

        let canonical_root = self
            .root
            .display()
            .log_operation("canonicalize", || fs::canonicalize(&self.root))?;

        let path = os_string(path);
        let cleaned = Path::new(&path)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect::<PathBuf>();
        let requested = canonical_root.join(&cleaned);

        let resolved = fs::canonicalize(&requested).map_err(map_open_error)?;
        if resolved.starts_with(&canonical_root) {
            Ok(resolved)
        } else {
            log::warn!("Path escapes served directory: {}", resolved.display());
            Err(io::ErrorKind::NotFound.into())
        }
    }
}

impl FileSystem for DirFileSystem {
    fn open(&self, path: &[u8]) -> io::Result<Node> {
        let resolved = self.resolve(path)?;
        let metadata = fs::metadata(&resolved).map_err(map_open_error)?;

        if metadata.is_dir() {
            let mut entries = fs::read_dir(&resolved)?
                .map(|entry| {
                    let entry = entry?;
                    // Follow symlinks so linked directories list with a slash.
                    let is_dir = fs::metadata(entry.path())
                        .map(|m| m.is_dir())
                        .unwrap_or(false);
                    Ok(DirEntry {
                        name: entry.file_name().as_encoded_bytes().to_vec(),
                        is_dir,
                    })
                })
                .collect::<io::Result<Vec<_>>>()?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(Node::Directory(entries));
        }

        let file = File::open(&resolved).map_err(map_open_error)?;
        Ok(Node::File(OpenFile {
            name: resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
            reader: Box::new(file),
        }))
    }
}

#[cfg(unix)]
fn os_string(bytes: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(bytes.to_vec())
}

#[cfg(not(unix))]
fn os_string(bytes: &[u8]) -> OsString {
    OsString::from(String::from_utf8_lossy(bytes).into_owned())
}

// `a.txt/b` fails with ENOTDIR; to a client that is simply a missing file.
fn map_open_error(e: io::Error) -> io::Error {
    match e.kind() {
        io::ErrorKind::NotADirectory => io::ErrorKind::NotFound.into(),
        _ => e,
    }
}

/// Refuses denied paths with `PermissionDenied` before delegating.
#[derive(Debug, Clone)]
pub struct GuardedFileSystem<F> {
    inner: F,
    deny: DenyList,
}

impl<F: FileSystem> GuardedFileSystem<F> {
    pub fn new(inner: F, deny: DenyList) -> Self {
        Self { inner, deny }
    }
}

impl<F: FileSystem> FileSystem for GuardedFileSystem<F> {
    fn open(&self, path: &[u8]) -> io::Result<Node> {
        if self.deny.is_denied(path) {
            let path = String::from_utf8_lossy(path);
            log::debug!("Denied access to {}", path);
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("access to `{path}` is denied"),
            ));
        }
        self.inner.open(path)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use anyhow::Result;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory filesystem that records every path it is asked to open.
    #[derive(Default)]
    pub(crate) struct SpyFileSystem {
        pub files: Vec<(String, Vec<u8>)>,
        pub opened: Mutex<Vec<String>>,
    }

    impl SpyFileSystem {
        pub fn with_file(mut self, path: &str, content: &str) -> Self {
            self.files.push((path.to_string(), content.as_bytes().to_vec()));
            self
        }

        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    impl FileSystem for SpyFileSystem {
        fn open(&self, path: &[u8]) -> io::Result<Node> {
            let path = String::from_utf8_lossy(path).into_owned();
            self.opened.lock().unwrap().push(path.clone());
            if path == "/" {
                let entries = self
                    .files
                    .iter()
                    .map(|(p, _)| DirEntry {
                        name: p.trim_start_matches('/').as_bytes().to_vec(),
                        is_dir: false,
                    })
                    .collect();
                return Ok(Node::Directory(entries));
            }
            let (name, content) = self
                .files
                .iter()
                .find(|(p, _)| *p == path)
                .ok_or(io::ErrorKind::NotFound)?;
            Ok(Node::File(OpenFile {
                name: name.trim_start_matches('/').to_string(),
                len: content.len() as u64,
                modified: None,
                reader: Box::new(Cursor::new(content.clone())),
            }))
        }
    }

    fn read_all(node: Node) -> Result<String> {
        match node {
            Node::File(mut file) => {
                let mut content = String::new();
                file.reader.read_to_string(&mut content)?;
                Ok(content)
            }
            Node::Directory(_) => anyhow::bail!("expected a file"),
        }
    }

    #[test]
    fn a_denied_path_never_reaches_the_inner_filesystem() {
        let guarded = GuardedFileSystem::new(
            SpyFileSystem::default().with_file("/secret/config.txt", "password"),
            DenyList::parse("secret"),
        );

        let err = guarded.open(b"/secret/config.txt").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(guarded.inner.opened().is_empty());
    }

    #[test]
    fn an_allowed_path_is_delegated_unchanged() -> Result<()> {
        let guarded = GuardedFileSystem::new(
            SpyFileSystem::default().with_file("/index.html", "hello"),
            DenyList::parse("secret"),
        );

        assert_eq!(read_all(guarded.open(b"/index.html")?)?, "hello");
        let missing = guarded.open(b"/missing.txt").unwrap_err();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);
        assert_eq!(guarded.inner.opened(), vec!["/index.html", "/missing.txt"]);
        Ok(())
    }

    #[test]
    fn an_empty_deny_list_guards_nothing() -> Result<()> {
        let guarded = GuardedFileSystem::new(
            SpyFileSystem::default().with_file("/secret", "x"),
            DenyList::parse(""),
        );
        assert_eq!(read_all(guarded.open(b"/secret")?)?, "x");
        Ok(())
    }

    #[test]
    fn a_directory_lists_sorted_entries() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("b.txt"), "b")?;
        std::fs::write(dir.path().join("a.txt"), "a")?;
        std::fs::create_dir(dir.path().join("sub"))?;

        let fs = DirFileSystem::new(dir.path());
        let Node::Directory(entries) = fs.open(b"/")? else {
            anyhow::bail!("expected a directory");
        };

        assert_eq!(
            entries,
            vec![
                DirEntry { name: b"a.txt".to_vec(), is_dir: false },
                DirEntry { name: b"b.txt".to_vec(), is_dir: false },
                DirEntry { name: b"sub".to_vec(), is_dir: true },
            ]
        );
        Ok(())
    }

    #[test]
    fn a_file_is_opened_with_its_metadata() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("sub/page.html"), "<p>hi</p>")?;

        let fs = DirFileSystem::new(dir.path());
        let Node::File(file) = fs.open(b"/sub/page.html")? else {
            anyhow::bail!("expected a file");
        };
        assert_eq!(file.name, "page.html");
        assert_eq!(file.len, 9);
        assert!(file.modified.is_some());
        Ok(())
    }

    #[test]
    fn parent_components_cannot_escape_the_root() -> Result<()> {
        let outer = TempDir::new()?;
        std::fs::write(outer.path().join("outside.txt"), "nope")?;
        let root = outer.path().join("root");
        std::fs::create_dir(&root)?;
        std::fs::write(root.join("outside.txt"), "inside")?;

        let fs = DirFileSystem::new(&root);
        assert_eq!(read_all(fs.open(b"/../outside.txt")?)?, "inside");
        Ok(())
    }

    #[test]
    fn missing_files_and_file_parents_are_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("a.txt"), "a")?;
        let fs = DirFileSystem::new(dir.path());

        assert_eq!(fs.open(b"/nope").unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(
            fs.open(b"/a.txt/b").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            fs.open(b"/a\0b").unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn file_names_need_not_be_utf8() -> Result<()> {
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new()?;
        let name = std::ffi::OsStr::from_bytes(b"caf\xe9.txt");
        if std::fs::write(dir.path().join(name), "latin-1").is_err() {
            // Some filesystems insist on UTF-8 names.
            return Ok(());
        }

        let fs = DirFileSystem::new(dir.path());
        assert_eq!(read_all(fs.open(b"/caf\xe9.txt")?)?, "latin-1");
        let Node::Directory(entries) = fs.open(b"/")? else {
            anyhow::bail!("expected a directory");
        };
        assert_eq!(entries[0].name, b"caf\xe9.txt");
        Ok(())
    }
}
