//! Asset overlay consulted by the interpreter's file access before the real
//! filesystem.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Read-only view over a tree of assets addressed by `/`-separated paths
/// relative to the tree root.
pub trait AssetResolver: Send + Sync + 'static {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Option<Vec<u8>>;
    fn is_directory(&self, path: &str) -> bool;
    /// Names of the direct children of `path`, sorted.
    fn enumerate(&self, path: &str) -> Vec<String>;
}

impl<T: AssetResolver + ?Sized> AssetResolver for Arc<T> {
    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        (**self).read(path)
    }

    fn is_directory(&self, path: &str) -> bool {
        (**self).is_directory(path)
    }

    fn enumerate(&self, path: &str) -> Vec<String> {
        (**self).enumerate(path)
    }
}

/// Collapses `.`, `..` and repeated separators. The result never escapes the
/// root and has no leading or trailing `/`.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn children<'a>(files: impl Iterator<Item = &'a str>, dir: &str) -> Vec<String> {
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    };
    let names: BTreeSet<String> = files
        .filter_map(|name| name.strip_prefix(prefix.as_str()))
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect();
    names.into_iter().collect()
}

fn has_descendant<'a>(mut files: impl Iterator<Item = &'a str>, dir: &str) -> bool {
    if dir.is_empty() {
        return true;
    }
    let prefix = format!("{dir}/");
    files.any(|name| name.starts_with(&prefix))
}

/// Assets registered in memory by the host.
#[derive(Debug, Default, Clone)]
pub struct MemoryResolver {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(normalize(path), contents.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl AssetResolver for MemoryResolver {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_directory(path)
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    fn is_directory(&self, path: &str) -> bool {
        has_descendant(self.files.keys().map(String::as_str), path)
    }

    fn enumerate(&self, path: &str) -> Vec<String> {
        children(self.files.keys().map(String::as_str), path)
    }
}

/// Assets served from a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(normalize(path))
    }
}

impl AssetResolver for DirectoryResolver {
    fn exists(&self, path: &str) -> bool {
        self.host_path(path).exists()
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        let path = self.host_path(path);
        if path.is_dir() {
            return None;
        }
        std::fs::read(path).ok()
    }

    fn is_directory(&self, path: &str) -> bool {
        self.host_path(path).is_dir()
    }

    fn enumerate(&self, path: &str) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.host_path(path)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Assets served from a zip archive.
#[cfg(feature = "archive")]
pub struct ArchiveResolver {
    archive: parking_lot::Mutex<zip::ZipArchive<std::fs::File>>,
    /// Normalized path to the entry name stored in the archive.
    files: BTreeMap<String, String>,
}

#[cfg(feature = "archive")]
impl ArchiveResolver {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
        let files = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(|name| (normalize(name), name.to_owned()))
            .collect();
        Ok(Self {
            archive: parking_lot::Mutex::new(archive),
            files,
        })
    }
}

#[cfg(feature = "archive")]
impl AssetResolver for ArchiveResolver {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_directory(path)
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        use std::io::Read;

        let name = self.files.get(path)?;
        let mut archive = self.archive.lock();
        let mut entry = archive.by_name(name).ok()?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).ok()?;
        Some(contents)
    }

    fn is_directory(&self, path: &str) -> bool {
        has_descendant(self.files.keys().map(String::as_str), path)
    }

    fn enumerate(&self, path: &str) -> Vec<String> {
        children(self.files.keys().map(String::as_str), path)
    }
}

/// Per-session path state: the application root and a virtual current
/// directory relative to it.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    app_root: PathBuf,
    cwd: String,
}

impl ResolveContext {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            cwd: String::new(),
        }
    }

    #[must_use]
    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    /// Virtual current directory, empty at the root.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Maps a script-supplied path onto the asset tree. Absolute paths
    /// outside the application root have no asset counterpart.
    #[must_use]
    pub fn asset_path(&self, path: &str) -> Option<String> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            let relative = candidate.strip_prefix(&self.app_root).ok()?;
            return Some(normalize(&relative.to_string_lossy()));
        }
        Some(normalize(&format!("{}/{path}", self.cwd)))
    }

    /// Maps a script-supplied path onto the real filesystem.
    #[must_use]
    pub fn host_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        self.app_root.join(&self.cwd).join(path)
    }
}

/// A resolver layered over the real filesystem.
pub struct Overlay {
    resolver: Option<Arc<dyn AssetResolver>>,
    context: ResolveContext,
}

impl Overlay {
    pub fn new(resolver: Option<Arc<dyn AssetResolver>>, context: ResolveContext) -> Self {
        Self { resolver, context }
    }

    #[must_use]
    pub const fn context(&self) -> &ResolveContext {
        &self.context
    }

    fn asset<T>(&self, path: &str, f: impl FnOnce(&dyn AssetResolver, &str) -> T) -> Option<T> {
        let resolver = self.resolver.as_deref()?;
        let asset = self.context.asset_path(path)?;
        Some(f(resolver, &asset))
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.asset(path, |r, p| r.exists(p)).unwrap_or(false)
            || self.context.host_path(path).exists()
    }

    #[must_use]
    pub fn is_directory(&self, path: &str) -> bool {
        self.asset(path, |r, p| r.is_directory(p)).unwrap_or(false)
            || self.context.host_path(path).is_dir()
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        if let Some(contents) = self.asset(path, |r, p| r.read(p)).flatten() {
            return Ok(contents);
        }
        std::fs::read(self.context.host_path(path))
    }

    /// Directory listing merged from the resolver and the filesystem.
    pub fn enumerate(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = BTreeSet::new();
        let mut found = false;
        if self.asset(path, |r, p| r.is_directory(p)).unwrap_or(false) {
            found = true;
            names.extend(self.asset(path, |r, p| r.enumerate(p)).unwrap_or_default());
        }
        match std::fs::read_dir(self.context.host_path(path)) {
            Ok(entries) => {
                found = true;
                names.extend(
                    entries
                        .filter_map(|entry| entry.ok())
                        .map(|entry| entry.file_name().to_string_lossy().into_owned()),
                );
            }
            Err(e) if !found => return Err(e),
            Err(_) => {}
        }
        Ok(names.into_iter().collect())
    }

    /// Looks up a module file in the resolver only, relative to the asset
    /// root.
    #[must_use]
    pub fn module_source(&self, path: &str) -> Option<Vec<u8>> {
        self.resolver.as_deref()?.read(&normalize(path))
    }

    /// Changes the virtual current directory.
    pub fn chdir(&mut self, path: &str) -> io::Result<()> {
        if !self.is_directory(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {path}"),
            ));
        }
        let Some(cwd) = self.context.asset_path(path) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("outside application root: {path}"),
            ));
        };
        self.context.cwd = cwd;
        Ok(())
    }
}
