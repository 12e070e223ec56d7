use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::{Error, Result},
    overlay::{AssetResolver, DirectoryResolver},
};

pub const ENV_APP_PATH: &str = "SCRIPTVM_APP_PATH";
pub const ENV_STDLIB_DIR: &str = "SCRIPTVM_STDLIB_DIR";
pub const ENV_NATIVE_DIR: &str = "SCRIPTVM_NATIVE_DIR";
pub const ENV_ARCHIVE: &str = "SCRIPTVM_ARCHIVE";

/// Paths an interpreter runtime is created from.
///
/// The strings are passed through to the interpreter unmodified; they are
/// only checked for existence when a session is created.
#[derive(Clone)]
pub struct SessionConfig {
    app_path: PathBuf,
    stdlib_dir: PathBuf,
    native_dir: PathBuf,
    archive: Option<PathBuf>,
    resolver: Option<Arc<dyn AssetResolver>>,
}

impl SessionConfig {
    pub fn new(
        app_path: impl Into<PathBuf>,
        stdlib_dir: impl Into<PathBuf>,
        native_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_path: app_path.into(),
            stdlib_dir: stdlib_dir.into(),
            native_dir: native_dir.into(),
            archive: None,
            resolver: None,
        }
    }

    /// Reads the configuration from `SCRIPTVM_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let (app_path, app_path_source) = std::env::var(ENV_APP_PATH).map_or_else(
            |_| {
                std::env::current_dir()
                    .map_or_else(|_| (PathBuf::from("."), "fallback"), |p| (p, "cwd"))
            },
            |value| (PathBuf::from(value), "env"),
        );
        let stdlib_dir = std::env::var(ENV_STDLIB_DIR).unwrap_or_default();
        let native_dir = std::env::var(ENV_NATIVE_DIR).unwrap_or_default();
        let archive = match std::env::var(ENV_ARCHIVE) {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(PathBuf::from(value)),
            Err(_) => None,
        };

        tracing::debug!(
            app_path = %app_path.display(),
            app_path_source,
            stdlib_dir = %stdlib_dir,
            native_dir = %native_dir,
            archive = ?archive,
            "Resolved session config from environment"
        );

        let config = Self::new(app_path, stdlib_dir, native_dir);
        match archive {
            Some(archive) => config.with_archive(archive),
            None => config,
        }
    }

    /// Serves assets from a zip archive or a directory.
    #[must_use]
    pub fn with_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive = Some(path.into());
        self
    }

    /// Serves assets from `resolver`. Takes precedence over an archive.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn AssetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn app_path(&self) -> &Path {
        &self.app_path
    }

    #[must_use]
    pub fn stdlib_dir(&self) -> &Path {
        &self.stdlib_dir
    }

    #[must_use]
    pub fn native_dir(&self) -> &Path {
        &self.native_dir
    }

    #[must_use]
    pub fn archive(&self) -> Option<&Path> {
        self.archive.as_deref()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.app_path.is_dir() {
            return Err(Error::Creation(format!(
                "application path is not a directory: {}",
                self.app_path.display()
            )));
        }
        for (what, dir) in [
            ("standard library", &self.stdlib_dir),
            ("native extension", &self.native_dir),
        ] {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                return Err(Error::Creation(format!(
                    "{what} directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn open_resolver(&self) -> Result<Option<Arc<dyn AssetResolver>>> {
        if let Some(resolver) = &self.resolver {
            return Ok(Some(resolver.clone()));
        }
        let Some(archive) = &self.archive else {
            return Ok(None);
        };
        if archive.is_dir() {
            return Ok(Some(Arc::new(DirectoryResolver::new(archive))));
        }
        open_archive(archive).map(Some)
    }
}

#[cfg(feature = "archive")]
fn open_archive(path: &Path) -> Result<Arc<dyn AssetResolver>> {
    crate::overlay::ArchiveResolver::open(path)
        .map(|r| Arc::new(r) as Arc<dyn AssetResolver>)
        .map_err(|e| Error::Creation(format!("cannot open archive {}: {e}", path.display())))
}

#[cfg(not(feature = "archive"))]
fn open_archive(path: &Path) -> Result<Arc<dyn AssetResolver>> {
    Err(Error::Creation(format!(
        "archive support is disabled: {}",
        path.display()
    )))
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("app_path", &self.app_path)
            .field("stdlib_dir", &self.stdlib_dir)
            .field("native_dir", &self.native_dir)
            .field("archive", &self.archive)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}
