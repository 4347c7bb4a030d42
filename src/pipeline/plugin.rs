//! Plugin stages.
//!
//! A [`PluginSource`] contributes stage types to a [`StageFactory`] during
//! dynamic discovery by calling [`StageRegistrar::register`] once per type.
//! [`NativePluginLoader`] is the shared-library source: every `.so`, `.dll`
//! or `.dylib` found on its search paths must export
//!
//! ```ignore
//! #[no_mangle]
//! pub unsafe extern "C" fn pointflow_register_stages(registrar: *mut StageRegistrar) {
//!     let registrar = &mut *registrar;
//!     registrar.register("filters.colorize", "Assigns RGB from a raster", "", || {
//!         Box::new(Colorize::default())
//!     });
//! }
//! ```
//!
//! Plugins are built against the same `pointflow` version and toolchain as
//! the host; no ABI stability is offered beyond that. Each library is opened
//! at most once per process: later discoveries, from any factory, replay the
//! stage types it registered the first time.
//!
//! [`StageFactory`]: crate::pipeline::factory::StageFactory

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::factory::{StageEntry, StageOrigin};
use crate::pipeline::stage::{AnyStage, Stage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Symbol every native plugin library exports.
pub const REGISTER_SYMBOL: &str = "pointflow_register_stages";

/// Signature of [`REGISTER_SYMBOL`].
pub type RegisterFn = unsafe extern "C" fn(registrar: *mut StageRegistrar);

/// Stage types registered by each opened library, keyed by canonical path.
static LOADED: OnceLock<Mutex<HashMap<PathBuf, Vec<StageEntry>>>> = OnceLock::new();

/// Replay the registrations cached under `key`, or run `open` into a fresh
/// registrar and cache what it registered. Failures are not cached.
fn load_once<F>(key: PathBuf, registrar: &mut StageRegistrar, open: F) -> PipelineResult<()>
where
    F: FnOnce(&mut StageRegistrar) -> PipelineResult<()>,
{
    let mut loaded = LOADED
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());

    if let Some(entries) = loaded.get(&key) {
        tracing::debug!("{} already loaded", key.display());
        registrar.adopt(entries.iter().cloned());
        return Ok(());
    }

    let mut own = StageRegistrar::new(registrar.source());
    open(&mut own)?;
    registrar.adopt(own.entries.iter().cloned());
    loaded.insert(key, own.entries);
    Ok(())
}

/// A provider of stage types discovered at runtime.
#[cfg_attr(test, mockall::automock)]
pub trait PluginSource: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> String;

    /// Register every stage type this source provides. Returns how many
    /// were registered.
    fn discover(&self, registrar: &mut StageRegistrar) -> PipelineResult<usize>;
}

/// Collects the stage types one plugin source registers.
pub struct StageRegistrar {
    source: String,
    entries: Vec<StageEntry>,
}

impl StageRegistrar {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entries: Vec::new(),
        }
    }

    /// Register a stage type under its qualified `category.identifier` name.
    pub fn register<F>(&mut self, name: &str, description: &str, link: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.entries.push(StageEntry {
            name: name.to_string(),
            description: description.to_string(),
            link: link.to_string(),
            origin: StageOrigin::Plugin(self.source.clone()),
            ctor: Arc::new(move || AnyStage::Plugin(ctor())),
        });
    }

    /// Take over entries registered elsewhere, under this registrar's source.
    fn adopt(&mut self, entries: impl IntoIterator<Item = StageEntry>) {
        for mut entry in entries {
            entry.origin = StageOrigin::Plugin(self.source.clone());
            self.entries.push(entry);
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<StageEntry> {
        self.entries
    }
}

/// Loads stage plugins from shared libraries.
pub struct NativePluginLoader {
    search_dirs: Vec<PathBuf>,
}

impl NativePluginLoader {
    pub fn new() -> Self {
        Self {
            search_dirs: Vec::new(),
        }
    }

    pub fn with_search_dirs(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            search_dirs: dirs.into_iter().collect(),
        }
    }

    /// Add a directory to search for plugin libraries.
    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) {
        self.search_dirs.push(dir.into());
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// List plugin libraries in the search directories, sorted per
    /// directory. Missing directories are skipped.
    pub fn libraries(&self) -> Vec<PathBuf> {
        let mut libraries = Vec::new();
        for dir in &self.search_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                tracing::debug!("Plugin directory {} not readable", dir.display());
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| is_plugin_library(path))
                .collect();
            found.sort();
            libraries.extend(found);
        }
        libraries
    }

    /// Load one library and let it register its stages. A library already
    /// loaded by this process is not opened again.
    ///
    /// # Safety
    ///
    /// Loading native plugins executes arbitrary code. Only load trusted
    /// plugins built against this crate version.
    pub unsafe fn load(&self, path: &Path, registrar: &mut StageRegistrar) -> PipelineResult<()> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        // SAFETY: forwarded from this function's contract.
        load_once(key, registrar, |own| unsafe { Self::open(path, own) })
    }

    /// Open `path`, call its registration symbol and keep it mapped.
    unsafe fn open(path: &Path, registrar: &mut StageRegistrar) -> PipelineResult<()> {
        let lib = libloading::Library::new(path)
            .map_err(|e| PipelineError::Resource(format!("{}: {}", path.display(), e)))?;

        let register: libloading::Symbol<RegisterFn> =
            lib.get(REGISTER_SYMBOL.as_bytes()).map_err(|e| {
                PipelineError::Resource(format!(
                    "Symbol '{}' not found in {}: {}",
                    REGISTER_SYMBOL,
                    path.display(),
                    e
                ))
            })?;
        register(registrar as *mut StageRegistrar);

        // Registered constructors point into the library; keep it mapped
        // for the rest of the process.
        std::mem::forget(lib);
        Ok(())
    }
}

impl Default for NativePluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginSource for NativePluginLoader {
    fn name(&self) -> String {
        "native".to_string()
    }

    fn discover(&self, registrar: &mut StageRegistrar) -> PipelineResult<usize> {
        let start = registrar.len();
        for path in self.libraries() {
            let before = registrar.len();
            // SAFETY: libraries on the configured search paths are trusted.
            match unsafe { self.load(&path, registrar) } {
                Ok(()) => tracing::info!(
                    "Loaded {} stage types from {}",
                    registrar.len() - before,
                    path.display()
                ),
                Err(e) => tracing::warn!("Skipping plugin {}: {}", path.display(), e),
            }
        }
        Ok(registrar.len() - start)
    }
}

/// Check if a file path looks like a plugin shared library.
pub fn is_plugin_library(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "so" | "dll" | "dylib")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::NullWriter;

    #[test]
    fn test_is_plugin_library() {
        assert!(is_plugin_library(Path::new("libpointflow_las.so")));
        assert!(is_plugin_library(Path::new("pointflow_las.dll")));
        assert!(is_plugin_library(Path::new("libpointflow_las.dylib")));
        assert!(!is_plugin_library(Path::new("pipeline.json")));
        assert!(!is_plugin_library(Path::new("libfoo")));
    }

    #[test]
    fn test_libraries_filters_and_sorts() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("libb.so"), b"fake").unwrap();
        std::fs::write(dir.path().join("a.dll"), b"fake").unwrap();
        std::fs::write(dir.path().join("README.md"), b"docs").unwrap();

        let mut loader = NativePluginLoader::new();
        loader.add_search_dir(dir.path());
        loader.add_search_dir("/nonexistent/pointflow/plugins");
        let libraries = loader.libraries();
        assert_eq!(
            libraries,
            vec![dir.path().join("a.dll"), dir.path().join("libb.so")]
        );
    }

    #[test]
    fn test_broken_library_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("libbroken.so"), b"not a library").unwrap();

        let loader = NativePluginLoader::with_search_dirs([dir.path().to_path_buf()]);
        let mut registrar = StageRegistrar::new(loader.name());
        assert_eq!(loader.discover(&mut registrar).unwrap(), 0);
        assert!(registrar.is_empty());
    }

    #[test]
    fn test_library_opened_once_per_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("libsinks.so");
        let mut opened = 0;

        for source in ["first", "second"] {
            let mut registrar = StageRegistrar::new(source);
            load_once(key.clone(), &mut registrar, |own| {
                opened += 1;
                own.register("writers.sink", "Test sink", "", || Box::new(NullWriter::new()));
                Ok(())
            })
            .unwrap();

            let entries = registrar.into_entries();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].origin, StageOrigin::Plugin(source.to_string()));
        }
        assert_eq!(opened, 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("libflaky.so");
        let mut attempts = 0;

        let mut registrar = StageRegistrar::new("native");
        let err = load_once(key.clone(), &mut registrar, |_| {
            attempts += 1;
            Err(PipelineError::Resource("not a library".to_string()))
        });
        assert!(err.is_err());
        assert!(registrar.is_empty());

        load_once(key, &mut registrar, |own| {
            attempts += 1;
            own.register("writers.sink", "Test sink", "", || Box::new(NullWriter::new()));
            Ok(())
        })
        .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(registrar.len(), 1);
    }

    #[test]
    fn test_registrar_tags_origin() {
        let mut registrar = StageRegistrar::new("test-source");
        registrar.register("writers.sink", "Test sink", "", || Box::new(NullWriter::new()));
        assert_eq!(registrar.len(), 1);

        let entries = registrar.into_entries();
        assert_eq!(entries[0].name, "writers.sink");
        assert_eq!(
            entries[0].origin,
            StageOrigin::Plugin("test-source".to_string())
        );
        assert_eq!((entries[0].ctor)().name(), "writers.null");
    }
}
