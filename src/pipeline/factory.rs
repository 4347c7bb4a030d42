//! Stage factory: resolves stage names to constructors.
//!
//! Built-in stages and types added with [`StageFactory::register_type`] are
//! always available. In [`DiscoveryMode::Dynamic`] the factory also asks
//! every [`PluginSource`] for stage types, once, the first time a lookup
//! needs them; a failing source is logged and skipped.
//!
//! Names are `category.identifier` (`readers.faux`). Lookups ignore ASCII
//! case, and the bare identifier (`faux`) resolves when exactly one
//! category provides it.

use crate::config::{DiscoveryMode, EngineConfig};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::options::{OptionValue, Options};
use crate::pipeline::plugin::{NativePluginLoader, PluginSource, StageRegistrar};
use crate::pipeline::stage::{AnyStage, BuiltinStage, StageKind};
use crate::pipeline::stages::{
    faux, memory, range, scale, script, text, FauxReader, MemoryWriter, NullWriter, RangeFilter,
    ScaleFilter, ScriptFilter, TextReader, TextWriter,
};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Builds a fresh stage.
pub type StageConstructor = Arc<dyn Fn() -> AnyStage + Send + Sync>;

/// Where a stage type came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StageOrigin {
    Builtin,
    /// Registered through `register_type`.
    Registered,
    /// Discovered from the named plugin source.
    Plugin(String),
}

impl std::fmt::Display for StageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOrigin::Builtin => write!(f, "builtin"),
            StageOrigin::Registered => write!(f, "registered"),
            StageOrigin::Plugin(source) => write!(f, "plugin:{}", source),
        }
    }
}

/// A registered stage type.
#[derive(Clone)]
pub struct StageEntry {
    pub name: String,
    pub description: String,
    pub link: String,
    pub origin: StageOrigin,
    pub ctor: StageConstructor,
}

impl StageEntry {
    /// The part after the category prefix.
    pub fn identifier(&self) -> &str {
        self.name
            .split_once('.')
            .map(|(_, id)| id)
            .unwrap_or(&self.name)
    }

    pub fn info(&self) -> StageInfo {
        StageInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            link: self.link.clone(),
            origin: self.origin.clone(),
        }
    }
}

impl std::fmt::Debug for StageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEntry")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Listing entry for `--drivers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub name: String,
    pub description: String,
    pub link: String,
    pub origin: StageOrigin,
}

/// Listing entry for `--options <stage>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionHelp {
    pub name: String,
    pub default: String,
    pub description: String,
}

/// A constructed stage together with its (still mutable) options.
pub struct StageInstance {
    pub stage: AnyStage,
    pub options: Options,
}

impl StageInstance {
    /// Wrap `stage` with its declared options at their defaults.
    pub fn new(stage: impl Into<AnyStage>) -> Self {
        let stage = stage.into();
        let options = Options::for_stage(stage.option_specs());
        Self { stage, options }
    }

    pub fn with_option(
        mut self,
        name: &str,
        value: impl Into<OptionValue>,
    ) -> PipelineResult<Self> {
        self.options.set(name, value)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }
}

/// Resolves stage names to stage instances.
pub struct StageFactory {
    mode: DiscoveryMode,
    entries: Vec<StageEntry>,
    sources: Vec<Box<dyn PluginSource>>,
    discovered: OnceLock<Vec<StageEntry>>,
}

impl StageFactory {
    /// A factory holding the built-in stages.
    pub fn new(mode: DiscoveryMode) -> Self {
        let mut factory = Self {
            mode,
            entries: Vec::new(),
            sources: Vec::new(),
            discovered: OnceLock::new(),
        };
        factory.register_builtins();
        factory
    }

    /// Discovery mode and native plugin paths taken from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut factory = Self::new(config.plugins.discovery);
        if config.plugins.discovery == DiscoveryMode::Dynamic {
            factory.add_source(Box::new(NativePluginLoader::with_search_dirs(
                config.plugin_search_paths(),
            )));
        }
        factory
    }

    fn register_builtins(&mut self) {
        fn builtin(
            name: &str,
            description: &str,
            link: &str,
            ctor: fn() -> BuiltinStage,
        ) -> StageEntry {
            StageEntry {
                name: name.to_string(),
                description: description.to_string(),
                link: link.to_string(),
                origin: StageOrigin::Builtin,
                ctor: Arc::new(move || AnyStage::Builtin(ctor())),
            }
        }

        self.entries.extend([
            builtin(faux::NAME, faux::DESCRIPTION, faux::LINK, || {
                BuiltinStage::FauxReader(FauxReader::new())
            }),
            builtin(
                text::READER_NAME,
                text::READER_DESCRIPTION,
                text::READER_LINK,
                || BuiltinStage::TextReader(TextReader::new()),
            ),
            builtin(scale::NAME, scale::DESCRIPTION, scale::LINK, || {
                BuiltinStage::ScaleFilter(ScaleFilter::new())
            }),
            builtin(range::NAME, range::DESCRIPTION, range::LINK, || {
                BuiltinStage::RangeFilter(RangeFilter::new())
            }),
            builtin(script::NAME, script::DESCRIPTION, script::LINK, || {
                BuiltinStage::ScriptFilter(ScriptFilter::new())
            }),
            builtin(
                memory::MEMORY_NAME,
                memory::MEMORY_DESCRIPTION,
                memory::MEMORY_LINK,
                || BuiltinStage::MemoryWriter(MemoryWriter::new()),
            ),
            builtin(
                memory::NULL_NAME,
                memory::NULL_DESCRIPTION,
                memory::NULL_LINK,
                || BuiltinStage::NullWriter(NullWriter::new()),
            ),
            builtin(
                text::WRITER_NAME,
                text::WRITER_DESCRIPTION,
                text::WRITER_LINK,
                || BuiltinStage::TextWriter(TextWriter::new()),
            ),
        ]);
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DiscoveryMode) {
        self.mode = mode;
    }

    /// Add a plugin source. Discovery reruns on the next dynamic lookup.
    pub fn add_source(&mut self, source: Box<dyn PluginSource>) {
        self.sources.push(source);
        self.discovered = OnceLock::new();
    }

    /// Register a stage type. A name already registered is replaced.
    pub fn register_type<F>(
        &mut self,
        name: &str,
        description: &str,
        link: &str,
        ctor: F,
    ) -> PipelineResult<()>
    where
        F: Fn() -> AnyStage + Send + Sync + 'static,
    {
        check_name(name)?;
        let entry = StageEntry {
            name: name.to_string(),
            description: description.to_string(),
            link: link.to_string(),
            origin: StageOrigin::Registered,
            ctor: Arc::new(ctor),
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => {
                tracing::warn!("Stage type '{}' re-registered", name);
                *existing = entry;
            }
            None => self.entries.push(entry),
        }
        Ok(())
    }

    /// Plugin-provided entries; runs discovery on first use.
    fn discovered(&self) -> &[StageEntry] {
        if self.mode == DiscoveryMode::Static {
            return &[];
        }
        self.discovered.get_or_init(|| {
            let mut found: Vec<StageEntry> = Vec::new();
            for source in &self.sources {
                let name = source.name();
                let mut registrar = StageRegistrar::new(name.as_str());
                match source.discover(&mut registrar) {
                    Ok(count) => {
                        tracing::info!("Plugin source '{}' provided {} stage types", name, count)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Plugin source '{}' failed: {}; continuing without it",
                            name,
                            e
                        );
                        continue;
                    }
                }
                for entry in registrar.into_entries() {
                    if let Err(e) = check_name(&entry.name) {
                        tracing::warn!("Ignoring plugin stage from '{}': {}", name, e);
                    } else if self.static_entry(&entry.name).is_some()
                        || found.iter().any(|f| f.name.eq_ignore_ascii_case(&entry.name))
                    {
                        tracing::warn!(
                            "Plugin stage '{}' from '{}' shadows an existing type; ignored",
                            entry.name,
                            name
                        );
                    } else {
                        found.push(entry);
                    }
                }
            }
            found
        })
    }

    fn static_entry(&self, name: &str) -> Option<&StageEntry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    fn all_entries(&self) -> impl Iterator<Item = &StageEntry> + '_ {
        self.entries.iter().chain(self.discovered().iter())
    }

    /// Resolve a qualified or short stage name.
    pub fn resolve(&self, name: &str) -> PipelineResult<&StageEntry> {
        let wanted = name.trim();
        if wanted.contains('.') {
            return self
                .all_entries()
                .find(|e| e.name.eq_ignore_ascii_case(wanted))
                .ok_or_else(|| PipelineError::UnknownStage(wanted.to_string()));
        }

        let candidates: Vec<&StageEntry> = self
            .all_entries()
            .filter(|e| e.identifier().eq_ignore_ascii_case(wanted))
            .collect();
        match candidates.as_slice() {
            [entry] => Ok(*entry),
            [] => Err(PipelineError::UnknownStage(wanted.to_string())),
            many => {
                let names: Vec<&str> = many.iter().map(|e| e.name.as_str()).collect();
                Err(PipelineError::UnknownStage(format!(
                    "{} (ambiguous: {})",
                    wanted,
                    names.join(", ")
                )))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Construct a stage and apply `options` in order.
    pub fn create(
        &self,
        name: &str,
        options: &[(String, OptionValue)],
    ) -> PipelineResult<StageInstance> {
        let entry = self.resolve(name)?;
        let mut instance = StageInstance::new((entry.ctor)());
        for (key, value) in options {
            instance.options.set(key, value.clone())?;
        }
        tracing::debug!("Created stage '{}' ({})", entry.name, entry.origin);
        Ok(instance)
    }

    /// Every known stage type, sorted by name.
    pub fn list(&self) -> Vec<StageInfo> {
        let mut infos: Vec<StageInfo> = self.all_entries().map(StageEntry::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Options accepted by stage `name`, common options first.
    pub fn option_help(&self, name: &str) -> PipelineResult<Vec<OptionHelp>> {
        let instance = self.create(name, &[])?;
        Ok(instance
            .options
            .specs()
            .iter()
            .map(|spec| OptionHelp {
                name: spec.name.to_string(),
                default: spec.default_display(),
                description: spec.description.to_string(),
            })
            .collect())
    }

    /// Reader type for a filename, by extension.
    pub fn infer_reader_driver(path: impl AsRef<Path>) -> Option<&'static str> {
        match extension(path.as_ref())?.as_str() {
            "txt" | "csv" | "xyz" => Some(text::READER_NAME),
            _ => None,
        }
    }

    /// Writer type for a filename, by extension.
    pub fn infer_writer_driver(path: impl AsRef<Path>) -> Option<&'static str> {
        match extension(path.as_ref())?.as_str() {
            "txt" | "csv" | "xyz" => Some(text::WRITER_NAME),
            _ => None,
        }
    }
}

impl Default for StageFactory {
    fn default() -> Self {
        Self::new(DiscoveryMode::Static)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Stage type names are `category.identifier` with a known category.
fn check_name(name: &str) -> PipelineResult<()> {
    let valid = match name.split_once('.') {
        Some((category, id)) => StageKind::from_prefix(category).is_some() && !id.is_empty(),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidPipeline(format!(
            "stage type '{}' must be readers.*, filters.* or writers.*",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;
    use crate::pipeline::plugin::MockPluginSource;
    use crate::pipeline::stages::NullWriter;

    fn mock_source(stage: &'static str) -> MockPluginSource {
        let mut source = MockPluginSource::new();
        source.expect_name().return_const("mock".to_string());
        source.expect_discover().times(1).returning(move |registrar| {
            registrar.register(stage, "Mock stage", "", || Box::new(NullWriter::new()));
            Ok(1)
        });
        source
    }

    #[test]
    fn test_builtins_listed_sorted() {
        let factory = StageFactory::default();
        let names: Vec<String> = factory.list().into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            vec![
                "filters.range",
                "filters.scale",
                "filters.script",
                "readers.faux",
                "readers.text",
                "writers.memory",
                "writers.null",
                "writers.text",
            ]
        );
    }

    #[test]
    fn test_resolution_forms() {
        let factory = StageFactory::default();
        assert_eq!(factory.resolve("readers.faux").unwrap().name, "readers.faux");
        assert_eq!(factory.resolve("Readers.FAUX").unwrap().name, "readers.faux");
        assert_eq!(factory.resolve("faux").unwrap().name, "readers.faux");
        assert_eq!(factory.resolve("range").unwrap().name, "filters.range");
    }

    #[test]
    fn test_ambiguous_short_name() {
        // readers.text and writers.text
        let err = StageFactory::default().resolve("text").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownStage);
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_create_applies_options() {
        let factory = StageFactory::default();
        let instance = factory
            .create("readers.faux", &[("count".to_string(), OptionValue::Int(12))])
            .unwrap();
        assert_eq!(instance.kind(), StageKind::Reader);
        assert_eq!(instance.options.get_int("count").unwrap(), 12);

        let err = factory
            .create("readers.faux", &[("colour".to_string(), OptionValue::Bool(true))])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownOption);
    }

    #[test]
    fn test_dynamic_discovery_runs_once() {
        let mut factory = StageFactory::new(DiscoveryMode::Static);
        factory.add_source(Box::new(mock_source("readers.missing")));

        let err = factory.create("readers.missing", &[]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownStage);

        factory.set_mode(DiscoveryMode::Dynamic);
        assert!(factory.create("readers.missing", &[]).is_ok());
        assert!(factory.create("missing", &[]).is_ok());
        assert!(factory
            .list()
            .iter()
            .any(|i| i.origin == StageOrigin::Plugin("mock".to_string())));
    }

    #[test]
    fn test_failing_source_degrades_to_static() {
        let mut source = MockPluginSource::new();
        source.expect_name().return_const("broken".to_string());
        source
            .expect_discover()
            .times(1)
            .returning(|_| Err(PipelineError::Resource("cannot scan".to_string())));

        let mut factory = StageFactory::new(DiscoveryMode::Dynamic);
        factory.add_source(Box::new(source));
        assert!(factory.create("readers.faux", &[]).is_ok());
        assert!(factory.create("readers.missing", &[]).is_err());
    }

    #[test]
    fn test_plugin_cannot_shadow_builtin() {
        let mut factory = StageFactory::new(DiscoveryMode::Dynamic);
        factory.add_source(Box::new(mock_source("readers.faux")));
        let instance = factory.create("readers.faux", &[]).unwrap();
        assert!(matches!(instance.stage, AnyStage::Builtin(_)));
    }

    #[test]
    fn test_register_type() {
        let mut factory = StageFactory::default();
        factory
            .register_type("writers.sink", "Discards", "", || {
                AnyStage::Builtin(BuiltinStage::NullWriter(NullWriter::new()))
            })
            .unwrap();
        assert!(factory.contains("sink"));
        assert!(factory
            .register_type("sinks.bad", "", "", || {
                AnyStage::Builtin(BuiltinStage::NullWriter(NullWriter::new()))
            })
            .is_err());
    }

    #[test]
    fn test_option_help_includes_common_options() {
        let help = StageFactory::default().option_help("filters.range").unwrap();
        let names: Vec<&str> = help.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(&names[..2], &["debug", "verbose"]);
        assert!(names.contains(&"dimension"));
        let invert = help.iter().find(|h| h.name == "invert").unwrap();
        assert_eq!(invert.default, "false");
    }

    #[test]
    fn test_driver_inference() {
        assert_eq!(
            StageFactory::infer_reader_driver("points.CSV"),
            Some("readers.text")
        );
        assert_eq!(
            StageFactory::infer_writer_driver("/tmp/out.xyz"),
            Some("writers.text")
        );
        assert_eq!(StageFactory::infer_reader_driver("points.las"), None);
        assert_eq!(StageFactory::infer_reader_driver("points"), None);
    }
}
