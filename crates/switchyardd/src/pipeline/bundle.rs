//! Import resolution and single-artefact bundling.
//!
//! The bundler walks `import "<path>" as <alias>;` statements from the entry
//! script, rewrites each import path to a stable module id and writes every
//! reachable module plus the entry into one artefact. The script engine later
//! serves the module sections from memory, so nothing outside the artefact is
//! read at load time.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::PIPELINE_TARGET;
use super::files::{atomic_write, short_hash};
use super::lexer::{Segment, is_ident_char, is_ident_start, segments};

/// Global name the entry's configuration value is bound to by default.
pub const DEFAULT_NAMESPACE: &str = "switchyard_config";

const MARKER: &str = "//@switchyard ";
/// Source lines starting with this gain an extra `@` so none reads as a marker.
const MARKER_LEAD: &str = "//@";
const ESCAPED_LEAD: &str = "//@@";
const FORMAT_VERSION: &str = "1";
const SCRIPT_EXTENSION: &str = "rhai";
const BUNDLE_KEY_LEN: usize = 8;

/// Output of the build pipeline and input to the script engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledConfig {
    /// Path of the bundled artefact.
    pub bundle_path: PathBuf,
    /// Global the entry's value is bound to.
    pub namespace: String,
}

/// Aggregated bundling failure. No artefact is written when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to bundle '{}': {}", .entry.display(), .diagnostics.join("; "))]
pub struct BuildError {
    /// Configuration file being bundled.
    pub entry: PathBuf,
    /// Every diagnostic collected during the walk.
    pub diagnostics: Vec<String>,
}

/// One section of a bundle artefact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleModule {
    /// Stable id import paths were rewritten to.
    pub id: String,
    /// Names the module was imported under.
    pub aliases: Vec<String>,
    /// File the section was read from.
    pub origin: PathBuf,
    /// Rewritten source.
    pub source: String,
}

/// In-memory form of a bundle artefact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    /// Global name for the entry's value.
    pub namespace: String,
    /// Imported modules, dependencies first.
    pub modules: Vec<BundleModule>,
    /// Entry script.
    pub entry: BundleModule,
}

/// Errors raised while reading a bundle artefact back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    /// The first line is not a bundle header.
    #[error("bundle header missing")]
    MissingHeader,
    /// The header names a format this build does not understand.
    #[error("unsupported bundle format '{0}'")]
    UnsupportedFormat(String),
    /// A section marker could not be parsed.
    #[error("malformed section marker '{0}'")]
    MalformedMarker(String),
    /// No entry section was found.
    #[error("bundle has no entry section")]
    MissingEntry,
}

impl BundleArtifact {
    /// Renders the artefact text.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{MARKER}bundle={FORMAT_VERSION} namespace={}\n",
            self.namespace
        );
        for module in &self.modules {
            out.push_str(&format!(
                "{MARKER}module id={} aliases={} origin={}\n",
                module.id,
                module.aliases.join(","),
                module.origin.display()
            ));
            push_source(&mut out, &module.source);
        }
        out.push_str(&format!(
            "{MARKER}entry origin={}\n",
            self.entry.origin.display()
        ));
        push_source(&mut out, &self.entry.source);
        out
    }

    /// Parses artefact text produced by [`BundleArtifact::render`].
    pub fn parse(text: &str) -> Result<Self, ArtifactError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .and_then(|line| line.strip_prefix(MARKER))
            .ok_or(ArtifactError::MissingHeader)?;
        let fields = marker_fields(header);
        let format = fields.get("bundle").copied().unwrap_or_default();
        if format != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedFormat(format.to_owned()));
        }
        let namespace = fields
            .get("namespace")
            .copied()
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_owned();

        let mut modules = Vec::new();
        let mut entry = None;
        let mut current: Option<(Section, Vec<Cow<'_, str>>)> = None;
        for line in lines {
            if let Some(marker) = line.strip_prefix(MARKER) {
                if let Some((section, body)) = current.take() {
                    section.finish(body, &mut modules, &mut entry);
                }
                current = Some((Section::parse(marker)?, Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(unescape(line));
            }
        }
        if let Some((section, body)) = current.take() {
            section.finish(body, &mut modules, &mut entry);
        }

        let entry = entry.ok_or(ArtifactError::MissingEntry)?;
        Ok(Self {
            namespace,
            modules,
            entry,
        })
    }
}

fn push_source(out: &mut String, source: &str) {
    for line in source.lines() {
        match line.strip_prefix(MARKER_LEAD) {
            Some(rest) => {
                out.push_str(ESCAPED_LEAD);
                out.push_str(rest);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
}

fn unescape(line: &str) -> Cow<'_, str> {
    match line.strip_prefix(ESCAPED_LEAD) {
        Some(rest) => Cow::Owned(format!("{MARKER_LEAD}{rest}")),
        None => Cow::Borrowed(line),
    }
}

/// Splits `key=value` marker fields; `origin` swallows the rest of the line.
fn marker_fields(marker: &str) -> BTreeMap<&str, &str> {
    let mut fields = BTreeMap::new();
    let mut rest = marker.trim();
    while !rest.is_empty() {
        let Some((key, tail)) = rest.split_once('=') else {
            fields.insert(rest, "");
            break;
        };
        let key = key.trim();
        if key == "origin" {
            fields.insert(key, tail);
            break;
        }
        let (value, remainder) = tail.split_once(' ').unwrap_or((tail, ""));
        fields.insert(key, value);
        rest = remainder.trim_start();
    }
    fields
}

enum Section {
    Module {
        id: String,
        aliases: Vec<String>,
        origin: PathBuf,
    },
    Entry {
        origin: PathBuf,
    },
}

impl Section {
    fn parse(marker: &str) -> Result<Self, ArtifactError> {
        let malformed = || ArtifactError::MalformedMarker(marker.to_owned());
        let (kind, rest) = marker.split_once(' ').ok_or_else(malformed)?;
        let fields = marker_fields(rest);
        let origin = PathBuf::from(fields.get("origin").copied().ok_or_else(malformed)?);
        match kind {
            "module" => Ok(Self::Module {
                id: fields.get("id").copied().ok_or_else(malformed)?.to_owned(),
                aliases: fields
                    .get("aliases")
                    .map(|list| {
                        list.split(',')
                            .filter(|alias| !alias.is_empty())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default(),
                origin,
            }),
            "entry" => Ok(Self::Entry { origin }),
            _ => Err(malformed()),
        }
    }

    fn finish(
        self,
        body: Vec<Cow<'_, str>>,
        modules: &mut Vec<BundleModule>,
        entry: &mut Option<BundleModule>,
    ) {
        let source = body.join("\n");
        match self {
            Self::Module {
                id,
                aliases,
                origin,
            } => modules.push(BundleModule {
                id,
                aliases,
                origin,
                source,
            }),
            Self::Entry { origin } => {
                *entry = Some(BundleModule {
                    id: "entry".to_owned(),
                    aliases: Vec::new(),
                    origin,
                    source,
                });
            }
        }
    }
}

/// Produces bundle artefacts in the cache directory.
#[derive(Debug, Clone)]
pub struct Bundler {
    dir: PathBuf,
    version: String,
}

impl Bundler {
    /// Creates a bundler writing artefacts into `dir`.
    pub fn new(dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            version: version.into(),
        }
    }

    /// Artefact path for a configuration file.
    pub fn artifact_path(&self, origin: &Path) -> PathBuf {
        let origin_text = origin.to_string_lossy();
        let key = short_hash(
            &[origin_text.as_ref(), "|version:", &self.version],
            BUNDLE_KEY_LEN,
        );
        self.dir.join(format!("bundle_{key}.{SCRIPT_EXTENSION}"))
    }

    /// Bundles `entry` into one artefact bound to `namespace`.
    ///
    /// `origin` is the user's configuration file. Relative imports in the entry
    /// resolve against its directory, so a transformed copy of the entry living
    /// in the cache still finds its siblings.
    pub fn bundle(
        &self,
        entry: &Path,
        origin: &Path,
        namespace: &str,
    ) -> Result<CompiledConfig, BuildError> {
        let mut walk = ImportWalk::new();
        let base_dir = origin.parent().unwrap_or_else(|| Path::new("."));
        let entry_key = fs::canonicalize(entry).unwrap_or_else(|_| entry.to_path_buf());

        walk.stack.push(entry_key);
        let entry_source = walk.load(entry, origin, base_dir);
        walk.stack.pop();

        let fail = |diagnostics: Vec<String>| BuildError {
            entry: origin.to_path_buf(),
            diagnostics,
        };
        if !walk.diagnostics.is_empty() {
            return Err(fail(walk.diagnostics));
        }
        let Some(entry_source) = entry_source else {
            return Err(fail(vec![format!("{}: no source", origin.display())]));
        };

        let artifact = BundleArtifact {
            namespace: namespace.to_owned(),
            modules: walk.modules,
            entry: BundleModule {
                id: "entry".to_owned(),
                aliases: Vec::new(),
                origin: origin.to_path_buf(),
                source: entry_source,
            },
        };
        let bundle_path = self.artifact_path(origin);
        atomic_write(&bundle_path, artifact.render().as_bytes()).map_err(|error| {
            fail(vec![format!(
                "failed to write bundle '{}': {error}",
                bundle_path.display()
            )])
        })?;

        debug!(
            target: PIPELINE_TARGET,
            bundle = %bundle_path.display(),
            modules = artifact.modules.len(),
            "bundled configuration"
        );
        Ok(CompiledConfig {
            bundle_path,
            namespace: namespace.to_owned(),
        })
    }
}

struct ImportWalk {
    modules: Vec<BundleModule>,
    ids: HashMap<PathBuf, String>,
    aliases: BTreeMap<String, String>,
    stack: Vec<PathBuf>,
    diagnostics: Vec<String>,
    syntax: rhai::Engine,
}

impl ImportWalk {
    fn new() -> Self {
        Self {
            modules: Vec::new(),
            ids: HashMap::new(),
            aliases: BTreeMap::new(),
            stack: Vec::new(),
            diagnostics: Vec::new(),
            syntax: rhai::Engine::new_raw(),
        }
    }

    /// Reads, syntax-checks and rewrites one file.
    fn load(&mut self, path: &Path, label: &Path, base_dir: &Path) -> Option<String> {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(error) => {
                self.diagnostics
                    .push(format!("{}: cannot read: {error}", label.display()));
                return None;
            }
        };
        if let Err(error) = self.syntax.compile(&source) {
            self.diagnostics.push(format!("{}: {error}", label.display()));
        }
        Some(self.rewrite_imports(&source, label, base_dir))
    }

    fn rewrite_imports(&mut self, source: &str, importer: &Path, base_dir: &Path) -> String {
        let parts = segments(source);
        let mut out = String::with_capacity(source.len());
        for (index, segment) in parts.iter().enumerate() {
            let preceded_by_import = index
                .checked_sub(1)
                .and_then(|previous| parts.get(previous))
                .is_some_and(ends_with_import_keyword);
            if let Segment::Literal(literal) = segment
                && preceded_by_import
                && let Some(spec) = literal_body(literal)
            {
                let alias = parts.get(index + 1).and_then(alias_after);
                if let Some(id) = self.resolve(spec, importer, base_dir) {
                    if let Some(alias) = alias {
                        self.record_alias(alias, &id);
                    }
                    out.push('"');
                    out.push_str(&id);
                    out.push('"');
                    continue;
                }
            }
            out.push_str(segment.text());
        }
        out
    }

    fn resolve(&mut self, spec: &str, importer: &Path, base_dir: &Path) -> Option<String> {
        let mut candidate = if Path::new(spec).is_absolute() {
            PathBuf::from(spec)
        } else {
            base_dir.join(spec)
        };
        if candidate.extension().is_none() {
            candidate.set_extension(SCRIPT_EXTENSION);
        }
        let canonical = match fs::canonicalize(&candidate) {
            Ok(path) => path,
            Err(error) => {
                self.diagnostics.push(format!(
                    "{}: cannot resolve import \"{spec}\" ({}): {error}",
                    importer.display(),
                    candidate.display()
                ));
                return None;
            }
        };

        if let Some(start) = self.stack.iter().position(|open| *open == canonical) {
            let cycle = self
                .stack
                .iter()
                .skip(start)
                .chain(std::iter::once(&canonical))
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            self.diagnostics.push(format!("import cycle: {cycle}"));
            return None;
        }
        if let Some(id) = self.ids.get(&canonical) {
            return Some(id.clone());
        }

        self.stack.push(canonical.clone());
        let module_dir = canonical
            .parent()
            .map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
        let source = self.load(&canonical, &canonical, &module_dir);
        self.stack.pop();

        let id = format!("module:{}", self.modules.len() + 1);
        self.ids.insert(canonical.clone(), id.clone());
        self.modules.push(BundleModule {
            id: id.clone(),
            aliases: Vec::new(),
            origin: canonical,
            source: source.unwrap_or_default(),
        });
        Some(id)
    }

    fn record_alias(&mut self, alias: &str, id: &str) {
        match self.aliases.get(alias) {
            Some(existing) if existing != id => {
                self.diagnostics.push(format!(
                    "alias `{alias}` refers to both {} and {}",
                    self.origin_of(existing),
                    self.origin_of(id)
                ));
                return;
            }
            Some(_) => return,
            None => {}
        }
        self.aliases.insert(alias.to_owned(), id.to_owned());
        if let Some(module) = self.modules.iter_mut().find(|module| module.id == id) {
            module.aliases.push(alias.to_owned());
        }
    }

    fn origin_of(&self, id: &str) -> ModuleLabel<'_> {
        ModuleLabel(
            self.modules
                .iter()
                .find(|module| module.id == id)
                .map(|module| module.origin.as_path()),
        )
    }
}

struct ModuleLabel<'a>(Option<&'a Path>);

impl fmt::Display for ModuleLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(path) => write!(f, "{}", path.display()),
            None => f.write_str("<unknown>"),
        }
    }
}

fn ends_with_import_keyword(segment: &Segment<'_>) -> bool {
    let Segment::Code(code) = segment else {
        return false;
    };
    let trimmed = code.trim_end();
    trimmed.strip_suffix("import").is_some_and(|before| {
        before
            .chars()
            .last()
            .is_none_or(|ch| !is_ident_char(ch) && ch != '.')
    })
}

fn literal_body(literal: &str) -> Option<&str> {
    ['"', '`'].into_iter().find_map(|quote| {
        literal
            .strip_prefix(quote)
            .and_then(|inner| inner.strip_suffix(quote))
    })
}

fn alias_after<'a>(segment: &Segment<'a>) -> Option<&'a str> {
    let Segment::Code(code) = segment else {
        return None;
    };
    let rest = code.trim_start().strip_prefix("as")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    if !rest.starts_with(is_ident_start) {
        return None;
    }
    let end = rest.find(|ch: char| !is_ident_char(ch)).unwrap_or(rest.len());
    rest.get(..end)
}
