//! Legacy syntax downgrade with content-addressed memoisation.
//!
//! Older routing scripts were written in a JavaScript flavoured dialect. The
//! rewrite below maps the handful of constructs that differ onto Rhai so the
//! bundler only ever sees one language. Rewrites never touch literals or
//! comments.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use super::PIPELINE_TARGET;
use super::files::{atomic_write, prune_artifacts, short_hash};
use super::lexer::{Segment, is_ident_char, is_ident_start, segments};

/// Number of transformed artefacts retained in the cache subdirectory.
pub const TRANSFORM_RETENTION: usize = 5;

const ARTIFACT_PREFIX: &str = "transformed_";
const KEY_LEN: usize = 12;

const OPERATOR_REWRITES: &[(&str, &str)] = &[("===", "=="), ("!==", "!=")];
const WORD_REWRITES: &[(&str, &str)] = &[
    ("var", "let"),
    ("function", "fn"),
    ("null", "()"),
    ("undefined", "()"),
];

/// Errors raised while transforming a legacy script.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Persisting the transformed artefact failed.
    #[error("failed to write transformed script '{path}': {source}")]
    Write {
        /// Artefact path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Outcome of a transformation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    /// Content-addressed cache key.
    pub key: String,
    /// Path of the transformed artefact.
    pub path: PathBuf,
    /// `true` when an existing artefact was reused.
    pub reused: bool,
}

/// Writes transformed sources into the `transform/` cache subdirectory.
#[derive(Debug, Clone)]
pub struct Transformer {
    dir: PathBuf,
    version: String,
}

impl Transformer {
    /// Creates a transformer storing artefacts beneath `dir`.
    pub fn new(dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            version: version.into(),
        }
    }

    /// Cache key for `source` under the running version.
    pub fn cache_key(&self, source: &str) -> String {
        short_hash(&[source, "|version:", &self.version], KEY_LEN)
    }

    /// Artefact path for a cache key.
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{ARTIFACT_PREFIX}{key}.rhai"))
    }

    /// Transforms `source`, reusing an existing artefact for identical input.
    pub fn apply(&self, source: &str) -> Result<Transformed, TransformError> {
        let key = self.cache_key(source);
        let path = self.artifact_path(&key);
        if path.is_file() {
            debug!(target: PIPELINE_TARGET, key = %key, "reusing transformed script");
            return Ok(Transformed {
                key,
                path,
                reused: true,
            });
        }

        let rewritten = transform(source);
        atomic_write(&path, rewritten.as_bytes()).map_err(|source| TransformError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(target: PIPELINE_TARGET, key = %key, path = %path.display(), "transformed legacy script");

        if let Err(error) = prune_artifacts(&self.dir, ARTIFACT_PREFIX, TRANSFORM_RETENTION, &path)
        {
            warn!(target: PIPELINE_TARGET, error = %error, "transform retention sweep failed");
        }
        Ok(Transformed {
            key,
            path,
            reused: false,
        })
    }
}

/// Returns `true` when `source` contains legacy constructs.
pub fn needs_transform(source: &str) -> bool {
    segments(source).iter().any(|segment| match segment {
        Segment::Code(code) => scan_code(code, &mut NoSink),
        Segment::Literal(_) | Segment::Comment(_) => false,
    })
}

/// Rewrites legacy constructs into Rhai, leaving everything else intact.
pub fn transform(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for segment in segments(source) {
        match segment {
            Segment::Code(code) => {
                scan_code(code, &mut out);
            }
            Segment::Literal(text) | Segment::Comment(text) => out.push_str(text),
        }
    }
    out
}

trait Sink {
    fn push_str(&mut self, text: &str);
    fn push(&mut self, ch: char);
}

impl Sink for String {
    fn push_str(&mut self, text: &str) {
        Self::push_str(self, text);
    }

    fn push(&mut self, ch: char) {
        Self::push(self, ch);
    }
}

struct NoSink;

impl Sink for NoSink {
    fn push_str(&mut self, _text: &str) {}

    fn push(&mut self, _ch: char) {}
}

/// Copies `code` into `out` with rewrites applied; reports whether any fired.
fn scan_code(code: &str, out: &mut impl Sink) -> bool {
    let mut rewrote = false;
    let mut index = 0;
    let mut previous: Option<char> = None;

    while let Some(rest) = code.get(index..) {
        let Some(ch) = rest.chars().next() else {
            break;
        };
        let word_start =
            is_ident_start(ch) && previous.is_none_or(|prev| !is_ident_char(prev) && prev != '.');

        if let Some((consumed, replacement)) = legacy_at(rest, word_start) {
            out.push_str(replacement);
            rewrote = true;
            previous = rest.get(..consumed).and_then(|text| text.chars().last());
            index += consumed;
            continue;
        }

        out.push(ch);
        previous = Some(ch);
        index += ch.len_utf8();
    }
    rewrote
}

/// Matches a legacy construct at the start of `rest`.
///
/// Returns the number of bytes consumed and the replacement text.
fn legacy_at(rest: &str, word_start: bool) -> Option<(usize, &'static str)> {
    if let Some((from, to)) = OPERATOR_REWRITES
        .iter()
        .find(|(from, _)| rest.starts_with(from))
    {
        return Some((from.len(), *to));
    }
    if !word_start {
        return None;
    }

    if let Some(after) = rest.strip_prefix("module.exports") {
        let value = after.trim_start().strip_prefix('=')?;
        if value.starts_with('=') {
            return None;
        }
        return Some((rest.len() - value.trim_start().len(), ""));
    }
    if let Some(after) = rest.strip_prefix("export default")
        && after.starts_with(char::is_whitespace)
    {
        return Some((rest.len() - after.trim_start().len(), ""));
    }
    if let Some(after) = rest.strip_prefix("console.log")
        && !after.starts_with(is_ident_char)
    {
        return Some(("console.log".len(), "print"));
    }

    let word_len = rest.find(|ch: char| !is_ident_char(ch)).unwrap_or(rest.len());
    let word = rest.get(..word_len)?;
    WORD_REWRITES
        .iter()
        .find(|(from, _)| *from == word)
        .map(|(_, to)| (word_len, *to))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case("module.exports = #{ a: 1 };", "#{ a: 1 };")]
    #[case("export default #{};", "#{};")]
    #[case("if a === b && c !== d {}", "if a == b && c != d {}")]
    #[case("var x = null;", "let x = ();")]
    #[case("function pick(u) { undefined }", "fn pick(u) { () }")]
    #[case("console.log(\"hi\");", "print(\"hi\");")]
    fn rewrites_legacy_constructs(#[case] input: &str, #[case] expected: &str) {
        assert!(needs_transform(input));
        assert_eq!(transform(input), expected);
    }

    #[rstest]
    #[case("let variable = nullable + functional;")]
    #[case("let s = \"var x = null; a === b\";")]
    #[case("// module.exports = 1\nlet x = 1;")]
    #[case("let same = a == b; obj.var = 1;")]
    #[case("module.exports == other")]
    fn leaves_modern_code_alone(#[case] input: &str) {
        assert!(!needs_transform(input), "unexpected rewrite for {input:?}");
        assert_eq!(transform(input), input);
    }

    #[rstest]
    fn identical_content_reuses_the_artifact() {
        let dir = TempDir::new().expect("temp dir");
        let source = "module.exports = #{ default_browser: \"Firefox\" };";

        let first = Transformer::new(dir.path(), "1.2.3")
            .apply(source)
            .expect("first transform");
        let written = fs::metadata(&first.path)
            .and_then(|meta| meta.modified())
            .expect("mtime");

        // A fresh instance stands in for a restarted process.
        let second = Transformer::new(dir.path(), "1.2.3")
            .apply(source)
            .expect("second transform");

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.key, second.key);
        assert_eq!(first.path, second.path);
        assert_eq!(
            fs::metadata(&second.path)
                .and_then(|meta| meta.modified())
                .expect("mtime"),
            written
        );
        assert_eq!(
            fs::read_to_string(&second.path).expect("read artefact"),
            "#{ default_browser: \"Firefox\" };"
        );
    }

    #[rstest]
    fn version_participates_in_the_key() {
        let dir = TempDir::new().expect("temp dir");
        let old = Transformer::new(dir.path(), "1.0.0").cache_key("var a = 1;");
        let new = Transformer::new(dir.path(), "2.0.0").cache_key("var a = 1;");
        assert_ne!(old, new);
        assert_eq!(old.len(), 12);
    }

    #[rstest]
    fn retention_caps_the_transform_directory() {
        let dir = TempDir::new().expect("temp dir");
        let transformer = Transformer::new(dir.path(), "1.0.0");
        let mut last = None;
        for index in 0..8 {
            let outcome = transformer
                .apply(&format!("var value = {index};"))
                .expect("transform");
            last = Some(outcome.path);
        }

        let remaining = fs::read_dir(dir.path()).expect("list").count();
        assert!(remaining <= TRANSFORM_RETENTION, "found {remaining} artefacts");
        assert!(last.expect("last artefact").exists());
    }
}
