use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::warn;

use super::PIPELINE_TARGET;

/// Writes the provided bytes to the path using an atomic persist step.
///
/// Data is flushed and fsync'd before the temporary file is renamed into
/// place so concurrent readers never observe a partially written artefact.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;
    fs::create_dir_all(directory)?;

    let mut builder = Builder::new();
    builder.prefix(".switchyard-");
    builder.suffix(".tmp");

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Hex prefix of the SHA-256 digest over the concatenated parts.
pub(crate) fn short_hash(parts: &[&str], len: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest.chars().take(len).collect()
}

/// Deletes all but the `keep` most recently modified artefacts in `dir`.
///
/// Only files whose names start with `prefix` are considered and `protect`
/// is never removed. Returns the number of deleted files.
pub(crate) fn prune_artifacts(
    dir: &Path,
    prefix: &str,
    keep: usize,
    protect: &Path,
) -> io::Result<usize> {
    let mut artefacts: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some((metadata.modified().ok()?, entry.path()))
        })
        .collect();
    artefacts.sort_by(|left, right| right.0.cmp(&left.0));

    let mut removed = 0;
    for (_, path) in artefacts.into_iter().skip(keep) {
        if path == protect {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: PIPELINE_TARGET,
                path = %path.display(),
                error = %error,
                "failed to remove stale artefact"
            ),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn age(path: &Path, seconds_ago: u64) {
        let when = SystemTime::now() - Duration::from_secs(seconds_ago);
        File::options()
            .write(true)
            .open(path)
            .and_then(|file| file.set_modified(when))
            .expect("set mtime");
    }

    #[rstest]
    fn hashes_are_stable_prefixes() {
        let first = short_hash(&["source", "|version:", "1.0.0"], 12);
        let second = short_hash(&["source|version:1.0.0"], 12);
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
        assert_ne!(first, short_hash(&["source|version:1.0.1"], 12));
    }

    #[rstest]
    fn atomic_write_replaces_existing_content() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("nested").join("artefact.rhai");
        atomic_write(&target, b"first").expect("first write");
        atomic_write(&target, b"second").expect("second write");
        assert_eq!(fs::read_to_string(&target).expect("read back"), "second");
        let leftovers = fs::read_dir(target.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(leftovers, 1, "temporary files must not linger");
    }

    #[rstest]
    fn prune_keeps_newest_and_protected() {
        let dir = TempDir::new().expect("temp dir");
        let mut paths = Vec::new();
        for index in 0..7_u64 {
            let path = dir.path().join(format!("transformed_{index}.rhai"));
            fs::write(&path, b"x").expect("write artefact");
            age(&path, 100 - index);
            paths.push(path);
        }
        let unrelated = dir.path().join("notes.txt");
        fs::write(&unrelated, b"keep me").expect("write unrelated");
        age(&unrelated, 1_000);

        let protected = paths.first().cloned().expect("oldest artefact");
        let removed =
            prune_artifacts(dir.path(), "transformed_", 5, &protected).expect("prune succeeds");

        assert_eq!(removed, 1);
        assert!(protected.exists(), "protected artefact survives");
        assert!(!paths.get(1).expect("second oldest").exists());
        assert!(unrelated.exists(), "unrelated files are ignored");
    }
}
