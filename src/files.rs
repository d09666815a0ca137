//! Local file plumbing: glob listing, bundle concatenation, lookup by name,
//! and atomic JSON record persistence.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::Result;

pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write via a sibling tmp file then rename, so a crash mid-write never
/// leaves a truncated record behind.
pub(crate) fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(raw.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// fnmatch-style wildcard check: `*` matches any run of characters
/// (including separators), `?` matches a single character.
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some('?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    inner(&p, &n)
}

/// Files under `dir` whose path (relative, forward slashes) matches at least
/// one include glob and no exclude glob. Sorted for stable bundling.
pub(crate) fn list_files(
    dir: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let rel = e
                .path()
                .strip_prefix(dir)
                .unwrap_or(e.path())
                .to_string_lossy()
                .replace('\\', "/");
            include_globs.iter().any(|g| glob_match(g, &rel))
                && !exclude_globs.iter().any(|g| glob_match(g, &rel))
        })
        .map(|e| e.into_path())
        .collect();
    out.sort();
    out
}

/// Concatenate `files` into `dst`, each prefixed with a path separator line
/// so the model can attribute content back to its file.
pub(crate) fn bundle_to_file(files: &[PathBuf], dst: &Path) -> Result<()> {
    let mut out = fs::File::create(dst)?;
    for path in files {
        let content = fs::read_to_string(path)?;
        writeln!(out, "\n # ==== file path: {} ==== \n", path.display())?;
        out.write_all(content.as_bytes())?;
    }
    out.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("buranya-files-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.rs", "main.rs"));
        assert!(glob_match("*.rs", "src/main.rs"));
        assert!(!glob_match("*.rs", "main.py"));
        assert!(glob_match("src/*.toml", "src/agent.toml"));
        assert!(glob_match("?at", "cat"));
        assert!(!glob_match("?at", "flat"));
        assert!(glob_match("*", "anything/at/all"));
    }

    #[test]
    fn test_list_and_bundle() {
        let dir = temp_dir("bundle");
        fs::write(dir.join("a.rs"), "fn a() {}").unwrap();
        fs::write(dir.join("b.rs"), "fn b() {}").unwrap();
        fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let files = list_files(&dir, &["*.rs".into()], &["b.rs".into()]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.rs"));

        let all = list_files(&dir, &["*.rs".into()], &[]);
        let dst = dir.join("bundle.txt");
        bundle_to_file(&all, &dst).unwrap();
        let bundled = fs::read_to_string(&dst).unwrap();
        assert!(bundled.contains("==== file path:"));
        assert!(bundled.contains("fn a() {}"));
        assert!(bundled.contains("fn b() {}"));
        assert!(!bundled.contains("skip me"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_and_load_json_round_trip() {
        let dir = temp_dir("json");
        let path = dir.join("rec.json");
        save_json(&path, &serde_json::json!({"thread_id": "thread_abc"})).unwrap();
        let got: serde_json::Value = load_json(&path).unwrap();
        assert_eq!(got["thread_id"], "thread_abc");
        let _ = fs::remove_dir_all(&dir);
    }

}
