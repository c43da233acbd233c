//! Scenario store: loads `.glyph` files, hashes their content, and lists the
//! references each one mentions.

use crate::paths::{scenario_name, SCENARIO_EXTENSION};
use crate::util::sha256_hex;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

/// `[ref: name]`; the name is trimmed.
const REFERENCE_PATTERN: &str = r"\[ref:\s*([^\]]+?)\s*\]";

/// A piece of scenario text: literal prose or a reference to another scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reference(String),
}

/// A natural-language scenario, immutable for the duration of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub path: PathBuf,
    pub text: String,
    pub hash: String,
    /// Distinct reference names in first-mention order.
    pub references: Vec<String>,
    pub segments: Vec<Segment>,
}

impl Scenario {
    /// Build a scenario from in-memory text (used by the store and tests).
    pub fn from_text(name: &str, path: PathBuf, text: String) -> Result<Self> {
        let hash = sha256_hex(text.as_bytes());
        let segments = parse_segments(&text)?;
        let mut references: Vec<String> = Vec::new();
        for segment in &segments {
            if let Segment::Reference(name) = segment {
                if !references.contains(name) {
                    references.push(name.clone());
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            path,
            text,
            hash,
            references,
            segments,
        })
    }

    /// Read and hash a single scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let name = scenario_name(path)
            .ok_or_else(|| anyhow!("scenario path has no file stem: {}", path.display()))?;
        let bytes = fs::read(path).with_context(|| format!("read scenario {}", path.display()))?;
        let text = String::from_utf8(bytes)
            .with_context(|| format!("scenario {} is not valid UTF-8", path.display()))?;
        Self::from_text(&name, path.to_path_buf(), text)
    }
}

/// Split `text` at each `[ref: name]`. Empty names stay literal text.
pub fn parse_segments(text: &str) -> Result<Vec<Segment>> {
    let pattern = Regex::new(REFERENCE_PATTERN).context("compile reference pattern")?;
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str().trim();
        literal.push_str(&text[last..whole.start()]);
        last = whole.end();
        if name.is_empty() {
            literal.push_str(whole.as_str());
            continue;
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Reference(name.to_string()));
    }
    literal.push_str(&text[last..]);
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(segments)
}

/// All scenarios of a project, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ScenarioStore {
    scenarios: BTreeMap<String, Scenario>,
    /// Files that matched but could not be loaded, with the reason.
    unreadable: Vec<(PathBuf, String)>,
}

impl ScenarioStore {
    /// Load every `*.glyph` file in `dir` (non-recursive).
    ///
    /// A file that cannot be read or decoded is recorded in
    /// [`ScenarioStore::unreadable`] and the rest still load.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(anyhow!("scenarios directory not found: {}", dir.display()));
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(SCENARIO_EXTENSION)
            })
            .collect();
        paths.sort();
        let mut store = Self::default();
        for path in paths {
            match Scenario::load(&path) {
                Ok(scenario) => store.insert(scenario),
                Err(err) => {
                    let reason = format!("{err:#}");
                    tracing::warn!(path = %path.display(), error = %reason, "skipping scenario");
                    store.unreadable.push((path, reason));
                }
            }
        }
        Ok(store)
    }

    pub fn unreadable(&self) -> &[(PathBuf, String)] {
        &self.unreadable
    }

    pub fn insert(&mut self, scenario: Scenario) {
        self.scenarios.insert(scenario.name.clone(), scenario);
    }

    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    /// Find a scenario by name or by a path pointing at its file.
    pub fn find(&self, selector: &Path) -> Option<&Scenario> {
        if let Some(found) = self
            .scenarios
            .values()
            .find(|scenario| scenario.path == selector)
        {
            return Some(found);
        }
        let canonical = fs::canonicalize(selector).ok();
        if let Some(canonical) = canonical.as_ref() {
            if let Some(found) = self
                .scenarios
                .values()
                .find(|scenario| fs::canonicalize(&scenario.path).ok().as_ref() == Some(canonical))
            {
                return Some(found);
            }
        }
        scenario_name(selector).and_then(|name| self.scenarios.get(&name))
    }

    /// Scenarios `scenario` references directly or through other references,
    /// nearest first. Unknown names and the scenario itself are left out.
    pub fn dependencies(&self, scenario: &Scenario) -> Vec<&Scenario> {
        let mut found: Vec<&Scenario> = Vec::new();
        let mut pending: VecDeque<&str> =
            scenario.references.iter().map(String::as_str).collect();
        while let Some(name) = pending.pop_front() {
            if name == scenario.name || found.iter().any(|known| known.name == name) {
                continue;
            }
            if let Some(referenced) = self.scenarios.get(name) {
                pending.extend(referenced.references.iter().map(String::as_str));
                found.push(referenced);
            }
        }
        found
    }

    /// Scenarios in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.values()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_references_in_order_without_duplicates() {
        let text = "[ref: login]\nopen settings\n[ref:  profile ]\n[ref: login]";
        let scenario =
            Scenario::from_text("s", PathBuf::from("s.glyph"), text.to_string()).expect("scenario");
        assert_eq!(scenario.references, vec!["login", "profile"]);
    }

    #[test]
    fn segments_split_prose_around_references() {
        let segments = parse_segments("first [ref: login]\nthen [ref:  ] pay").expect("segments");
        assert_eq!(
            segments,
            vec![
                Segment::Text("first ".to_string()),
                Segment::Reference("login".to_string()),
                Segment::Text("\nthen [ref:  ] pay".to_string()),
            ]
        );
        assert!(parse_segments("").expect("empty").is_empty());
    }

    #[test]
    fn hash_tracks_content_not_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("login.glyph");
        fs::write(&path, "go to the login page\n").expect("write");
        let original = Scenario::load(&path).expect("load").hash;

        fs::write(&path, "go to the signup page\n").expect("edit");
        let edited = Scenario::load(&path).expect("load").hash;
        assert_ne!(original, edited);

        fs::write(&path, "go to the login page\n").expect("revert");
        let reverted = Scenario::load(&path).expect("load").hash;
        assert_eq!(original, reverted);
    }

    #[test]
    fn store_loads_only_glyph_files_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.glyph"), "second").expect("write");
        fs::write(dir.path().join("a.glyph"), "first [ref: b]").expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let store = ScenarioStore::load_dir(dir.path()).expect("load dir");
        let names: Vec<_> = store.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.get("a").expect("a").references, vec!["b"]);
        assert_eq!(
            store
                .find(&dir.path().join("b.glyph"))
                .map(|s| s.name.as_str()),
            Some("b")
        );
        assert_eq!(
            store.find(Path::new("a.glyph")).map(|s| s.name.as_str()),
            Some("a")
        );
    }

    #[test]
    fn undecodable_file_is_reported_and_siblings_still_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("good.glyph"), "open the home page").expect("write");
        fs::write(dir.path().join("bad.glyph"), [0x66, 0x6f, 0xff, 0xfe]).expect("write");

        let store = ScenarioStore::load_dir(dir.path()).expect("load dir");
        let names: Vec<_> = store.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
        let [(path, reason)] = store.unreadable() else {
            panic!("expected one unreadable file: {:?}", store.unreadable());
        };
        assert_eq!(path, &dir.path().join("bad.glyph"));
        assert!(reason.contains("not valid UTF-8"));
    }

    #[test]
    fn dependencies_follow_references_transitively() {
        let mut store = ScenarioStore::default();
        for (name, text) in [
            ("login", "sign in"),
            ("cart", "[ref: login] add an item"),
            ("checkout", "[ref: cart] [ref: login] pay [ref: missing]"),
            ("loop", "[ref: loop] again"),
        ] {
            store.insert(
                Scenario::from_text(name, PathBuf::from(format!("{name}.glyph")), text.to_string())
                    .expect("scenario"),
            );
        }
        let names = |name: &str| -> Vec<String> {
            let scenario = store.get(name).expect("scenario");
            store
                .dependencies(scenario)
                .iter()
                .map(|dependency| dependency.name.clone())
                .collect()
        };
        assert_eq!(names("checkout"), vec!["cart", "login"]);
        assert_eq!(names("cart"), vec!["login"]);
        assert!(names("login").is_empty());
        assert!(names("loop").is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(ScenarioStore::load_dir(&dir.path().join("nope")).is_err());
    }
}
