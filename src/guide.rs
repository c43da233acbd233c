//! Guide generation and the guide cache.
//!
//! A guide is the ordered list of condensed step descriptions for one
//! scenario. It is produced by a single oracle call over the scenario's
//! reference-inlined text and cached under `.glyph/guides/`, keyed by the
//! scenario's own content hash.
use crate::error::BuildError;
use crate::oracle::{extract_json, Oracle, OracleRequest, PromptKind};
use crate::paths::ProjectPaths;
use crate::reference;
use crate::scenario::{Scenario, ScenarioStore};
use crate::templates::{GUIDE_PROMPT_MD, GUIDE_SYSTEM_MD};
use crate::util::{now_epoch_ms, write_json_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

pub const GUIDE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guide {
    pub schema_version: u32,
    pub scenario: String,
    pub scenario_hash: String,
    pub steps: Vec<String>,
    /// References that were inlined before generation.
    #[serde(default)]
    pub references: Vec<String>,
    pub built_at_epoch_ms: u128,
}

impl Guide {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Turns resolved scenario text into step descriptions.
pub struct GuideGenerator<'a> {
    oracle: &'a dyn Oracle,
    base_url: &'a str,
}

impl<'a> GuideGenerator<'a> {
    pub fn new(oracle: &'a dyn Oracle, base_url: &'a str) -> Self {
        Self { oracle, base_url }
    }

    /// Ask the oracle for a guide and validate it. Nothing is persisted here.
    pub fn generate(&self, scenario: &str, resolved_text: &str) -> Result<Vec<String>> {
        let request = OracleRequest {
            kind: PromptKind::Guide,
            scenario: scenario.to_string(),
            system: GUIDE_SYSTEM_MD.to_string(),
            user: GUIDE_PROMPT_MD
                .replace("{base_url}", self.base_url)
                .replace("{scenario}", resolved_text.trim()),
        };
        let reply = self
            .oracle
            .complete(&request)
            .with_context(|| format!("generate guide for {scenario}"))?;
        let steps = parse_guide(&reply).map_err(|detail| BuildError::MalformedGuide {
            scenario: scenario.to_string(),
            detail,
        })?;
        tracing::debug!(scenario, steps = steps.len(), "guide generated");
        Ok(steps)
    }
}

/// Parse a guide reply: a JSON array of strings, or a bullet/numbered list.
pub fn parse_guide(reply: &str) -> Result<Vec<String>, String> {
    let json = extract_json(reply);
    let steps = match serde_json::from_str::<Vec<String>>(json) {
        Ok(steps) => steps,
        Err(json_err) => {
            let listed = parse_list(reply);
            if listed.is_empty() {
                return Err(format!("expected a JSON array of strings: {json_err}"));
            }
            listed
        }
    };
    if steps.is_empty() {
        return Err("guide has no steps".to_string());
    }
    if let Some(index) = steps.iter().position(|step| step.trim().is_empty()) {
        return Err(format!("step {} is empty", index + 1));
    }
    Ok(steps.into_iter().map(|step| step.trim().to_string()).collect())
}

fn parse_list(reply: &str) -> Vec<String> {
    reply
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                return Some(rest.trim().to_string());
            }
            let digits = line.chars().take_while(|ch| ch.is_ascii_digit()).count();
            if digits == 0 {
                return None;
            }
            let rest = &line[digits..];
            rest.strip_prefix(". ")
                .or_else(|| rest.strip_prefix(") "))
                .map(|rest| rest.trim().to_string())
        })
        .collect()
}

/// Load a cached guide. Unreadable records are treated as absent.
pub fn load_guide(paths: &ProjectPaths, scenario: &str) -> Result<Option<Guide>> {
    let path = paths.guide_path(scenario);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    match serde_json::from_slice::<Guide>(&bytes) {
        Ok(guide) if guide.schema_version == GUIDE_SCHEMA_VERSION && !guide.is_empty() => {
            Ok(Some(guide))
        }
        Ok(_) => {
            tracing::warn!(path = %path.display(), "guide record is inconsistent; regenerating");
            Ok(None)
        }
        Err(err) => {
            let err = BuildError::CacheCorruption {
                path: path.clone(),
                detail: err.to_string(),
            };
            tracing::warn!(error = %err, "ignoring guide record");
            Ok(None)
        }
    }
}

pub fn save_guide(paths: &ProjectPaths, guide: &Guide) -> Result<()> {
    write_json_atomic(&paths.guide_path(&guide.scenario), guide)
}

/// Return the cached guide for `scenario` or generate and persist a new one.
///
/// References are resolved first so unknown names fail before any oracle call.
/// The boolean is true when the oracle was consulted.
pub fn ensure_guide(
    paths: &ProjectPaths,
    generator: &GuideGenerator<'_>,
    scenario: &Scenario,
    store: &ScenarioStore,
    max_reference_depth: usize,
) -> Result<(Guide, bool)> {
    if let Some(guide) = load_guide(paths, &scenario.name)? {
        if guide.scenario_hash == scenario.hash {
            return Ok((guide, false));
        }
        tracing::info!(scenario = %scenario.name, "scenario changed; regenerating guide");
    }
    let resolved = reference::resolve(scenario, store, max_reference_depth)?;
    let steps = generator.generate(&scenario.name, &resolved)?;
    let guide = Guide {
        schema_version: GUIDE_SCHEMA_VERSION,
        scenario: scenario.name.clone(),
        scenario_hash: scenario.hash.clone(),
        steps,
        references: scenario.references.clone(),
        built_at_epoch_ms: now_epoch_ms()?,
    };
    save_guide(paths, &guide)?;
    Ok((guide, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl Oracle for Scripted {
        fn complete(&self, request: &OracleRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .expect("prompts")
                .push(request.user.clone());
            Ok(self.reply.clone())
        }
    }

    fn project() -> (tempfile::TempDir, ProjectPaths) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(dir.path().to_path_buf());
        (dir, paths)
    }

    fn scenario(name: &str, text: &str) -> Scenario {
        Scenario::from_text(name, PathBuf::from(format!("{name}.glyph")), text.to_string())
            .expect("scenario")
    }

    #[test]
    fn parses_json_and_list_replies() {
        assert_eq!(
            parse_guide("```json\n[\"Open login\", \"Submit credentials\"]\n```").expect("json"),
            vec!["Open login", "Submit credentials"]
        );
        assert_eq!(
            parse_guide("Steps:\n1. Open login\n2) Submit credentials\n- Check dashboard")
                .expect("list"),
            vec!["Open login", "Submit credentials", "Check dashboard"]
        );
    }

    #[test]
    fn rejects_empty_guides_and_blank_steps() {
        assert!(parse_guide("[]").is_err());
        assert!(parse_guide("[\"Open login\", \"  \"]").is_err());
        assert!(parse_guide("I cannot help with that.").is_err());
    }

    #[test]
    fn malformed_guide_is_typed_and_not_persisted() {
        let (_dir, paths) = project();
        let oracle = Scripted::new("[]");
        let generator = GuideGenerator::new(&oracle, "http://localhost:3000");
        let login = scenario("login", "go to the login page");
        let mut store = ScenarioStore::default();
        store.insert(login.clone());

        let err = ensure_guide(&paths, &generator, &login, &store, 8).expect_err("malformed");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MalformedGuide { .. })
        ));
        assert!(!paths.guide_path("login").exists());
    }

    #[test]
    fn guide_is_cached_by_hash_and_regenerated_on_change() {
        let (_dir, paths) = project();
        let oracle = Scripted::new("[\"Open the login page\", \"Log in\"]");
        let generator = GuideGenerator::new(&oracle, "http://localhost:3000");
        let original = scenario("login", "go to the login page\nuse admin/admin_password");
        let mut store = ScenarioStore::default();
        store.insert(original.clone());

        let (guide, generated) =
            ensure_guide(&paths, &generator, &original, &store, 8).expect("first");
        assert!(generated);
        assert_eq!(guide.len(), 2);
        let (_, generated) = ensure_guide(&paths, &generator, &original, &store, 8).expect("hit");
        assert!(!generated);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

        let edited = scenario("login", "go to the signup page");
        let (_, generated) = ensure_guide(&paths, &generator, &edited, &store, 8).expect("edit");
        assert!(generated);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_reference_fails_before_the_oracle_is_called() {
        let (_dir, paths) = project();
        let oracle = Scripted::new("[\"x\"]");
        let generator = GuideGenerator::new(&oracle, "http://localhost:3000");
        let settings = scenario("settings", "[ref: login]\nopen settings");
        let mut store = ScenarioStore::default();
        store.insert(settings.clone());

        let err = ensure_guide(&paths, &generator, &settings, &store, 8).expect_err("unknown");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::UnknownReference { .. })
        ));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn referenced_text_reaches_the_prompt() {
        let (_dir, paths) = project();
        let oracle = Scripted::new("[\"Log in\", \"Open settings\"]");
        let generator = GuideGenerator::new(&oracle, "http://localhost:3000");
        let login = scenario("login", "use admin/admin_password");
        let settings = scenario("settings", "[ref: login]\nopen settings");
        let mut store = ScenarioStore::default();
        store.insert(login);
        store.insert(settings.clone());

        let (guide, _) = ensure_guide(&paths, &generator, &settings, &store, 8).expect("guide");
        assert_eq!(guide.references, vec!["login"]);
        let prompts = oracle.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("use admin/admin_password\nopen settings"));
        assert!(!prompts[0].contains("[ref:"));
    }

    #[test]
    fn corrupt_guide_record_is_treated_as_absent() {
        let (_dir, paths) = project();
        let path = paths.guide_path("login");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "{not json").expect("write");
        assert!(load_guide(&paths, "login").expect("load").is_none());
    }
}
