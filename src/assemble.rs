//! Final artifact assembly.
//!
//! Accepted fragments are cleaned of diagnostic scaffolding and wrapped in the
//! single test shape the tool emits. Assembly is pure text work and never
//! consults the oracle.
use crate::paths::ProjectPaths;
use crate::sandbox::indent;
use crate::step::check_structure;
use crate::templates::ARTIFACT_SPEC_JS;
use crate::util::{now_epoch_ms, sha256_hex, write_atomic, write_json_atomic};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const BODY_INDENT: &str = "  ";

/// Statement prefixes that only exist for diagnosis during generation.
const DIAGNOSTIC_PREFIXES: &[&str] = &[
    "console.",
    "await page.screenshot(",
    "page.screenshot(",
    "await page.pause(",
    "page.pause(",
    "debugger",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub scenario: String,
    pub scenario_hash: String,
    pub artifact_sha256: String,
    pub steps: usize,
    pub generated_at_epoch_ms: u128,
}

/// Produce the artifact source for `scenario` from its accepted fragments.
pub fn assemble(scenario: &str, fragments: &[String]) -> Result<String> {
    let body = fragments
        .iter()
        .map(|fragment| strip_scaffolding(fragment))
        .filter(|fragment| !fragment.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !body.trim().is_empty() {
        check_structure(&body)
            .map_err(|failure| anyhow!("assembled test for {scenario} is malformed: {failure}"))?;
    }
    Ok(ARTIFACT_SPEC_JS
        .replace("{title}", &escape_single_quoted(scenario))
        .replace("{body}", &indent(&body, BODY_INDENT)))
}

/// Drop comments, debug output and page captures from one fragment.
///
/// A dropped statement that may be the body of a brace-less `if`, `else` or
/// loop header is replaced by an empty statement so the next line does not
/// become that body.
pub fn strip_scaffolding(fragment: &str) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut in_block_comment = false;
    let mut skipping_depth: Option<i32> = None;

    for line in fragment.lines() {
        let trimmed = line.trim();
        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if let Some(depth) = skipping_depth {
            let depth = depth + paren_delta(trimmed);
            skipping_depth = (depth > 0).then_some(depth);
            continue;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        if trimmed.starts_with("/*") {
            in_block_comment = !trimmed.contains("*/");
            continue;
        }
        if DIAGNOSTIC_PREFIXES
            .iter()
            .any(|prefix| trimmed.starts_with(prefix))
        {
            let depth = paren_delta(trimmed);
            skipping_depth = (depth > 0).then_some(depth);
            if kept.last().is_some_and(|previous| may_await_body(previous)) {
                let indent = &line[..line.len() - line.trim_start().len()];
                kept.push(format!("{indent};"));
            }
            continue;
        }
        kept.push(line.trim_end().to_string());
    }
    kept.join("\n")
}

/// False when the line certainly ends a statement or opens a block.
fn may_await_body(line: &str) -> bool {
    let closes = |text: &str| text.ends_with(';') || text.ends_with('{') || text.ends_with('}');
    let trimmed = line.trim_end();
    if trimmed.is_empty() || closes(trimmed) {
        return false;
    }
    // `stmt; // note`
    !trimmed
        .rfind("//")
        .is_some_and(|at| closes(trimmed[..at].trim_end()))
}

fn paren_delta(line: &str) -> i32 {
    line.chars().fold(0, |depth, ch| match ch {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}

fn escape_single_quoted(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Write the artifact and its manifest. Returns the artifact path.
pub fn write_artifact(
    paths: &ProjectPaths,
    scenario: &str,
    scenario_hash: &str,
    source: &str,
    steps: usize,
) -> Result<PathBuf> {
    let artifact_path = paths.artifact_path(scenario);
    write_atomic(&artifact_path, source.as_bytes())?;
    let manifest = ArtifactManifest {
        scenario: scenario.to_string(),
        scenario_hash: scenario_hash.to_string(),
        artifact_sha256: sha256_hex(source.as_bytes()),
        steps,
        generated_at_epoch_ms: now_epoch_ms()?,
    };
    write_json_atomic(&paths.artifact_manifest_path(scenario), &manifest)?;
    Ok(artifact_path)
}

/// True when the artifact exists, is unmodified, and was built from `scenario_hash`.
pub fn artifact_is_current(
    paths: &ProjectPaths,
    scenario: &str,
    scenario_hash: &str,
) -> Result<bool> {
    let manifest_path = paths.artifact_manifest_path(scenario);
    let artifact_path = paths.artifact_path(scenario);
    if !manifest_path.is_file() || !artifact_path.is_file() {
        return Ok(false);
    }
    let bytes = fs::read(&manifest_path)
        .with_context(|| format!("read {}", manifest_path.display()))?;
    let Ok(manifest) = serde_json::from_slice::<ArtifactManifest>(&bytes) else {
        tracing::warn!(path = %manifest_path.display(), "unreadable artifact manifest");
        return Ok(false);
    };
    if manifest.scenario_hash != scenario_hash {
        return Ok(false);
    }
    let artifact = fs::read(&artifact_path)
        .with_context(|| format!("read {}", artifact_path.display()))?;
    Ok(sha256_hex(&artifact) == manifest.artifact_sha256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_diagnostics() {
        let fragment = "// navigate first\n\
            await page.goto('/login');\n\
            console.log('state', await page.evaluate(() => {\n  return document.title;\n}));\n\
            /* debug\n   block */\n\
            await page.screenshot({ path: 'step.png' });\n\
            await page.fill('#username', 'admin'); // keep trailing notes\n\
            console.log('GLYPH_OBSERVATION ' + JSON.stringify({}));";
        assert_eq!(
            strip_scaffolding(fragment),
            "await page.goto('/login');\nawait page.fill('#username', 'admin'); // keep trailing notes"
        );
    }

    #[test]
    fn dropped_body_of_braceless_header_leaves_an_empty_statement() {
        let fragment = "if (await banner.isVisible())\n\
            \x20 console.log('banner shown');\n\
            await page.click('#next');\n\
            for (const row of rows)\n\
            \x20 await page.screenshot({\n\
            \x20   path: 'row.png',\n\
            \x20 });\n\
            else\n\
            \x20 debugger;";
        assert_eq!(
            strip_scaffolding(fragment),
            "if (await banner.isVisible())\n  ;\nawait page.click('#next');\nfor (const row of rows)\n  ;\nelse\n  ;"
        );
    }

    #[test]
    fn assembles_the_single_test_shape() {
        let source = assemble(
            "login",
            &[
                "await page.goto('/login');".to_string(),
                "await page.fill('#username', 'admin');\nawait page.click('text=Sign in');"
                    .to_string(),
                String::new(),
                "await expect(page).toHaveURL(/dashboard/);".to_string(),
            ],
        )
        .expect("assemble");
        assert_eq!(
            source,
            "const { test, expect } = require('@playwright/test');\n\
             \n\
             test('login', async ({ page }) => {\n\
             \x20 await page.goto('/login');\n\
             \x20 await page.fill('#username', 'admin');\n\
             \x20 await page.click('text=Sign in');\n\
             \x20 await expect(page).toHaveURL(/dashboard/);\n\
             });\n"
        );
    }

    #[test]
    fn titles_are_escaped() {
        let source = assemble("o'brien", &["await page.goto('/');".to_string()]).expect("assemble");
        assert!(source.contains("test('o\\'brien', async"));
    }

    #[test]
    fn malformed_assembly_is_rejected() {
        assert!(assemble("x", &["await page.click('#a'".to_string()]).is_err());
    }

    #[test]
    fn artifact_staleness_follows_hash_and_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(dir.path().to_path_buf());
        assert!(!artifact_is_current(&paths, "login", "h1").expect("absent"));

        let source = assemble("login", &["await page.goto('/');".to_string()]).expect("assemble");
        let path = write_artifact(&paths, "login", "h1", &source, 1).expect("write");
        assert!(artifact_is_current(&paths, "login", "h1").expect("current"));
        assert!(!artifact_is_current(&paths, "login", "h2").expect("other hash"));

        fs::write(&path, "tampered").expect("tamper");
        assert!(!artifact_is_current(&paths, "login", "h1").expect("tampered"));

        write_artifact(&paths, "login", "h1", &source, 1).expect("rewrite");
        assert!(artifact_is_current(&paths, "login", "h1").expect("restored"));
        fs::remove_file(paths.artifact_manifest_path("login")).expect("rm manifest");
        assert!(!artifact_is_current(&paths, "login", "h1").expect("no manifest"));
    }
}
