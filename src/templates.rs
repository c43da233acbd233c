pub const GUIDE_SYSTEM_MD: &str = include_str!("../prompts/guide_system.md");
pub const GUIDE_PROMPT_MD: &str = include_str!("../prompts/guide.md");
pub const STEP_SYSTEM_MD: &str = include_str!("../prompts/step_system.md");
pub const STEP_PROMPT_MD: &str = include_str!("../prompts/step.md");
pub const STEP_RETRY_PROMPT_MD: &str = include_str!("../prompts/step_retry.md");
pub const PLAYWRIGHT_CONFIG_JS: &str = include_str!("../templates/playwright.config.js");
pub const PACKAGE_JSON: &str = include_str!("../templates/package.json");
pub const PROBE_SPEC_JS: &str = include_str!("../templates/probe.spec.js");
pub const ARTIFACT_SPEC_JS: &str = include_str!("../templates/artifact.spec.js");
