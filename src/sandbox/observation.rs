//! Page state captured at the end of every sandbox execution.
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Line prefix the probe harness prints before the JSON snapshot.
pub const OBSERVATION_MARKER: &str = "GLYPH_OBSERVATION ";

const PROMPT_LIST_LIMIT: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub headings: Vec<String>,
    pub buttons: Vec<String>,
    pub inputs: Vec<String>,
    pub links: Vec<String>,
    pub forms: usize,
}

impl Observation {
    /// Find the last snapshot line in runner output.
    pub fn from_output(output: &str) -> Option<Self> {
        output.lines().rev().find_map(|line| {
            let start = line.find(OBSERVATION_MARKER)?;
            let json = line[start + OBSERVATION_MARKER.len()..].trim();
            match serde_json::from_str(json) {
                Ok(observation) => Some(observation),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unparsable observation line");
                    None
                }
            }
        })
    }

    /// Render for inclusion in a step prompt.
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "URL: {}", self.url);
        let _ = writeln!(out, "Title: {}", self.title);
        push_list(&mut out, "Headings", &self.headings);
        push_list(&mut out, "Buttons", &self.buttons);
        push_list(&mut out, "Inputs", &self.inputs);
        push_list(&mut out, "Links", &self.links);
        let _ = write!(out, "Forms: {}", self.forms);
        out
    }
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    let _ = writeln!(out, "{label} ({}):", items.len());
    for item in items.iter().take(PROMPT_LIST_LIMIT) {
        let _ = writeln!(out, "- {item}");
    }
    if items.len() > PROMPT_LIST_LIMIT {
        let _ = writeln!(out, "- ... {} more", items.len() - PROMPT_LIST_LIMIT);
    }
}
