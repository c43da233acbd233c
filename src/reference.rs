//! Reference inlining.
//!
//! `[ref: name]` is replaced by the named scenario's raw text. There is no
//! reference graph: nested references are expanded by recursion, and the
//! depth guard is what stops self or mutual references.
use crate::error::BuildError;
use crate::scenario::{Scenario, ScenarioStore, Segment};

/// Inline every reference in `scenario`, failing before any oracle work when a
/// name is unknown or nesting exceeds `max_depth`.
pub fn resolve(
    scenario: &Scenario,
    store: &ScenarioStore,
    max_depth: usize,
) -> Result<String, BuildError> {
    expand(&scenario.name, scenario, store, 0, max_depth)
}

fn expand(
    root: &str,
    scenario: &Scenario,
    store: &ScenarioStore,
    depth: usize,
    max_depth: usize,
) -> Result<String, BuildError> {
    if scenario.references.is_empty() {
        return Ok(scenario.text.clone());
    }
    if depth >= max_depth {
        return Err(BuildError::ReferenceDepthExceeded {
            scenario: root.to_string(),
            depth: max_depth,
        });
    }

    let mut expanded = String::with_capacity(scenario.text.len());
    for segment in &scenario.segments {
        match segment {
            Segment::Text(text) => expanded.push_str(text),
            Segment::Reference(name) => {
                let referenced =
                    store
                        .get(name)
                        .ok_or_else(|| BuildError::UnknownReference {
                            scenario: root.to_string(),
                            reference: name.clone(),
                        })?;
                let body = expand(root, referenced, store, depth + 1, max_depth)?;
                expanded.push_str(body.trim_end());
            }
        }
    }
    Ok(expanded)
}
