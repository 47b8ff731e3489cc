//! The parsed, immutable form of a prompt source file: constant
//! substitution already applied, variable placeholders left in place with
//! their call sites recorded for O(1) re-rendering.

use std::collections::{BTreeMap, HashMap};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use super::registry::VariableRegistry;

/// One `{{name}}` occurrence left after constant substitution, recorded so
/// `apply_variables` never has to re-scan the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct CallSite {
    pub function_name: String,
    pub start: usize,
    pub end: usize,
}

/// One source document's compiled form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Encode, Decode)]
pub struct ParsedPrompt {
    pub meta: BTreeMap<String, String>,
    pub consts: BTreeMap<String, String>,
    /// Variable name -> bound function name, already validated against a
    /// registry at parse time.
    pub vars: BTreeMap<String, String>,
    pub prompts: BTreeMap<String, String>,
    pub call_sites: BTreeMap<String, Vec<CallSite>>,
}

impl ParsedPrompt {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_bincode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    pub fn from_bincode(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        bincode::decode_from_slice(bytes, bincode::config::standard()).map(|(value, _)| value)
    }

    /// Render every prompt section, replacing each recorded call site with
    /// the referenced function's result (walked in reverse order so earlier
    /// indices stay valid), memoized per render.
    pub fn apply_variables(&self, registry: &VariableRegistry) -> BTreeMap<String, String> {
        let mut memo: HashMap<&str, String> = HashMap::new();
        let mut rendered = BTreeMap::new();

        for (title, body) in &self.prompts {
            let mut text = body.clone();
            if let Some(sites) = self.call_sites.get(title) {
                for site in sites.iter().rev() {
                    let value = memo.entry(site.function_name.as_str()).or_insert_with(|| registry.call(&site.function_name).unwrap_or_default()).clone();
                    text.replace_range(site.start..site.end, &value);
                }
            }
            rendered.insert(title.clone(), text);
        }

        rendered
    }

    /// Concatenate the requested sections (prefixed with `**title:**\n` when
    /// `include_title`), blank-line separated, then append a summary block
    /// titled per `meta["summary_title"]` (default `"Summary"`) when
    /// `include_summary` and a rendered summary section exists.
    pub fn format_for_llm(&self, rendered: &BTreeMap<String, String>, titles: &[String], include_title: bool, include_summary: bool) -> String {
        let mut parts = Vec::new();

        for title in titles {
            match rendered.get(title) {
                Some(body) => {
                    if include_title {
                        parts.push(format!("**{title}:**\n{body}"));
                    } else {
                        parts.push(body.clone());
                    }
                }
                None => tracing::warn!(title, "formatForLLM: requested title not found, skipping"),
            }
        }

        if include_summary {
            let summary_title = self.meta.get("summary_title").cloned().unwrap_or_else(|| "Summary".to_string());
            if let Some(body) = rendered.get(&summary_title) {
                parts.push(format!("**{summary_title}:**\n{body}"));
            }
        }

        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParsedPrompt {
        let mut meta = BTreeMap::new();
        meta.insert("summary_title".to_string(), "Recap".to_string());
        let mut prompts = BTreeMap::new();
        prompts.insert("Role".to_string(), "You are helpful.".to_string());
        prompts.insert("Recap".to_string(), "Prior chat summary.".to_string());
        ParsedPrompt { meta, consts: BTreeMap::new(), vars: BTreeMap::new(), prompts, call_sites: BTreeMap::new() }
    }

    #[test]
    fn format_for_llm_includes_titles_and_summary() {
        let parsed = sample();
        let rendered = parsed.apply_variables(&VariableRegistry::new());
        let out = parsed.format_for_llm(&rendered, &["Role".to_string()], true, true);
        assert_eq!(out, "**Role:**\nYou are helpful.\n\n**Recap:**\nPrior chat summary.");
    }

    #[test]
    fn format_for_llm_skips_missing_titles() {
        let parsed = sample();
        let rendered = parsed.apply_variables(&VariableRegistry::new());
        let out = parsed.format_for_llm(&rendered, &["Missing".to_string()], false, false);
        assert_eq!(out, "");
    }
}
