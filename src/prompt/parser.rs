//! Parses the section-based prompt template grammar into a `ParsedPrompt`.
//!
//! Parse errors abort the whole document (bad comment nesting, a malformed
//! `__ … __` delimiter line); everything else — a dropped duplicate key, an
//! unknown variable, an empty prompt body — is a warning and the offending
//! piece is simply left out, per the "best-effort availability" error
//! handling note.

use std::collections::BTreeMap;

use tracing::{error, warn};

use super::registry::VariableRegistry;
use super::template::{CallSite, ParsedPrompt};

pub fn parse(source: &str, registry: &VariableRegistry) -> Result<ParsedPrompt, String> {
    let stripped = strip_comments(source)?;
    let normalized = normalize_whitespace(&stripped);
    let sections = split_sections(&normalized)?;

    let mut meta = BTreeMap::new();
    let mut consts = BTreeMap::new();
    let mut raw_vars = BTreeMap::new();
    let mut prompt_bodies: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (raw_title, body) in sections {
        if let Some(special) = special_kind(&raw_title) {
            let entries = parse_key_values(&body);
            let target = match special {
                SpecialKind::Meta => &mut meta,
                SpecialKind::Const => &mut consts,
                SpecialKind::Var => &mut raw_vars,
            };
            for (key, value) in entries {
                if target.insert(key.clone(), value).is_some() {
                    warn!(key, section = special.title(), "duplicate key in special section, later value wins");
                }
            }
        } else {
            prompt_bodies.entry(raw_title).or_default().push(body);
        }
    }

    let vars: BTreeMap<String, String> = raw_vars
        .into_iter()
        .filter(|(_, function_name)| {
            let valid = is_identifier(function_name) && registry.contains(function_name);
            if !valid {
                warn!(function_name, "Var entry does not name a registered function, dropping");
            }
            valid
        })
        .collect();

    let mut prompts = BTreeMap::new();
    let mut call_sites = BTreeMap::new();

    for (title, bodies) in prompt_bodies {
        if title.contains('*') {
            warn!(title, "prompt section title contains '*', dropping");
            continue;
        }

        let concatenated = bodies.join("\n\n");
        if concatenated.trim().is_empty() {
            warn!(title, "prompt section body is empty, dropping");
            continue;
        }

        let (text, sites) = substitute(&concatenated, &consts, &vars);
        prompts.insert(title.clone(), text);
        call_sites.insert(title, sites);
    }

    Ok(ParsedPrompt { meta, consts, vars, prompts, call_sites })
}

enum SpecialKind {
    Meta,
    Const,
    Var,
}

impl SpecialKind {
    fn title(&self) -> &'static str {
        match self {
            SpecialKind::Meta => "Meta",
            SpecialKind::Const => "Const",
            SpecialKind::Var => "Var",
        }
    }
}

fn special_kind(raw_title: &str) -> Option<SpecialKind> {
    let trimmed = raw_title.trim();
    if trimmed.len() < 2 || !trimmed.starts_with('*') || !trimmed.ends_with('*') {
        return None;
    }
    match trimmed.trim_matches('*').trim() {
        "Meta" => Some(SpecialKind::Meta),
        "Const" => Some(SpecialKind::Const),
        "Var" => Some(SpecialKind::Var),
        _ => None,
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Remove `// …` line comments and non-nested `/* … */` block comments.
fn strip_comments(source: &str) -> Result<String, String> {
    let mut out = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut i = 0;
    let mut in_block = false;

    while i < bytes.len() {
        if in_block {
            if source[i..].starts_with("/*") {
                return Err("nested block comment".to_string());
            }
            if source[i..].starts_with("*/") {
                in_block = false;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if source[i..].starts_with("/*") {
            in_block = true;
            i += 2;
            continue;
        }

        if source[i..].starts_with("//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        let ch = source[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }

    if in_block {
        return Err("unterminated block comment".to_string());
    }

    Ok(out)
}

fn normalize_whitespace(source: &str) -> String {
    let mut out_lines: Vec<String> = Vec::new();
    let mut previous_blank = false;

    for line in source.lines() {
        if line.trim().is_empty() {
            if !previous_blank {
                out_lines.push(String::new());
            }
            previous_blank = true;
            continue;
        }
        previous_blank = false;

        let indent_len = line.len() - line.trim_start().len();
        let indent = &line[..indent_len];
        let body = line.trim().split_whitespace().collect::<Vec<_>>().join(" ");
        out_lines.push(format!("{indent}{body}"));
    }

    while out_lines.last().is_some_and(|l| l.is_empty()) {
        out_lines.pop();
    }

    out_lines.join("\n")
}

fn delimiter_title(trimmed: &str) -> Option<String> {
    if trimmed.len() < 4 || !trimmed.starts_with("__") || !trimmed.ends_with("__") {
        return None;
    }
    Some(trimmed[2..trimmed.len() - 2].trim().to_string())
}

fn split_sections(source: &str) -> Result<Vec<(String, String)>, String> {
    let mut sections = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_body: Vec<&str> = Vec::new();

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.contains("__") {
            let title = delimiter_title(trimmed).ok_or_else(|| format!("malformed section delimiter: {trimmed:?}"))?;
            if let Some(title) = current_title.take() {
                sections.push((title, current_body.join("\n")));
            }
            current_title = Some(title);
            current_body = Vec::new();
        } else if current_title.is_some() {
            current_body.push(line);
        }
        // Lines before the first delimiter are preamble and dropped.
    }

    if let Some(title) = current_title {
        sections.push((title, current_body.join("\n")));
    }

    Ok(sections)
}

fn parse_key_values(body: &str) -> Vec<(String, String)> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let trimmed = line.trim().trim_start_matches('-').trim();
            trimmed.split_once('=').map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Replace `{{const}}` placeholders inline; leave `{{var}}` placeholders as
/// literal text while recording their call sites; log+leave unknown ones.
fn substitute(body: &str, consts: &BTreeMap<String, String>, vars: &BTreeMap<String, String>) -> (String, Vec<CallSite>) {
    let mut out = String::with_capacity(body.len());
    let mut sites = Vec::new();
    let bytes = body.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if body[i..].starts_with("{{")
            && let Some(rel_end) = body[i..].find("}}")
        {
            let name = body[i + 2..i + rel_end].trim();
            let token_end = i + rel_end + 2;

            if let Some(value) = consts.get(name) {
                out.push_str(value);
            } else if let Some(function_name) = vars.get(name) {
                let start = out.len();
                out.push_str(&body[i..token_end]);
                sites.push(CallSite { function_name: function_name.clone(), start, end: out.len() });
            } else {
                error!(name, "unknown placeholder, leaving as text");
                out.push_str(&body[i..token_end]);
            }

            i = token_end;
            continue;
        }

        let ch = body[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }

    (out, sites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let src = "hello // trailing\n/* block\nspanning lines */ world";
        let out = strip_comments(src).unwrap();
        assert_eq!(out, "hello \n world");
    }

    #[test]
    fn nested_block_comment_is_a_parse_error() {
        let src = "/* outer /* inner */ */";
        assert!(strip_comments(src).is_err());
    }

    #[test]
    fn malformed_delimiter_line_is_rejected() {
        let err = parse("__ Role __ extra text\nhi", &VariableRegistry::new()).unwrap_err();
        assert!(err.contains("malformed"));
    }

    #[test]
    fn scenario_from_spec_example_five() {
        let mut registry = VariableRegistry::new();
        registry.register("getTime", || "10:00:00".to_string());

        let src = "__* Const *__\n- name = Mario\n__* Var *__\n- now = getTime\n__ Role __\nHello {{name}} at {{now}}.";
        let parsed = parse(src, &registry).unwrap();

        assert_eq!(parsed.prompts.get("Role").unwrap(), "Hello Mario at {{now}}.");
        let sites = parsed.call_sites.get("Role").unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].function_name, "getTime");

        let rendered = parsed.apply_variables(&registry);
        assert_eq!(rendered.get("Role").unwrap(), "Hello Mario at 10:00:00.");
    }

    #[test]
    fn duplicate_section_instances_concatenate_with_blank_line() {
        let src = "__ Role __\nfirst part\n__ Role __\nsecond part";
        let parsed = parse(src, &VariableRegistry::new()).unwrap();
        assert_eq!(parsed.prompts.get("Role").unwrap(), "first part\n\nsecond part");
    }

    #[test]
    fn empty_prompt_body_is_dropped() {
        let src = "__ Empty __\n\n__ NotEmpty __\nhi";
        let parsed = parse(src, &VariableRegistry::new()).unwrap();
        assert!(!parsed.prompts.contains_key("Empty"));
        assert!(parsed.prompts.contains_key("NotEmpty"));
    }

    #[test]
    fn unknown_variable_is_dropped_from_vars_but_not_from_text() {
        let src = "__* Var *__\n- x = notRegistered\n__ Role __\nvalue {{x}}";
        let parsed = parse(src, &VariableRegistry::new()).unwrap();
        assert!(!parsed.vars.contains_key("x"));
        assert_eq!(parsed.prompts.get("Role").unwrap(), "value {{x}}");
        assert!(parsed.call_sites.get("Role").unwrap().is_empty());
    }

    #[test]
    fn round_trip_through_json_and_bincode() {
        let mut registry = VariableRegistry::new();
        registry.register("getTime", || "10:00:00".to_string());
        let src = "__* Const *__\n- name = Mario\n__ Role __\nHello {{name}}.";
        let parsed = parse(src, &registry).unwrap();

        let json = parsed.to_json().unwrap();
        let via_json = ParsedPrompt::from_json(&json).unwrap();
        assert_eq!(parsed, via_json);

        let bytes = parsed.to_bincode().unwrap();
        let via_bincode = ParsedPrompt::from_bincode(&bytes).unwrap();
        assert_eq!(parsed, via_bincode);
    }
}
