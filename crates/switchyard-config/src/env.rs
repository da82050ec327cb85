use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Placeholder expansion failure
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("environment variable not found: `{0}`")]
    Missing(String),
    #[error("only variables scoped with 'env.' are supported: `{0}`")]
    UnknownScope(String),
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `{{ env.VAR }}` with an optional `| default("fallback")` tail.
    // Group 1: scoped key, group 2: default value.
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("must be valid regex")
    })
}

/// Expand `{{ env.VAR }}` placeholders in raw TOML text
///
/// `{{ env.VAR | default("fallback") }}` substitutes the fallback when the
/// variable is unset. TOML comment lines pass through untouched so a
/// commented-out secret does not fail the load.
pub fn expand_env(input: &str) -> Result<String, ExpandError> {
    let mut output = String::with_capacity(input.len());

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        if line.trim_start().starts_with('#') {
            output.push_str(line);
        } else {
            expand_line(line, &mut output)?;
        }
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

fn expand_line(line: &str, output: &mut String) -> Result<(), ExpandError> {
    let mut cursor = 0;

    for captures in placeholder_re().captures_iter(line) {
        let span = captures.get(0).expect("regex match has overall group");
        output.push_str(&line[cursor..span.start()]);
        cursor = span.end();

        let key = captures.get(1).map_or("", |m| m.as_str());
        let var = key
            .strip_prefix("env.")
            .filter(|rest| !rest.contains('.'))
            .ok_or_else(|| ExpandError::UnknownScope(key.to_owned()))?;

        match std::env::var(var) {
            Ok(value) => output.push_str(&value),
            Err(_) => match captures.get(2) {
                Some(default) => output.push_str(default.as_str()),
                None => return Err(ExpandError::Missing(var.to_owned())),
            },
        }
    }

    output.push_str(&line[cursor..]);
    Ok(())
}
