use std::sync::OnceLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in a raw TOML string
///
/// An optional fallback is supported via `{{ env.VAR | default("value") }}`.
/// Expansion happens on the raw text before deserialization so the settings
/// structs hold plain `String`/`SecretString` values. TOML comment lines are
/// left untouched.
pub fn expand_env(input: &str) -> Result<String, String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is valid")
    });

    let mut output = String::with_capacity(input.len());
    let mut first = true;

    for line in input.lines() {
        if !first {
            output.push('\n');
        }
        first = false;

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut cursor = 0;
        for caps in re.captures_iter(line) {
            let whole = caps.get(0).expect("capture 0 always present");
            let var = &caps[1];
            output.push_str(&line[cursor..whole.start()]);

            match std::env::var(var) {
                Ok(value) => output.push_str(&value),
                Err(_) => match caps.get(2) {
                    Some(fallback) => output.push_str(fallback.as_str()),
                    None => return Err(format!("environment variable not found: `{var}`")),
                },
            }

            cursor = whole.end();
        }
        output.push_str(&line[cursor..]);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_without_placeholders() {
        assert_eq!(expand_env("key = \"value\"").unwrap(), "key = \"value\"");
    }

    #[test]
    fn expands_set_variable() {
        temp_env::with_var("MANIFOLD_TEST_TOKEN", Some("s3cret"), || {
            let out = expand_env("token = \"{{ env.MANIFOLD_TEST_TOKEN }}\"").unwrap();
            assert_eq!(out, "token = \"s3cret\"");
        });
    }

    #[test]
    fn missing_variable_errors() {
        temp_env::with_var_unset("MANIFOLD_TEST_MISSING", || {
            let err = expand_env("token = \"{{ env.MANIFOLD_TEST_MISSING }}\"").unwrap_err();
            assert!(err.contains("MANIFOLD_TEST_MISSING"));
        });
    }

    #[test]
    fn default_covers_missing_variable() {
        temp_env::with_var_unset("MANIFOLD_TEST_MISSING", || {
            let out =
                expand_env("url = \"{{ env.MANIFOLD_TEST_MISSING | default(\"http://localhost\") }}\"")
                    .unwrap();
            assert_eq!(out, "url = \"http://localhost\"");
        });
    }

    #[test]
    fn comment_lines_are_not_expanded() {
        temp_env::with_var_unset("MANIFOLD_TEST_MISSING", || {
            let input = "# token = \"{{ env.MANIFOLD_TEST_MISSING }}\"";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
