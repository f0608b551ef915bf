use once_cell::sync::Lazy;
use quill_core::{ChatError, Result};
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::env;

/// `${VAR}` or `${VAR:-default}`.
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid pattern")
});

/// Expands environment references in every string scalar of a YAML document.
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    match value {
        Value::String(s) => {
            *s = substitute_in_string(s)?;
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Tagged(tagged) => {
            substitute_env_vars(&mut tagged.value)?;
        }
        _ => {}
    }
    Ok(())
}

fn substitute_in_string(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let substituted = ENV_VAR_REGEX.replace_all(input, |cap: &Captures| {
        let name = &cap[1];
        lookup(name)
            .or_else(|| cap.get(2).map(|default| default.as_str().to_string()))
            .unwrap_or_else(|| {
                missing.push(name.to_string());
                String::new()
            })
    });

    if missing.is_empty() {
        Ok(substituted.into_owned())
    } else {
        Err(ChatError::Config(format!(
            "Missing required environment variables: {}",
            missing.join(", ")
        )))
    }
}

fn lookup(name: &str) -> Option<String> {
    env::var(name).ok().or_else(|| match name {
        "HOME" => env::var("USERPROFILE").ok(),
        _ => None,
    })
}
