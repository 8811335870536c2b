use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_vars(&mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate_has_downstreams(&config)?;

    Ok(config)
}

pub(crate) fn validate_has_downstreams(config: &Config) -> anyhow::Result<()> {
    if config.llm.enabled && !config.llm.accounts.is_empty() {
        return Ok(());
    }

    bail!(indoc! {r#"
        No upstream accounts configured. The gateway requires at least one
        LLM account to function.

        Example configuration:

          [llm.accounts.primary]
          api_key = "${OPENAI_API_KEY}"
          base_api = "https://api.openai.com/v1"
    "#});
}

/// Expands `${VAR}` and `${VAR:-default}` references in string config values
/// against the process environment. Values containing no `${...}` reference
/// are left untouched; a reference to an unset variable with no default is
/// an error that names the offending key path.
fn expand_env_vars(value: &mut Value) -> anyhow::Result<()> {
    expand_env_vars_at(&mut Vec::new(), value)
}

fn expand_env_vars_at<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match substitute(s) {
            Ok(expanded) => *s = expanded,
            Err(reason) => {
                let mut rendered = String::new();
                for segment in path.iter() {
                    match segment {
                        Ok(key) => {
                            if !rendered.is_empty() {
                                rendered.push('.');
                            }
                            rendered.push_str(key);
                        }
                        Err(index) => rendered.push_str(&format!("[{index}]")),
                    }
                }
                bail!("Failed to expand '{s}' at path '{rendered}': {reason}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_vars_at(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_vars_at(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// Replaces every `${NAME}` or `${NAME:-default}` occurrence in `input` with
/// the named environment variable, or the default when the variable is
/// unset. Returns the reason for failure when a variable is unset and no
/// default was given.
fn substitute(input: &str) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            out.push_str(rest);
            return Ok(out);
        };

        out.push_str(&rest[..start]);
        let inner = &rest[start + 2..start + end];
        rest = &rest[start + end + 1..];

        let (name, default) = match inner.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (inner, None),
        };

        match (std::env::var(name), default) {
            (Ok(value), _) => out.push_str(&value),
            (Err(_), Some(default)) => out.push_str(default),
            (Err(_), None) => return Err(format!("environment variable '{name}' is not set")),
        }
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::Config;

    #[test]
    fn validation_fails_with_no_accounts() {
        let config = Config::default();
        let result = super::validate_has_downstreams(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("No upstream accounts configured"));
    }

    #[test]
    fn validation_fails_when_llm_disabled() {
        let config_str = indoc! {r#"
            [llm]
            enabled = false

            [llm.accounts.primary]
            api_key = "sk-test"
            base_api = "https://api.openai.com/v1"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let result = super::validate_has_downstreams(&config);
        assert!(result.is_err());
    }

    #[test]
    fn validation_passes_with_one_account() {
        let config_str = indoc! {r#"
            [llm.accounts.primary]
            api_key = "sk-test"
            base_api = "https://api.openai.com/v1"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        assert!(super::validate_has_downstreams(&config).is_ok());
    }

    #[test]
    fn env_var_substitution_with_default() {
        assert_eq!(super::substitute("${MISSING_VAR:-fallback}").unwrap(), "fallback");
    }

    #[test]
    fn env_var_substitution_missing_without_default_fails() {
        assert!(super::substitute("${DEFINITELY_NOT_SET_ABCXYZ}").is_err());
    }

    #[test]
    fn env_var_substitution_set_variable() {
        temp_env::with_var("NEXUS_TEST_TOKEN", Some("secret-value"), || {
            assert_eq!(super::substitute("${NEXUS_TEST_TOKEN}").unwrap(), "secret-value");
        });
    }

    #[test]
    fn plain_string_without_reference_is_untouched() {
        assert_eq!(super::substitute("plain-value").unwrap(), "plain-value");
    }
}
