use std::collections::HashMap;
use std::path::Path;

use super::value::ConfigValue;
use super::ConfigError;

/// Load a YAML file if it exists and flatten it into `values`.
pub(crate) fn load_yaml_file(
    path: &Path,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
    load_yaml_str(&content, values)
}

pub(crate) fn load_yaml_str(
    content: &str,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
    flatten_yaml("", &yaml, values);
    Ok(())
}

/// Flatten a YAML tree into dot-separated keys.
///
/// Sequences are stored whole under their parent key and element by element
/// under `key.0`, `key.1`, ... so that both list and indexed access work.
/// Mappings are stored whole as well, which lets sections such as
/// `rampart.entities` be enumerated.
pub(crate) fn flatten_yaml(
    prefix: &str,
    value: &serde_yaml::Value,
    out: &mut HashMap<String, ConfigValue>,
) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), ConfigValue::from_yaml(value));
            }
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => ConfigValue::from_yaml(other).to_string(),
                };
                let full_key = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_yaml(&full_key, v, out);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            if prefix.is_empty() {
                return;
            }
            out.insert(
                prefix.to_string(),
                ConfigValue::List(seq.iter().map(ConfigValue::from_yaml).collect()),
            );
            for (i, item) in seq.iter().enumerate() {
                flatten_yaml(&format!("{prefix}.{i}"), item, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
            }
        }
    }
}

/// Apply `RAMPART_*` environment variables on top of the loaded values.
///
/// `RAMPART_SECURITY_TRUSTED_ROLES` overrides `rampart.security.trusted_roles`
/// when that key exists; unknown variables fall back to replacing every `_`
/// with `.`. Values overriding a list are split on commas.
pub(crate) fn overlay_env(
    vars: impl IntoIterator<Item = (String, String)>,
    values: &mut HashMap<String, ConfigValue>,
) {
    let known: HashMap<String, String> = values
        .keys()
        .map(|k| (env_name(k), k.clone()))
        .collect();

    for (name, raw) in vars {
        if !name.starts_with("RAMPART_") {
            continue;
        }
        let key = known
            .get(&name)
            .cloned()
            .unwrap_or_else(|| name.to_lowercase().replace('_', "."));
        let value = match values.get(&key) {
            Some(ConfigValue::List(_)) => ConfigValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| ConfigValue::String(s.to_string()))
                    .collect(),
            ),
            _ => ConfigValue::String(raw),
        };
        values.insert(key, value);
    }
}

fn env_name(key: &str) -> String {
    key.replace(['.', '-'], "_").to_uppercase()
}
