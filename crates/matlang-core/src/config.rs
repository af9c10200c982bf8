//! Process-wide configuration registry.
//!
//! Components register named, typed variables at initialization
//! (`verbose` and `start_dir` here; the JIT registers its `jit_*` family
//! in its own init). Values are set from `-name value` command-line pairs;
//! the one trailing positional argument is the target source file.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kinds a config variable can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigKind {
    Str,
    Int,
    Float,
    Bool,
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Declaration of a configuration variable.
#[derive(Debug, Clone)]
pub struct ConfigVar {
    pub name: &'static str,
    pub kind: ConfigKind,
    pub default: &'static str,
    /// Inclusive numeric range, honored for Int and Float kinds.
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ConfigVar {
    pub const fn new(name: &'static str, kind: ConfigKind, default: &'static str) -> ConfigVar {
        ConfigVar {
            name,
            kind,
            default,
            min: None,
            max: None,
        }
    }

    pub const fn with_range(mut self, min: f64, max: f64) -> ConfigVar {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    fn parse(&self, text: &str) -> Result<ConfigValue, CoreError> {
        let invalid = || CoreError::InvalidConfigValue {
            name: self.name.to_string(),
            value: text.to_string(),
        };
        let value = match self.kind {
            ConfigKind::Str => ConfigValue::Str(text.to_string()),
            ConfigKind::Bool => match text {
                "true" | "1" => ConfigValue::Bool(true),
                "false" | "0" => ConfigValue::Bool(false),
                _ => return Err(invalid()),
            },
            ConfigKind::Int => ConfigValue::Int(text.parse().map_err(|_| invalid())?),
            ConfigKind::Float => ConfigValue::Float(text.parse().map_err(|_| invalid())?),
        };
        let numeric = match value {
            ConfigValue::Int(v) => Some(v as f64),
            ConfigValue::Float(v) => Some(v),
            _ => None,
        };
        if let Some(n) = numeric {
            if self.min.is_some_and(|m| n < m) || self.max.is_some_and(|m| n > m) {
                return Err(CoreError::ConfigValueOutOfRange {
                    name: self.name.to_string(),
                    value: n,
                });
            }
        }
        Ok(value)
    }
}

struct Entry {
    var: ConfigVar,
    value: ConfigValue,
}

static REGISTRY: LazyLock<Mutex<HashMap<&'static str, Entry>>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for var in CORE_VARS {
        let value = var.parse(var.default).expect("core config default invalid");
        map.insert(var.name, Entry { var: var.clone(), value });
    }
    Mutex::new(map)
});

/// Variables owned by the core itself.
const CORE_VARS: &[ConfigVar] = &[
    ConfigVar::new("verbose", ConfigKind::Bool, "false"),
    ConfigVar::new("start_dir", ConfigKind::Str, ""),
];

/// Registers a variable; the default becomes its initial value.
/// Re-registering an existing name is a no-op.
pub fn register_var(var: ConfigVar) {
    let mut reg = REGISTRY.lock().expect("config registry poisoned");
    if reg.contains_key(var.name) {
        return;
    }
    let value = var.parse(var.default).expect("config default invalid");
    reg.insert(var.name, Entry { var, value });
}

/// Sets a variable from its textual form.
pub fn set_value(name: &str, text: &str) -> Result<(), CoreError> {
    let mut reg = REGISTRY.lock().expect("config registry poisoned");
    let entry = reg
        .values_mut()
        .find(|e| e.var.name == name)
        .ok_or_else(|| CoreError::UnknownConfigVar {
            name: name.to_string(),
        })?;
    entry.value = entry.var.parse(text)?;
    Ok(())
}

pub fn get_bool(name: &str) -> bool {
    match get_value(name) {
        Some(ConfigValue::Bool(b)) => b,
        _ => false,
    }
}

pub fn get_int(name: &str) -> i64 {
    match get_value(name) {
        Some(ConfigValue::Int(v)) => v,
        _ => 0,
    }
}

pub fn get_float(name: &str) -> f64 {
    match get_value(name) {
        Some(ConfigValue::Float(v)) => v,
        Some(ConfigValue::Int(v)) => v as f64,
        _ => 0.0,
    }
}

pub fn get_str(name: &str) -> String {
    match get_value(name) {
        Some(ConfigValue::Str(s)) => s,
        _ => String::new(),
    }
}

fn get_value(name: &str) -> Option<ConfigValue> {
    let reg = REGISTRY.lock().expect("config registry poisoned");
    reg.values()
        .find(|e| e.var.name == name)
        .map(|e| e.value.clone())
}

/// Parses `-name value` pairs; returns the trailing positional argument
/// (the target source file), if present.
pub fn parse_args(args: &[String]) -> Result<Option<String>, CoreError> {
    let mut target = None;
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if let Some(name) = arg.strip_prefix('-') {
            let value = args.get(i + 1).ok_or_else(|| CoreError::InvalidCommandLine {
                reason: format!("missing value for option '{}'", arg),
            })?;
            set_value(name, value)?;
            i += 2;
        } else {
            if target.is_some() {
                return Err(CoreError::InvalidCommandLine {
                    reason: format!("unexpected extra argument '{}'", arg),
                });
            }
            target = Some(arg.clone());
            i += 1;
        }
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_vars_have_defaults() {
        assert!(!get_bool("verbose"));
        assert_eq!(get_str("start_dir"), "");
    }

    #[test]
    fn registered_var_round_trips() {
        register_var(ConfigVar::new("test_opt_level", ConfigKind::Int, "1").with_range(0.0, 3.0));
        assert_eq!(get_int("test_opt_level"), 1);
        set_value("test_opt_level", "3").unwrap();
        assert_eq!(get_int("test_opt_level"), 3);
        assert!(set_value("test_opt_level", "7").is_err());
    }

    #[test]
    fn unknown_var_is_rejected() {
        let err = set_value("no_such_var", "1").unwrap_err();
        assert!(matches!(err, CoreError::UnknownConfigVar { .. }));
    }

    #[test]
    fn bool_parsing() {
        register_var(ConfigVar::new("test_flag", ConfigKind::Bool, "false"));
        set_value("test_flag", "true").unwrap();
        assert!(get_bool("test_flag"));
        assert!(set_value("test_flag", "maybe").is_err());
    }

    #[test]
    fn parse_args_pairs_and_target() {
        register_var(ConfigVar::new("test_args_flag", ConfigKind::Bool, "false"));
        let args: Vec<String> = ["-test_args_flag", "true", "prog.m"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let target = parse_args(&args).unwrap();
        assert_eq!(target.as_deref(), Some("prog.m"));
        assert!(get_bool("test_args_flag"));
    }

    #[test]
    fn parse_args_missing_value() {
        let args = vec!["-verbose".to_string()];
        assert!(parse_args(&args).is_err());
    }
}
