// ============================================================
// Layer 6 — Experiment Configuration Store
// ============================================================
// A two-level key/value store: section → key → typed Value.
//
// Construction order (once per run):
//   1. built-in defaults       (`Configuration::defaults()`)
//   2. the TOML file           may add keys; a key that already
//                              exists keeps its type
//   3. CLI overrides           `section.key:value`, existing keys only
//
// An override must coerce to the type of the value it replaces;
// an Int may be widened to a Float, nothing else converts.
//
// Example file:
//   [train]
//   batch_size = 64
//   eval_metrics = "bleu,loss"
//
//   [model]
//   type = "attention"
//
//   [data]
//   train_src = "data/train.de"
//   train_trg = "data/train.en"

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::error::RunnerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_)  => "bool",
            Value::Int(_)   => "int",
            Value::Float(_) => "float",
            Value::Str(_)   => "string",
        }
    }

    /// Parse `raw` as a value of the same type as `self`.
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            Value::Bool(_) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Int(_)   => raw.parse().ok().map(Value::Int),
            Value::Float(_) => raw.parse().ok().map(Value::Float),
            Value::Str(_)   => Some(Value::Str(raw.trim_matches('"').to_string())),
        }
    }

    /// Accept `incoming` in place of `self` if the types line up.
    fn adopt(&self, incoming: Value) -> Option<Value> {
        match (self, incoming) {
            (Value::Float(_), Value::Int(i)) => Some(Value::Float(i as f64)),
            (current, v) if current.type_name() == v.type_name() => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b)  => write!(f, "{b}"),
            Value::Int(i)   => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s)   => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub type Section = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    sections: BTreeMap<String, Section>,
}

impl Configuration {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in defaults for every key the runner reads that has one.
    /// Data paths have no default and must come from the file.
    pub fn defaults() -> Self {
        let mut c = Self::empty();
        let train: [(&str, Value); 18] = [
            ("seed",            0i64.into()),
            ("device",          "cpu".into()),
            ("batch_size",      32i64.into()),
            ("eval_batch_size", 32i64.into()),
            ("max_epochs",      100i64.into()),
            ("max_iterations",  0i64.into()),
            ("max_minutes",     0i64.into()),
            ("eval_freq",       0i64.into()),
            ("eval_metrics",    "loss".into()),
            ("eval_beam",       6i64.into()),
            ("eval_max_len",    100i64.into()),
            ("patience",        10i64.into()),
            ("checkpoint_freq", 0i64.into()),
            ("n_checkpoints",   5i64.into()),
            ("disp_freq",       30i64.into()),
            ("lr",              0.0004f64.into()),
            ("gclip",           1.0f64.into()),
            ("save_path",       "experiments".into()),
        ];
        for (k, v) in train {
            c.set("train", k, v);
        }
        let model: [(&str, Value); 5] = [
            ("type",       "attention".into()),
            ("emb_dim",    128i64.into()),
            ("hid_dim",    256i64.into()),
            ("dropout",    0.0f64.into()),
            ("init_scale", 0.1f64.into()),
        ];
        for (k, v) in model {
            c.set("model", k, v);
        }
        c.set("data", "max_len", 0i64.into());
        c.set("data", "filters", "".into());
        c.set("vocabulary", "src_max_size", 0i64.into());
        c.set("vocabulary", "trg_max_size", 0i64.into());
        c
    }

    /// Defaults, then the TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration '{}'", path.display()))?;
        let mut config = Self::defaults();
        config
            .merge_toml(&text)
            .with_context(|| format!("Invalid configuration '{}'", path.display()))?;
        Ok(config)
    }

    /// Merge a TOML document of `[section] key = scalar` entries.
    pub fn merge_toml(&mut self, text: &str) -> Result<()> {
        let doc: toml::Table = toml::from_str(text)
            .map_err(|e| RunnerError::config(format!("TOML parse error: {e}")))?;

        for (section, body) in doc {
            let table = body.as_table().ok_or_else(|| {
                RunnerError::config(format!("top-level key '{section}' must be a [section]"))
            })?;
            for (key, raw) in table {
                let value = scalar_from_toml(raw).ok_or_else(|| {
                    RunnerError::config(format!(
                        "'{section}.{key}' must be a bool, integer, float or string"
                    ))
                })?;
                let value = match self.get(&section, key) {
                    Some(current) => current.adopt(value.clone()).ok_or_else(|| {
                        RunnerError::config(format!(
                            "'{section}.{key}' expects {} but the file gives {}",
                            current.type_name(),
                            value.type_name()
                        ))
                    })?,
                    None => value,
                };
                self.set(&section, key, value);
            }
        }
        Ok(())
    }

    /// Apply one `section.key:value` override to an existing key.
    pub fn apply_override(&mut self, spec: &str) -> Result<(), RunnerError> {
        let (path, raw) = spec.split_once(':').ok_or_else(|| {
            RunnerError::config(format!("override '{spec}' is not of the form section.key:value"))
        })?;
        let (section, key) = path.split_once('.').ok_or_else(|| {
            RunnerError::config(format!("override '{spec}' does not name a section"))
        })?;
        let current = self.get(section, key).ok_or_else(|| {
            RunnerError::config(format!("override '{spec}' names unknown key '{section}.{key}'"))
        })?;
        let value = current.coerce(raw).ok_or_else(|| {
            RunnerError::config(format!(
                "override '{spec}': '{raw}' is not a valid {}",
                current.type_name()
            ))
        })?;
        tracing::debug!("override {section}.{key} = {value}");
        self.set(section, key, value);
        Ok(())
    }

    pub fn apply_overrides<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<(), RunnerError> {
        specs.iter().try_for_each(|s| self.apply_override(s.as_ref()))
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section).and_then(|s| s.get(key))
    }

    pub fn section(&self, section: &str) -> Option<&Section> {
        self.sections.get(section)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &Section)> {
        self.sections.iter()
    }

    fn require(&self, section: &str, key: &str) -> Result<&Value, RunnerError> {
        self.get(section, key)
            .ok_or_else(|| RunnerError::config(format!("missing required key '{section}.{key}'")))
    }

    pub fn get_str(&self, section: &str, key: &str) -> Result<&str, RunnerError> {
        match self.require(section, key)? {
            Value::Str(s) => Ok(s),
            other => Err(type_error(section, key, "string", other)),
        }
    }

    pub fn get_i64(&self, section: &str, key: &str) -> Result<i64, RunnerError> {
        match self.require(section, key)? {
            Value::Int(i) => Ok(*i),
            other => Err(type_error(section, key, "int", other)),
        }
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Result<usize, RunnerError> {
        let i = self.get_i64(section, key)?;
        usize::try_from(i).map_err(|_| {
            RunnerError::config(format!("'{section}.{key}' must be non-negative, got {i}"))
        })
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Result<f64, RunnerError> {
        match self.require(section, key)? {
            Value::Float(x) => Ok(*x),
            Value::Int(i)   => Ok(*i as f64),
            other => Err(type_error(section, key, "float", other)),
        }
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<bool, RunnerError> {
        match self.require(section, key)? {
            Value::Bool(b) => Ok(*b),
            other => Err(type_error(section, key, "bool", other)),
        }
    }

    /// Canonical TOML rendering, used for experiment ids and logs.
    pub fn to_toml_string(&self) -> String {
        let mut out = String::new();
        for (name, section) in &self.sections {
            out.push_str(&format!("[{name}]\n"));
            for (key, value) in section {
                out.push_str(&format!("{key} = {}\n", scalar_to_toml(value)));
            }
            out.push('\n');
        }
        out
    }
}

fn type_error(section: &str, key: &str, expected: &str, found: &Value) -> RunnerError {
    RunnerError::config(format!(
        "'{section}.{key}' must be a {expected}, found {} '{found}'",
        found.type_name()
    ))
}

fn scalar_to_toml(value: &Value) -> toml::Value {
    match value {
        Value::Bool(b)  => toml::Value::Boolean(*b),
        Value::Int(i)   => toml::Value::Integer(*i),
        Value::Float(x) => toml::Value::Float(*x),
        Value::Str(s)   => toml::Value::String(s.clone()),
    }
}

fn scalar_from_toml(raw: &toml::Value) -> Option<Value> {
    match raw {
        toml::Value::Boolean(b) => Some(Value::Bool(*b)),
        toml::Value::Integer(i) => Some(Value::Int(*i)),
        toml::Value::Float(x)   => Some(Value::Float(*x)),
        toml::Value::String(s)  => Some(Value::Str(s.clone())),
        _ => None,
    }
}
