//! Operator configuration.

use linked_hash_map::LinkedHashMap;

use crate::error::{Error, Result};

pub const CONFIG_NUM_THREADS: &str = "num_threads";
pub const CONFIG_WORK_BY_INDEX: &str = "work_by_index";
pub const CONFIG_INPLACE: &str = "inplace";

/// A single typed configuration value.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum ConfigValue {
    Int(i32),
    Double(f64),
    Bool(bool),
    Str(String),
}

/// Named typed options rebinding an operator's execution parameters.
///
/// Setting the config on an operator replaces the engine-side parameter set
/// wholesale; unspecified options fall back to the defaults declared in the
/// operator's specification.
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct OperatorConfig {
    options: LinkedHashMap<String, ConfigValue>,
}

impl OperatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: ConfigValue) {
        self.options.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.options.get(name)
    }

    pub fn options(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.options.iter()
    }

    pub fn set_num_threads(&mut self, threads: i32) {
        self.set(CONFIG_NUM_THREADS, ConfigValue::Int(threads));
    }

    pub fn set_work_by_index(&mut self, enabled: bool) {
        self.set(CONFIG_WORK_BY_INDEX, ConfigValue::Bool(enabled));
    }

    pub fn set_inplace(&mut self, enabled: bool) {
        self.set(CONFIG_INPLACE, ConfigValue::Bool(enabled));
    }

    pub fn num_threads(&self) -> Result<i32> {
        match self.get(CONFIG_NUM_THREADS) {
            Some(ConfigValue::Int(n)) => Ok(*n),
            Some(other) => Err(Error::TypeMismatch {
                expected: "int".to_string(),
                actual: format!("{:?}", other),
            }),
            None => Ok(0),
        }
    }
}
