//! Operator specifications.
//!
//! A specification is the declarative contract of an operator: description,
//! typed pins on both sides, configuration options, scripting properties and
//! an optional changelog. Specifications are retrieved from the engine by
//! operator name, or built client-side for custom operators.

use std::str::FromStr;

use linked_hash_map::LinkedHashMap;

use crate::error::{Error, Result};
use crate::version::EngineVersion;

/// Declarative description of a single input or output pin.
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct PinSpecification {
    /// Snake-case pin name.
    pub name: String,
    /// Accepted type names, drawn from the closed entity registry plus
    /// primitive names.
    pub type_names: Vec<String>,
    /// Documentation string; markdown and LaTeX permitted.
    pub document: String,
    pub optional: bool,
    /// An ellipsis pin accepts its index and all higher indices.
    pub ellipsis: bool,
    /// Name of a derived wrapper class, when the output should be narrowed.
    pub name_derived_class: String,
    /// Previous names of this pin, kept for backward compatibility. Writing
    /// through an alias routes to this pin and emits a deprecation warning.
    pub aliases: Vec<String>,
}

impl PinSpecification {
    pub fn new(name: &str, type_names: &[&str], document: &str) -> Self {
        Self {
            name: name.to_string(),
            type_names: type_names.iter().map(|t| t.to_string()).collect(),
            document: document.to_string(),
            ..Default::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn ellipsis(mut self) -> Self {
        self.ellipsis = true;
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }
}

/// A single configuration option an operator understands.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ConfigOptionSpec {
    pub type_name: String,
    pub default_value: String,
    pub document: String,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, serde_repr::Deserialize_repr, serde_repr::Serialize_repr,
)]
#[repr(u8)]
pub enum Exposure {
    Public,
    Private,
    Hidden,
}

impl Default for Exposure {
    fn default() -> Self {
        Self::Public
    }
}

/// Scripting-facing properties of an operator.
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct Properties {
    pub user_name: String,
    pub scripting_name: String,
    pub category: String,
    #[serde(default)]
    pub exposure: Exposure,
    /// Plugin the operator ships in, empty for built-ins.
    pub plugin: String,
    /// License feature required to instantiate, empty when unrestricted.
    pub license: String,
}

/// Ordered changelog with monotonic version bumps.
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct Changelog {
    entries: Vec<(String, String)>,
}

impl Changelog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Latest recorded version, zero when the changelog is empty.
    pub fn last_version(&self) -> Result<EngineVersion> {
        match self.entries.last() {
            Some((v, _)) => EngineVersion::from_str(v),
            None => Ok(EngineVersion::new(0, 0, 0)),
        }
    }

    /// Appends an entry, enforcing strictly increasing versions.
    pub fn push(&mut self, version: &str, changes: &str) -> Result<()> {
        let v = EngineVersion::from_str(version)?;
        if v <= self.last_version()? {
            return Err(Error::validation(format!(
                "changelog version {} does not grow past {}",
                version,
                self.last_version()?
            )));
        }
        self.entries.push((version.to_string(), changes.to_string()));
        Ok(())
    }

    pub fn patch_bump(&mut self, changes: &str) -> Result<()> {
        self.bump(changes, |(ma, mi, pa)| (ma, mi, pa + 1))
    }

    pub fn minor_bump(&mut self, changes: &str) -> Result<()> {
        self.bump(changes, |(ma, mi, _)| (ma, mi + 1, 0))
    }

    pub fn major_bump(&mut self, changes: &str) -> Result<()> {
        self.bump(changes, |(ma, _, _)| (ma + 1, 0, 0))
    }

    fn bump(&mut self, changes: &str, f: impl Fn((u64, u64, u64)) -> (u64, u64, u64)) -> Result<()> {
        let last = self.last_version()?;
        let triple = {
            let s = last.to_string();
            let mut it = s.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
            (
                it.next().unwrap_or(0),
                it.next().unwrap_or(0),
                it.next().unwrap_or(0),
            )
        };
        let (ma, mi, pa) = f(triple);
        self.push(&format!("{}.{}.{}", ma, mi, pa), changes)
    }
}

/// Full public contract of an operator.
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct Specification {
    /// Free-text description; markdown and LaTeX permitted.
    pub description: String,
    pub inputs: LinkedHashMap<i32, PinSpecification>,
    pub outputs: LinkedHashMap<i32, PinSpecification>,
    pub config_options: LinkedHashMap<String, ConfigOptionSpec>,
    pub properties: Properties,
    #[serde(default)]
    pub changelog: Option<Changelog>,
}

impl Specification {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, pin: i32, spec: PinSpecification) -> Self {
        self.inputs.insert(pin, spec);
        self
    }

    pub fn with_output(mut self, pin: i32, spec: PinSpecification) -> Self {
        self.outputs.insert(pin, spec);
        self
    }

    /// Resolves an input pin by canonical name or alias.
    ///
    /// Returns the pin index and whether the match went through an alias.
    pub fn input_pin_by_name(&self, name: &str) -> Result<(i32, bool)> {
        for (idx, pin) in &self.inputs {
            if pin.name == name {
                return Ok((*idx, false));
            }
        }
        for (idx, pin) in &self.inputs {
            if pin.aliases.iter().any(|a| a == name) {
                return Ok((*idx, true));
            }
        }
        Err(Error::UnsupportedOperation(format!(
            "no input pin named `{}`",
            name
        )))
    }

    /// Specification for an input pin index, honoring ellipsis pins.
    pub fn input_pin(&self, pin: i32) -> Option<&PinSpecification> {
        if let Some(spec) = self.inputs.get(&pin) {
            return Some(spec);
        }
        self.inputs
            .iter()
            .filter(|(idx, spec)| spec.ellipsis && **idx <= pin)
            .map(|(_, spec)| spec)
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_alias() -> Specification {
        Specification::new("scales a field by a factor")
            .with_input(0, PinSpecification::new("field", &["field"], "input field"))
            .with_input(
                1,
                PinSpecification::new("weights", &["double", "field"], "scale factor")
                    .with_aliases(&["ponderation"]),
            )
    }

    #[test]
    fn pin_lookup_prefers_canonical_name() {
        let spec = spec_with_alias();
        assert_eq!(spec.input_pin_by_name("weights").unwrap(), (1, false));
        assert_eq!(spec.input_pin_by_name("ponderation").unwrap(), (1, true));
        assert!(spec.input_pin_by_name("missing").is_err());
    }

    #[test]
    fn ellipsis_pin_covers_higher_indices() {
        let spec = Specification::new("merges any number of fields").with_input(
            0,
            PinSpecification::new("fields", &["field"], "fields to merge").ellipsis(),
        );
        assert!(spec.input_pin(0).is_some());
        assert!(spec.input_pin(7).is_some());
    }

    #[test]
    fn changelog_bumps_are_monotonic() {
        let mut log = Changelog::new();
        log.minor_bump("initial").unwrap();
        log.patch_bump("fix").unwrap();
        log.major_bump("rewrite").unwrap();
        assert_eq!(log.last_version().unwrap(), EngineVersion::new(1, 0, 0));
        assert!(log.push("0.5", "regression").is_err());
    }
}
