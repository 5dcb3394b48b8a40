//! Driver definition
//!
//! One definition per device driver: its rules, capability names, offline
//! timeout and, when the driver uses byte patterns, the automaton compiled
//! from them. The content hash and semantic version together identify a
//! compiled artifact; upgrades replace the whole definition, nothing is
//! ever mutated in place.

use std::time::Duration;

use reflex_automaton::ByteAutomaton;

use crate::action::Action;
use crate::matcher::Matcher;

/// How the platform runs a driver's reflexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunMode {
    /// Execute locally
    #[default]
    Normal,
    /// Evaluate and log, but suppress effects
    Shadow,
    /// Load but never evaluate
    Disabled,
}

impl RunMode {
    /// Get the run mode as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Normal => "normal",
            RunMode::Shadow => "shadow",
            RunMode::Disabled => "disabled",
        }
    }
}

/// One reflex: preconditions and effects
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rule {
    /// Preconditions; any matching one fires the rule
    pub matchers: Vec<Matcher>,

    /// Effects, executed in order
    pub actions: Vec<Action>,
}

/// The authored, versioned driver artifact
#[derive(Debug, Clone, PartialEq)]
pub struct DriverDefinition {
    /// Driver name
    pub name: String,

    /// Semantic version of the driver package
    pub version: String,

    /// Content hash of the driver package
    pub hash: String,

    /// How long without traffic before the device counts as offline
    pub offline_timeout: Duration,

    /// Run mode
    pub run_mode: RunMode,

    /// Capability names the driver implements
    pub capabilities: Vec<String>,

    /// Reflex rules, in authoring order
    pub rules: Vec<Rule>,

    /// Automaton compiled from the rules' byte patterns, when any exist
    pub automaton: Option<ByteAutomaton<Vec<Action>>>,
}

impl DriverDefinition {
    /// Create an empty definition with the given identity
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            hash: hash.into(),
            offline_timeout: Duration::ZERO,
            run_mode: RunMode::default(),
            capabilities: Vec::new(),
            rules: Vec::new(),
            automaton: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_fields() {
        let driver = DriverDefinition::new("bulb", "1.4.0", "sha256:abc");
        assert_eq!(driver.name, "bulb");
        assert_eq!(driver.version, "1.4.0");
        assert_eq!(driver.hash, "sha256:abc");
        assert_eq!(driver.run_mode, RunMode::Normal);
        assert!(driver.rules.is_empty());
    }
}
