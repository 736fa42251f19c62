//! Session configuration file
//!
//! One TOML document lists the components to start, the link rules and
//! stream groups the policy uses, and endpoints to create at startup.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoint::EndpointDescriptor;
use crate::error::{Error, Result};
use crate::rules::{LinkRule, RuleSet, StreamGroup};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "session.toml";

/// Outcome when two competing streams have the same priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EqualPriority {
    /// The stream that is already linked stays
    #[default]
    KeepExisting,
    /// The newly requested stream takes over
    PreferIncoming,
}

/// Settings for the config arbitration policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub equal_priority: EqualPriority,
}

/// Whether a component starts with the plugins or after them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Plugin,
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
}

impl ComponentConfig {
    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Plugin,
        }
    }

    pub fn script(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Script,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub policy: PolicySettings,
    pub components: Vec<ComponentConfig>,
    pub rules: Vec<LinkRule>,
    pub stream_groups: Vec<StreamGroup>,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl SessionConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        debug!(
            path = %path.display(),
            components = config.components.len(),
            rules = config.rules.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_component(mut self, component: ComponentConfig) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_rule(mut self, rule: LinkRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_stream_group(mut self, group: StreamGroup) -> Self {
        self.stream_groups.push(group);
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointDescriptor) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_policy(mut self, policy: PolicySettings) -> Self {
        self.policy = policy;
        self
    }

    /// Check names are unique and references resolve
    pub fn validate(&self) -> Result<()> {
        unique("component", self.components.iter().map(|c| c.name.as_str()))?;
        unique("rule", self.rules.iter().map(|r| r.name.as_str()))?;
        unique("stream group", self.stream_groups.iter().map(|g| g.name.as_str()))?;
        unique("endpoint", self.endpoints.iter().map(|e| e.name.as_str()))?;

        for rule in &self.rules {
            let group = rule.target.as_ref().and_then(|t| t.streams.as_deref());
            if let Some(group) = group {
                if !self.stream_groups.iter().any(|g| g.name == group) {
                    return Err(Error::ConfigError(format!(
                        "rule {} refers to unknown stream group {group}",
                        rule.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Rule table for the policy
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.rules.iter().cloned(), self.stream_groups.iter().cloned())
    }
}

fn unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::ConfigError(format!("duplicate {what} {name}")));
        }
    }
    Ok(())
}
