//! Link rules and stream priority groups
//!
//! A [`LinkRule`] says which endpoints should be linked and where to: a
//! match section selecting the endpoints it applies to, a target section
//! selecting the endpoint to link them with, and a `keep` flag for links that
//! must survive other clients taking over the same target.
//!
//! Rules are consulted highest priority first; the first match wins.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::endpoint::{Direction, Endpoint};
use crate::error::{Error, Result};

/// Shell-style glob used for names and property values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamePattern {
    source: String,
    pattern: glob::Pattern,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| Error::ConfigError(format!("bad pattern {pattern:?}: {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            pattern: compiled,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.pattern.matches(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for NamePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for NamePattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<NamePattern> for String {
    fn from(value: NamePattern) -> Self {
        value.source
    }
}

/// Predicate over endpoints. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<NamePattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, NamePattern>,
}

impl EndpointMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, pattern: NamePattern) -> Self {
        self.name = Some(pattern);
        self
    }

    pub fn with_media_class(mut self, media_class: impl Into<String>) -> Self {
        self.media_class = Some(media_class.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, pattern: NamePattern) -> Self {
        self.properties.insert(key.into(), pattern);
        self
    }

    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        if let Some(name) = &self.name {
            if !name.matches(endpoint.name()) {
                return false;
            }
        }
        if let Some(class) = &self.media_class {
            if endpoint.media_class() != class {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if endpoint.direction() != direction {
                return false;
            }
        }
        self.properties.iter().all(|(key, pattern)| {
            endpoint
                .properties()
                .get(key)
                .map_or(false, |value| pattern.matches(value))
        })
    }
}

/// Where a matched endpoint should be linked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetMatch {
    #[serde(flatten)]
    pub endpoint: EndpointMatch,
    /// Stream of the target to link to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Stream group used to arbitrate between competing streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<String>,
}

impl TargetMatch {
    pub fn new(endpoint: EndpointMatch) -> Self {
        Self {
            endpoint,
            stream: None,
            streams: None,
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    pub fn with_stream_group(mut self, group: impl Into<String>) -> Self {
        self.streams = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRule {
    pub name: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub keep: bool,
    #[serde(rename = "match", default)]
    pub match_endpoint: EndpointMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetMatch>,
}

impl LinkRule {
    pub fn new(name: impl Into<String>, match_endpoint: EndpointMatch) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            keep: false,
            match_endpoint,
            target: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_target(mut self, target: TargetMatch) -> Self {
        self.target = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPriority {
    pub name: String,
    #[serde(default)]
    pub priority: u32,
}

/// Named set of stream priorities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamGroup {
    pub name: String,
    #[serde(default)]
    pub streams: Vec<StreamPriority>,
}

impl StreamGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streams: Vec::new(),
        }
    }

    pub fn with_stream(mut self, name: impl Into<String>, priority: u32) -> Self {
        self.streams.push(StreamPriority {
            name: name.into(),
            priority,
        });
        self
    }

    pub fn priority_of(&self, stream: &str) -> Option<u32> {
        self.streams
            .iter()
            .find(|s| s.name == stream)
            .map(|s| s.priority)
    }
}

/// Rule data the policy reads; parsing and storage live elsewhere
pub trait RuleLookup {
    /// First rule that applies to `endpoint`
    fn match_endpoint(&self, endpoint: &Endpoint) -> Option<Rc<LinkRule>>;

    fn stream_group(&self, name: &str) -> Option<&StreamGroup>;

    /// Priority of `stream` within `group`
    fn stream_priority(&self, group: &str, stream: &str) -> Option<u32> {
        self.stream_group(group)?.priority_of(stream)
    }
}

/// In-memory rule table
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rc<LinkRule>>,
    groups: Vec<StreamGroup>,
}

impl RuleSet {
    pub fn new(rules: impl IntoIterator<Item = LinkRule>, groups: impl IntoIterator<Item = StreamGroup>) -> Self {
        let mut rules: Vec<Rc<LinkRule>> = rules.into_iter().map(Rc::new).collect();
        // Stable: equal priorities keep declaration order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules,
            groups: groups.into_iter().collect(),
        }
    }

    pub fn rules(&self) -> &[Rc<LinkRule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleLookup for RuleSet {
    fn match_endpoint(&self, endpoint: &Endpoint) -> Option<Rc<LinkRule>> {
        self.rules
            .iter()
            .find(|rule| rule.match_endpoint.matches(endpoint))
            .cloned()
    }

    fn stream_group(&self, name: &str) -> Option<&StreamGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ObjectCollection;
    use crate::endpoint::EndpointDescriptor;
    use crate::main_loop::MainLoop;
    use crate::object::{InterfaceType, ManagedObject};
    use crate::remote::{LocalGraph, RemoteConnection};

    fn endpoint(desc: EndpointDescriptor) -> Endpoint {
        let graph = LocalGraph::new(&MainLoop::new(), &ObjectCollection::new());
        let remote: Rc<dyn RemoteConnection> = graph;
        let props = desc.to_properties();
        Endpoint::from_properties(ManagedObject::unbound(&remote, InterfaceType::Endpoint, 0), &props).unwrap()
    }

    #[test]
    fn test_match_by_glob_and_properties() {
        let ep = endpoint(
            EndpointDescriptor::new("firefox-stream-1", "Stream/Output/Audio", Direction::Output)
                .with_property("application.name", "Firefox"),
        );

        let matcher = EndpointMatch::new()
            .with_name("firefox-*".parse().unwrap())
            .with_media_class("Stream/Output/Audio")
            .with_property("application.name", "Fire*".parse().unwrap());
        assert!(matcher.matches(&ep));

        let wrong_direction = matcher.clone().with_direction(Direction::Input);
        assert!(!wrong_direction.matches(&ep));

        let missing_prop = EndpointMatch::new().with_property("media.role", "*".parse().unwrap());
        assert!(!missing_prop.matches(&ep));
    }

    #[test]
    fn test_highest_priority_rule_wins() {
        let ep = endpoint(EndpointDescriptor::new("player", "Stream/Output/Audio", Direction::Output));
        let generic = LinkRule::new("generic", EndpointMatch::new().with_media_class("Stream/Output/Audio"))
            .with_priority(1);
        let specific = LinkRule::new("player", EndpointMatch::new().with_name("player".parse().unwrap()))
            .with_priority(5);

        let rules = RuleSet::new([generic, specific], []);
        assert_eq!(rules.match_endpoint(&ep).map(|r| r.name.clone()), Some("player".to_string()));
    }

    #[test]
    fn test_stream_priority_lookup() {
        let rules = RuleSet::new(
            [],
            [StreamGroup::new("default")
                .with_stream("multimedia", 1)
                .with_stream("navigation", 5)],
        );
        assert_eq!(rules.stream_priority("default", "navigation"), Some(5));
        assert_eq!(rules.stream_priority("default", "alerts"), None);
        assert_eq!(rules.stream_priority("missing", "navigation"), None);
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        assert!(matches!(NamePattern::new("[unclosed"), Err(Error::ConfigError(_))));
    }
}
