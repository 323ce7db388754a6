//! State Variable Keys
//!
//! Every state variable in the world is identified by a [`StateKey`]: who it
//! belongs to, what feature it is, and whether it refers to the value before
//! or after the current step. The pre/post split is what keeps the dependency
//! graph acyclic: a dynamics function reads pre-tagged values and writes a
//! post-tagged one.
//!
//! # Example
//!
//! ```
//! use sim_model::StateKey;
//!
//! let owner = StateKey::entity("alaska", "owner");
//! assert_eq!(owner.to_string(), "alaska.owner");
//! assert_eq!(owner.to_post().to_string(), "alaska.owner'");
//! assert_eq!(owner.to_post().to_pre(), owner);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who a state variable belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyScope {
    /// A global feature of the world itself (e.g. the current phase)
    World,
    /// A feature of a single named entity
    Entity(String),
    /// A binary feature relating a subject entity to an object entity
    Relation { subject: String, object: String },
}

/// Temporal tag: the value before or after the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    /// Value at the start of the step
    Pre,
    /// Value once the step has been applied
    Post,
}

/// Identifier for one state variable.
///
/// Two keys with the same scope and feature but different tags are distinct
/// variables. Keys serialize through their string form so they can be used as
/// JSON map keys.
///
/// Feature and entity names must not contain `.`, `>`, or a trailing `'`;
/// those characters carry structure in the string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct StateKey {
    pub scope: KeyScope,
    pub feature: String,
    pub tag: Tag,
}

impl StateKey {
    /// Creates a pre-tagged key for a feature of a named entity.
    pub fn entity(name: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            scope: KeyScope::Entity(name.into()),
            feature: feature.into(),
            tag: Tag::Pre,
        }
    }

    /// Creates a pre-tagged key for a global world feature.
    pub fn world(feature: impl Into<String>) -> Self {
        Self {
            scope: KeyScope::World,
            feature: feature.into(),
            tag: Tag::Pre,
        }
    }

    /// Creates a pre-tagged key for a binary relation between two entities.
    pub fn relation(
        subject: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            scope: KeyScope::Relation {
                subject: subject.into(),
                object: object.into(),
            },
            feature: relation.into(),
            tag: Tag::Pre,
        }
    }

    /// Returns the post-tagged form of this key, scope and feature untouched.
    pub fn to_post(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            feature: self.feature.clone(),
            tag: Tag::Post,
        }
    }

    /// Returns the pre-tagged form of this key, scope and feature untouched.
    pub fn to_pre(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            feature: self.feature.clone(),
            tag: Tag::Pre,
        }
    }

    pub fn is_post(&self) -> bool {
        self.tag == Tag::Post
    }

    /// Returns the owning entity name, if the key has one.
    ///
    /// Relation keys report their subject, matching how the graph attributes
    /// relation nodes.
    pub fn owner(&self) -> Option<&str> {
        match &self.scope {
            KeyScope::World => None,
            KeyScope::Entity(name) => Some(name),
            KeyScope::Relation { subject, .. } => Some(subject),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            KeyScope::World => write!(f, "{}", self.feature)?,
            KeyScope::Entity(name) => write!(f, "{}.{}", name, self.feature)?,
            KeyScope::Relation { subject, object } => {
                write!(f, "{}>{}.{}", subject, object, self.feature)?
            }
        }
        if self.tag == Tag::Post {
            write!(f, "'")?;
        }
        Ok(())
    }
}

/// Error type for parsing a StateKey from its string form.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseKeyError {
    InvalidFormat(String),
    EmptyComponent(String),
}

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseKeyError::InvalidFormat(s) => {
                write!(f, "invalid state key: '{}'", s)
            }
            ParseKeyError::EmptyComponent(s) => {
                write!(f, "state key with empty component: '{}'", s)
            }
        }
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for StateKey {
    type Err = ParseKeyError;

    /// Parses a key from strings like `alaska.owner`, `phase`, or
    /// `player1>alaska.ally'`. A trailing apostrophe marks the post tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, tag) = match s.strip_suffix('\'') {
            Some(body) => (body, Tag::Post),
            None => (s, Tag::Pre),
        };
        let (scope, feature) = match body.rsplit_once('.') {
            None => (KeyScope::World, body),
            Some((prefix, feature)) => {
                let scope = match prefix.split_once('>') {
                    None => KeyScope::Entity(prefix.to_string()),
                    Some((subject, object)) => {
                        if subject.is_empty() || object.is_empty() {
                            return Err(ParseKeyError::EmptyComponent(s.to_string()));
                        }
                        KeyScope::Relation {
                            subject: subject.to_string(),
                            object: object.to_string(),
                        }
                    }
                };
                (scope, feature)
            }
        };
        if feature.is_empty() {
            return Err(ParseKeyError::EmptyComponent(s.to_string()));
        }
        if let KeyScope::Entity(name) = &scope {
            if name.is_empty() {
                return Err(ParseKeyError::EmptyComponent(s.to_string()));
            }
        }
        Ok(StateKey {
            scope,
            feature: feature.to_string(),
            tag,
        })
    }
}

impl From<StateKey> for String {
    fn from(key: StateKey) -> String {
        key.to_string()
    }
}

impl TryFrom<String> for StateKey {
    type Error = ParseKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
