//! Topic selectors for message routing
//!
//! A selector is a dot-separated path such as `v3.report.vulnerability`. On the
//! wire a selector can be bound to one message by appending `.` and the
//! message identifier.

use crate::error::{AgentBusError, FormatError, Result, ValidationError};
use crate::message::MessageIdentifier;
#[cfg(feature = "validation")]
use once_cell::sync::Lazy;
#[cfg(feature = "validation")]
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SELECTOR_PATTERN: &str = r"^[\w\-:=]+(\.[\w\-:=]+)*$";

#[cfg(feature = "validation")]
static SELECTOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(SELECTOR_PATTERN).expect("selector pattern is a valid regex"));

/// Validates a dot-separated selector: non-empty segments of word characters,
/// `-`, `:` or `=`.
fn is_valid_selector(value: &str) -> bool {
    #[cfg(feature = "validation")]
    {
        SELECTOR_RE.is_match(value)
    }
    #[cfg(not(feature = "validation"))]
    {
        !value.is_empty()
            && value.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '=')
            })
    }
}

/// Hierarchical topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicSelector(String);

impl TopicSelector {
    /// Create a new selector with validation
    ///
    /// # Examples
    /// ```
    /// use agentbus_core::TopicSelector;
    ///
    /// let selector = TopicSelector::new("v3.report.vulnerability").unwrap();
    /// assert_eq!(selector.segments().count(), 3);
    /// assert!(TopicSelector::new("v3..report").is_err());
    /// ```
    pub fn new(selector: impl Into<String>) -> Result<Self> {
        let selector = selector.into();
        if !is_valid_selector(&selector) {
            return Err(AgentBusError::Validation(ValidationError::InvalidFormat {
                field: "selector".to_string(),
                value: selector,
                expected_format: SELECTOR_PATTERN.to_string(),
            }));
        }
        Ok(Self(selector))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// True when `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &TopicSelector) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(prefix.as_str()) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'.'))
    }

    /// Binds this selector to one message.
    pub fn bind(&self, identifier: &MessageIdentifier) -> BoundSelector {
        BoundSelector {
            base: self.clone(),
            identifier: identifier.clone(),
        }
    }
}

impl fmt::Display for TopicSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicSelector {
    type Err = AgentBusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TopicSelector {
    type Error = AgentBusError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TopicSelector> for String {
    fn from(selector: TopicSelector) -> Self {
        selector.0
    }
}

impl AsRef<str> for TopicSelector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A selector with a message identifier appended: `<base>.<identifier>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSelector {
    base: TopicSelector,
    identifier: MessageIdentifier,
}

impl BoundSelector {
    pub fn base(&self) -> &TopicSelector {
        &self.base
    }

    pub fn identifier(&self) -> &MessageIdentifier {
        &self.identifier
    }

    /// Splits `<base>.<identifier>` on the last dot.
    pub fn split(bound: &str) -> std::result::Result<(&str, &str), FormatError> {
        bound
            .rsplit_once('.')
            .filter(|(base, identifier)| !base.is_empty() && !identifier.is_empty())
            .ok_or_else(|| FormatError::MissingIdentifier {
                selector: bound.to_string(),
            })
    }
}

impl fmt::Display for BoundSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.base, self.identifier)
    }
}

impl FromStr for BoundSelector {
    type Err = AgentBusError;

    fn from_str(s: &str) -> Result<Self> {
        let (base, identifier) = Self::split(s)?;
        Ok(Self {
            base: TopicSelector::new(base)?,
            identifier: identifier.parse()?,
        })
    }
}
