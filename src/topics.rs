//! Topic filters, topic names and the ordered topic interest set
//!
//! Topics are slash-delimited hierarchies (`<domain>/<role>/<category>/<action>`).
//! Filters may use `+` for exactly one level and `#` for the remainder.

use crate::message::QoS;
use thiserror::Error;

/// Topic validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic contains a NUL character: {0:?}")]
    NulCharacter(String),
    #[error("Multi-level wildcard '#' must be the last level on its own: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("Single-level wildcard '+' must occupy a whole level: {0}")]
    MisplacedSingleLevelWildcard(String),
    #[error("Wildcards are not allowed in topic names used for publishing: {0}")]
    WildcardInTopicName(String),
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter(filter.to_string()));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a concrete topic name (publish target)
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter(topic.to_string()));
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::WildcardInTopicName(topic.to_string()));
    }
    Ok(())
}

/// Check whether a concrete topic matches a (valid) filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Topics starting with '$' are never matched by a leading wildcard
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// One entry of the topic interest set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    pub filter: String,
    /// Overrides the connection's default QoS when set
    pub qos: Option<QoS>,
}

impl TopicSubscription {
    pub fn effective_qos(&self, default_qos: QoS) -> QoS {
        self.qos.unwrap_or(default_qos)
    }
}

/// Ordered topic interest set.
///
/// Insertion order is the subscription and resubscription order and is kept
/// verbatim, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicInterest {
    entries: Vec<TopicSubscription>,
}

impl TopicInterest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plain filters, all using the connection default QoS
    pub fn from_filters<I, S>(filters: I) -> Result<Self, TopicError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        filters
            .into_iter()
            .try_fold(Self::new(), |interest, filter| interest.with(filter, None))
    }

    /// Append a filter, validating it first
    pub fn with(mut self, filter: impl Into<String>, qos: Option<QoS>) -> Result<Self, TopicError> {
        let filter = filter.into();
        validate_topic_filter(&filter)?;
        self.entries.push(TopicSubscription { filter, qos });
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicSubscription> {
        self.entries.iter()
    }

    pub fn filters(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.filter.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
