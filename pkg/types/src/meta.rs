use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a namespaced object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`; a bare `name` lands in `default_ns`.
    pub fn parse(value: &str, default_ns: &str) -> Option<Self> {
        let value = value.trim();
        match value.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Some(Self::new(ns, name))
            }
            Some(_) => None,
            None if value.is_empty() => None,
            None => Some(Self::new(default_ns, value)),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A status condition as written on Gateway API objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            observed_generation,
            last_transition_time: Some(Utc::now()),
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// Same type, status, reason and generation; timestamps and messages are ignored.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.observed_generation == other.observed_generation
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Upsert a condition by type. The transition time is kept when the status
/// does not change. Returns false when nothing observable changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.same_state(&condition) && existing.message == condition.message {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_namespaced_name() {
        assert_eq!(
            NamespacedName::parse("ns1/web", "default"),
            Some(NamespacedName::new("ns1", "web"))
        );
        assert_eq!(
            NamespacedName::parse("web", "default"),
            Some(NamespacedName::new("default", "web"))
        );
        assert_eq!(NamespacedName::parse("", "default"), None);
        assert_eq!(NamespacedName::parse("/web", "default"), None);
        assert_eq!(NamespacedName::parse("a/b/c", "default"), None);
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_is_unchanged() {
        let mut conditions = Vec::new();
        let first = Condition::new("Accepted", ConditionStatus::True, "Accepted", "ok", 1);
        let stamp = first.last_transition_time;
        assert!(set_condition(&mut conditions, first));

        let again = Condition::new("Accepted", ConditionStatus::True, "Accepted", "ok", 1);
        assert!(!set_condition(&mut conditions, again));

        let bumped = Condition::new("Accepted", ConditionStatus::True, "Accepted", "ok", 2);
        assert!(set_condition(&mut conditions, bumped));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].observed_generation, 2);
        assert_eq!(conditions[0].last_transition_time, stamp);
    }

    #[test]
    fn condition_lookup() {
        let conditions = vec![
            Condition::new("Accepted", ConditionStatus::True, "Accepted", "", 0),
            Condition::new("Active", ConditionStatus::False, "Inactive", "", 0),
        ];
        assert!(is_condition_true(&conditions, "Accepted"));
        assert!(!is_condition_true(&conditions, "Active"));
        assert!(!is_condition_true(&conditions, "Programmed"));
    }
}
