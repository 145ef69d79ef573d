//! Status and urgency taxonomy.
//!
//! Tasks carry two vocabularies for the same state: the canonical codes this
//! crate writes back to the store, and localized display labels (current and
//! historical) that older records may still hold. [`Taxonomy`] maps any known
//! label onto exactly one canonical value and renders canonical values back
//! into a locale. Unknown labels pass through unchanged so the board can still
//! render them; they are logged, never rejected.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// Canonical task status. Board columns follow declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Todo,
    InProgress,
    Done,
}

/// Canonical task urgency, ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalUrgency {
    Low,
    Medium,
    High,
}

/// Display language for labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    #[default]
    He,
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Locale::En),
            "he" | "hebrew" | "iw" => Ok(Locale::He),
            other => Err(Error::InvalidArgument(format!(
                "unknown locale '{other}' (expected en|he)"
            ))),
        }
    }
}

/// Shared behaviour of the canonical enums.
pub trait Canonical: Copy + Eq + fmt::Debug + 'static {
    /// Every value, in board/rank order.
    const ALL: &'static [Self];

    /// Code written to the store.
    fn code(self) -> &'static str;

    /// Current display label.
    fn label(self, locale: Locale) -> &'static str;
}

impl Canonical for CanonicalStatus {
    const ALL: &'static [Self] = &[
        CanonicalStatus::Todo,
        CanonicalStatus::InProgress,
        CanonicalStatus::Done,
    ];

    fn code(self) -> &'static str {
        match self {
            CanonicalStatus::Todo => "todo",
            CanonicalStatus::InProgress => "in_progress",
            CanonicalStatus::Done => "done",
        }
    }

    fn label(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (CanonicalStatus::Todo, Locale::En) => "To Do",
            (CanonicalStatus::InProgress, Locale::En) => "In Progress",
            (CanonicalStatus::Done, Locale::En) => "Done",
            (CanonicalStatus::Todo, Locale::He) => "לביצוע",
            (CanonicalStatus::InProgress, Locale::He) => "בתהליך",
            (CanonicalStatus::Done, Locale::He) => "הושלם",
        }
    }
}

impl Canonical for CanonicalUrgency {
    const ALL: &'static [Self] = &[
        CanonicalUrgency::Low,
        CanonicalUrgency::Medium,
        CanonicalUrgency::High,
    ];

    fn code(self) -> &'static str {
        match self {
            CanonicalUrgency::Low => "low",
            CanonicalUrgency::Medium => "medium",
            CanonicalUrgency::High => "high",
        }
    }

    fn label(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (CanonicalUrgency::Low, Locale::En) => "Low",
            (CanonicalUrgency::Medium, Locale::En) => "Medium",
            (CanonicalUrgency::High, Locale::En) => "High",
            (CanonicalUrgency::Low, Locale::He) => "נמוכה",
            (CanonicalUrgency::Medium, Locale::He) => "בינונית",
            (CanonicalUrgency::High, Locale::He) => "גבוהה",
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Display for CanonicalUrgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of mapping a stored label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mapped<T> {
    Known(T),
    /// Unrecognized label, kept verbatim.
    PassThrough(String),
}

impl<T: Canonical> Mapped<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            Mapped::Known(value) => Some(*value),
            Mapped::PassThrough(_) => None,
        }
    }

    /// Canonical code, or the raw label for pass-through values.
    pub fn as_str(&self) -> &str {
        match self {
            Mapped::Known(value) => value.code(),
            Mapped::PassThrough(raw) => raw.as_str(),
        }
    }

    pub fn display(&self, locale: Locale) -> &str {
        match self {
            Mapped::Known(value) => value.label(locale),
            Mapped::PassThrough(raw) => raw.as_str(),
        }
    }
}

impl<T: Canonical> Serialize for Mapped<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

const STATUS_ALIASES: &[(&str, CanonicalStatus)] = &[
    ("todo", CanonicalStatus::Todo),
    ("to_do", CanonicalStatus::Todo),
    ("open", CanonicalStatus::Todo),
    ("new", CanonicalStatus::Todo),
    ("pending", CanonicalStatus::Todo),
    ("לביצוע", CanonicalStatus::Todo),
    ("חדש", CanonicalStatus::Todo),
    ("פתוח", CanonicalStatus::Todo),
    ("in_progress", CanonicalStatus::InProgress),
    ("inprogress", CanonicalStatus::InProgress),
    ("doing", CanonicalStatus::InProgress),
    ("active", CanonicalStatus::InProgress),
    ("started", CanonicalStatus::InProgress),
    ("בתהליך", CanonicalStatus::InProgress),
    ("בטיפול", CanonicalStatus::InProgress),
    ("done", CanonicalStatus::Done),
    ("completed", CanonicalStatus::Done),
    ("complete", CanonicalStatus::Done),
    ("closed", CanonicalStatus::Done),
    ("finished", CanonicalStatus::Done),
    ("הושלם", CanonicalStatus::Done),
    ("בוצע", CanonicalStatus::Done),
    ("סגור", CanonicalStatus::Done),
];

const URGENCY_ALIASES: &[(&str, CanonicalUrgency)] = &[
    ("low", CanonicalUrgency::Low),
    ("נמוכה", CanonicalUrgency::Low),
    ("נמוך", CanonicalUrgency::Low),
    ("medium", CanonicalUrgency::Medium),
    ("normal", CanonicalUrgency::Medium),
    ("בינונית", CanonicalUrgency::Medium),
    ("בינוני", CanonicalUrgency::Medium),
    ("רגילה", CanonicalUrgency::Medium),
    ("high", CanonicalUrgency::High),
    ("urgent", CanonicalUrgency::High),
    ("critical", CanonicalUrgency::High),
    ("גבוהה", CanonicalUrgency::High),
    ("גבוה", CanonicalUrgency::High),
    ("דחוף", CanonicalUrgency::High),
    ("דחופה", CanonicalUrgency::High),
];

/// Case-folds and unifies separators so `In Progress`, `in-progress` and
/// `IN_PROGRESS` share a key.
fn normalize_label(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| match ch {
            '-' | ' ' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Bidirectional label table.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    statuses: HashMap<String, CanonicalStatus>,
    urgencies: HashMap<String, CanonicalUrgency>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        let mut statuses = HashMap::new();
        for (alias, status) in STATUS_ALIASES {
            statuses.insert(normalize_label(alias), *status);
        }
        for status in CanonicalStatus::ALL {
            for locale in [Locale::En, Locale::He] {
                statuses.insert(normalize_label(status.label(locale)), *status);
            }
        }

        let mut urgencies = HashMap::new();
        for (alias, urgency) in URGENCY_ALIASES {
            urgencies.insert(normalize_label(alias), *urgency);
        }
        for urgency in CanonicalUrgency::ALL {
            for locale in [Locale::En, Locale::He] {
                urgencies.insert(normalize_label(urgency.label(locale)), *urgency);
            }
        }

        Self {
            statuses,
            urgencies,
        }
    }
}

impl Taxonomy {
    /// Built-in table extended with configured aliases. Each alias maps a
    /// label to a canonical code; unknown codes are a configuration error.
    pub fn with_aliases(
        status_aliases: &HashMap<String, String>,
        urgency_aliases: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut taxonomy = Self::default();
        for (alias, code) in status_aliases {
            let status = parse_code::<CanonicalStatus>(code).ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "taxonomy.status_aliases: '{alias}' maps to unknown status '{code}'"
                ))
            })?;
            taxonomy.add_status_alias(alias, status)?;
        }
        for (alias, code) in urgency_aliases {
            let urgency = parse_code::<CanonicalUrgency>(code).ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "taxonomy.urgency_aliases: '{alias}' maps to unknown urgency '{code}'"
                ))
            })?;
            taxonomy.add_urgency_alias(alias, urgency)?;
        }
        Ok(taxonomy)
    }

    pub fn add_status_alias(&mut self, alias: &str, status: CanonicalStatus) -> Result<()> {
        let key = normalize_label(alias);
        if key.is_empty() {
            return Err(Error::InvalidConfig(
                "taxonomy.status_aliases cannot include empty labels".to_string(),
            ));
        }
        self.statuses.insert(key, status);
        Ok(())
    }

    pub fn add_urgency_alias(&mut self, alias: &str, urgency: CanonicalUrgency) -> Result<()> {
        let key = normalize_label(alias);
        if key.is_empty() {
            return Err(Error::InvalidConfig(
                "taxonomy.urgency_aliases cannot include empty labels".to_string(),
            ));
        }
        self.urgencies.insert(key, urgency);
        Ok(())
    }

    pub fn status(&self, label: &str) -> Mapped<CanonicalStatus> {
        match self.statuses.get(&normalize_label(label)) {
            Some(status) => Mapped::Known(*status),
            None => {
                tracing::warn!(label, "unrecognized task status label");
                Mapped::PassThrough(label.to_string())
            }
        }
    }

    pub fn urgency(&self, label: &str) -> Mapped<CanonicalUrgency> {
        match self.urgencies.get(&normalize_label(label)) {
            Some(urgency) => Mapped::Known(*urgency),
            None => {
                tracing::warn!(label, "unrecognized task urgency label");
                Mapped::PassThrough(label.to_string())
            }
        }
    }

    /// Strict variant for user input: unknown labels are rejected.
    pub fn parse_status(&self, label: &str) -> Result<CanonicalStatus> {
        self.statuses
            .get(&normalize_label(label))
            .copied()
            .ok_or_else(|| Error::validation("status", format!("unknown status '{label}'")))
    }

    pub fn parse_urgency(&self, label: &str) -> Result<CanonicalUrgency> {
        self.urgencies
            .get(&normalize_label(label))
            .copied()
            .ok_or_else(|| Error::validation("urgency", format!("unknown urgency '{label}'")))
    }

    pub fn display_status(&self, status: CanonicalStatus, locale: Locale) -> &'static str {
        status.label(locale)
    }

    pub fn display_urgency(&self, urgency: CanonicalUrgency, locale: Locale) -> &'static str {
        urgency.label(locale)
    }

    /// Every label that maps to `status`, sorted.
    pub fn status_aliases(&self, status: CanonicalStatus) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .statuses
            .iter()
            .filter(|(_, value)| **value == status)
            .map(|(key, _)| key.clone())
            .collect();
        aliases.sort();
        aliases
    }

    pub fn urgency_aliases(&self, urgency: CanonicalUrgency) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .urgencies
            .iter()
            .filter(|(_, value)| **value == urgency)
            .map(|(key, _)| key.clone())
            .collect();
        aliases.sort();
        aliases
    }
}

fn parse_code<T: Canonical>(code: &str) -> Option<T> {
    let key = normalize_label(code);
    T::ALL.iter().copied().find(|value| value.code() == key)
}

/// Parse a canonical code (`todo`, `in_progress`, ...) without aliases.
pub fn status_from_code(code: &str) -> Option<CanonicalStatus> {
    parse_code(code)
}
