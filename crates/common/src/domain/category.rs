use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Northbound message class a consumer subscribes to
///
/// Ordering is significant: registration attempts are issued and reported
/// in `Telemetry`, `Event` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageCategory {
    Telemetry,
    Event,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Telemetry => "telemetry",
            MessageCategory::Event => "event",
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured selection of message categories (`telemetry`, `event` or `all`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySelector {
    Telemetry,
    Event,
    All,
}

impl CategorySelector {
    /// Parse a configured message type, ignoring case and surrounding whitespace.
    ///
    /// Returns `None` for anything other than `telemetry`, `event` or `all`.
    pub fn parse(message_type: &str) -> Option<Self> {
        match message_type.trim().to_ascii_lowercase().as_str() {
            "telemetry" => Some(CategorySelector::Telemetry),
            "event" => Some(CategorySelector::Event),
            "all" => Some(CategorySelector::All),
            _ => None,
        }
    }

    pub fn categories(&self) -> BTreeSet<MessageCategory> {
        match self {
            CategorySelector::Telemetry => BTreeSet::from([MessageCategory::Telemetry]),
            CategorySelector::Event => BTreeSet::from([MessageCategory::Event]),
            CategorySelector::All => {
                BTreeSet::from([MessageCategory::Telemetry, MessageCategory::Event])
            }
        }
    }
}

/// Resolve a configured message type to the set of enabled categories.
///
/// An unrecognised message type yields an empty set.
pub fn enabled_categories(message_type: &str) -> BTreeSet<MessageCategory> {
    CategorySelector::parse(message_type)
        .map(|selector| selector.categories())
        .unwrap_or_default()
}
