use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder rendered for any metadata field that could not be collected.
pub const UNKNOWN: &str = "Unknown";

/// Offset of the timezone accessed-at timestamps are rendered in (Asia/Tokyo, no DST).
const DISPLAY_OFFSET_SECS: i32 = 9 * 3600;

/// Network and browser details reported by a visitor before logging in.
///
/// Every field is optional: the sink stores whatever the client sent and
/// absent fields are rendered as [`UNKNOWN`] when a notification is built.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, alias = "browser", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<String>,
}

impl VisitorMetadata {
    /// Builds a record out of an arbitrary JSON document.
    ///
    /// Non-object documents yield an empty record, and each field is read
    /// independently so one malformed field never discards the others.
    /// Numbers and booleans are kept in their textual form.
    pub fn from_value(value: &Value) -> Self {
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| value.get(*key).and_then(as_text))
                .filter(|text| !text.trim().is_empty())
        };
        Self {
            ipv4: field(&["ipv4"]),
            ipv6: field(&["ipv6"]),
            country: field(&["country"]),
            user_agent: field(&["userAgent", "browser"]),
            accessed_at: field(&["accessedAt"]),
        }
    }

    pub fn ipv4_or_unknown(&self) -> &str {
        or_unknown(&self.ipv4)
    }

    pub fn ipv6_or_unknown(&self) -> &str {
        or_unknown(&self.ipv6)
    }

    pub fn country_or_unknown(&self) -> &str {
        or_unknown(&self.country)
    }

    pub fn user_agent_or_unknown(&self) -> &str {
        or_unknown(&self.user_agent)
    }

    /// The reported access time, or the current time when the client sent none.
    pub fn accessed_at_or_now(&self) -> String {
        match &self.accessed_at {
            Some(accessed_at) => accessed_at.clone(),
            None => format_accessed_at(Utc::now()),
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn or_unknown(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or(UNKNOWN)
}

fn display_offset() -> FixedOffset {
    FixedOffset::east_opt(DISPLAY_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Renders `at` the way a ja-JP locale prints Tokyo local time, e.g. `2024/1/5 9:03:07`.
pub fn format_accessed_at(at: DateTime<Utc>) -> String {
    at.with_timezone(&display_offset())
        .format("%Y/%-m/%-d %-H:%M:%S")
        .to_string()
}
