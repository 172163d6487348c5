//! Field payloads, classified once when records are ingested.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// One attachment descriptor from an attachment-list field
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListItem {
    /// Storage token to resolve into a download URL
    pub file_token: Option<String>,
    /// Display name, used for the extension
    pub name: Option<String>,
    /// Text payload (rich-text and multi-select cells are lists of these)
    pub text: Option<String>,
}

/// A field value with its shape decided up front
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// Hyperlink object (`{"link": ..., "text": ...}`)
    Link {
        /// Target URL
        link: String,
        /// Display text, if any
        text: Option<String>,
    },
    /// Plain string, text object or number
    Text(String),
    /// Ordered list of attachments or text segments
    List(Vec<ListItem>),
    /// Anything else (booleans, objects without a known key)
    Unknown,
}

impl FieldValue {
    /// Classify a raw JSON payload
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Number(n) => FieldValue::Text(n.to_string()),
            Value::Object(map) => {
                if let Some(link) = map.get("link").and_then(Value::as_str) {
                    FieldValue::Link {
                        link: link.to_string(),
                        text: map.get("text").and_then(Value::as_str).map(str::to_string),
                    }
                } else if let Some(text) = map.get("text").and_then(Value::as_str) {
                    FieldValue::Text(text.to_string())
                } else {
                    FieldValue::Unknown
                }
            }
            Value::Array(items) => FieldValue::List(items.iter().map(list_item).collect()),
            Value::Null | Value::Bool(_) => FieldValue::Unknown,
        }
    }

    /// Whether the cell holds nothing worth looking at
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Link { link, .. } => link.is_empty(),
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Unknown => false,
        }
    }

    /// First text value: the string itself, a text object's text, or a list's first entry
    pub fn first_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Link { text, link } => Some(text.as_deref().unwrap_or(link)),
            FieldValue::List(items) => items.first().and_then(|item| item.text.as_deref()),
            FieldValue::Unknown => None,
        }
    }
}

fn list_item(value: &Value) -> ListItem {
    match value {
        Value::Object(map) => {
            let string = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
            ListItem {
                file_token: string("file_token"),
                name: string("name"),
                text: string("text"),
            }
        }
        Value::String(s) => ListItem {
            text: Some(s.clone()),
            ..Default::default()
        },
        _ => ListItem::default(),
    }
}

/// One table row with its fields classified
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// System-assigned record id
    pub record_id: String,
    /// Field name to classified value
    pub fields: HashMap<String, FieldValue>,
}

impl Record {
    /// Build a record from its raw JSON fields
    ///
    /// Null cells are dropped so they read the same as absent ones.
    pub fn from_raw(record_id: impl Into<String>, fields: &serde_json::Map<String, Value>) -> Self {
        Self {
            record_id: record_id.into(),
            fields: fields
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(name, value)| (name.clone(), FieldValue::from_json(value)))
                .collect(),
        }
    }

    /// Field value by name
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

#[derive(Deserialize)]
struct RawRecord {
    record_id: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawRecord::deserialize(deserializer)?;
        Ok(Record::from_raw(raw.record_id, &raw.fields))
    }
}
