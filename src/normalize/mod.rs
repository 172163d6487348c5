//! Record normalization: raw table rows into download tasks.
//!
//! Each record's media field is classified once ([`FieldValue`]) and turned into
//! zero or more tasks. Hyperlinks and URL text become direct tasks straight away;
//! attachment entries become [`PendingAttachment`]s that still need their storage
//! token resolved (see [`crate::resolver`]).

mod field;

pub use field::{FieldValue, ListItem, Record};

use crate::types::{DEFAULT_EXTENSION, ParseStats, Task};
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("digit-run pattern is valid"));

/// Longest path suffix still accepted as an extension (exclusive)
const MAX_EXTENSION_LEN: usize = 5;

/// Which fields to read and which records to keep
#[derive(Clone, Debug, Default)]
pub struct FieldMapping {
    /// Field holding the media reference
    pub field_video: String,
    /// Field holding the script number, if configured
    pub field_script: Option<String>,
    /// Minimum script number; records below it are skipped
    pub start_script_no: Option<String>,
}

/// An attachment entry waiting for its storage token to be resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAttachment {
    /// Storage token
    pub file_token: String,
    /// Task base filename (already index-suffixed for multi-file records)
    pub filename: String,
    /// Extension taken from the attachment's display name
    pub extension: String,
    /// Owning record id
    pub unique_id: String,
}

impl PendingAttachment {
    /// Turn into a task once the token's URL is known
    pub fn into_task(self, url: String) -> Task {
        Task::with_url(url, self.filename, self.extension, self.unique_id)
    }
}

/// Result of normalizing one batch of records
#[derive(Clone, Debug, Default)]
pub struct Normalized {
    /// Tasks with a direct URL, in record order
    pub tasks: Vec<Task>,
    /// Attachment entries still to be resolved, in record order
    pub pending: Vec<PendingAttachment>,
    /// Counters for the run log
    pub stats: ParseStats,
    /// Set when the media field was missing from the first record
    pub missing_field: Option<MissingField>,
}

/// Diagnostic for a media field name that does not exist in the table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingField {
    /// The configured (wrong) field name
    pub field: String,
    /// Field names present on the first record
    pub available: Vec<String>,
}

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "field \"{}\" not found; available fields: [ {} ]",
            self.field,
            self.available.join(", ")
        )
    }
}

/// Numeric value of a script number: its last run of digits, 0 if there is none
///
/// ```
/// use bitable_dl::normalize::script_number;
///
/// assert_eq!(script_number("AITSfym000570"), 570);
/// assert_eq!(script_number("LOT7-0042"), 42);
/// assert_eq!(script_number("none"), 0);
/// ```
pub fn script_number(script_no: &str) -> u64 {
    DIGIT_RUN
        .find_iter(script_no)
        .last()
        .map(|m| {
            m.as_str().bytes().fold(0u64, |acc, digit| {
                acc.saturating_mul(10)
                    .saturating_add(u64::from(digit - b'0'))
            })
        })
        .unwrap_or(0)
}

/// Extension from a hyperlink's URL path, or the default
///
/// The last `.` segment of the path is used when it is short, stays within the
/// final path segment and is not the whole path. Query strings and fragments
/// are ignored.
pub fn link_extension(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return DEFAULT_EXTENSION.to_string();
    };
    let path = parsed.path();
    match path.rsplit('.').next() {
        Some(candidate)
            if !candidate.is_empty()
                && candidate.len() < MAX_EXTENSION_LEN
                && !candidate.contains('/')
                && candidate != path =>
        {
            candidate.to_string()
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Extension from an attachment's display name, or the default
fn name_extension(name: Option<&str>) -> String {
    name.and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_string()
}

/// Normalize records into direct tasks and pending attachments
///
/// Returns an empty result with [`Normalized::missing_field`] set when the media
/// field is not among the first record's fields.
pub fn normalize(records: &[Record], mapping: &FieldMapping) -> Normalized {
    let mut out = Normalized::default();

    if let Some(first) = records.first()
        && !first.fields.contains_key(&mapping.field_video)
    {
        let mut available: Vec<String> = first.fields.keys().cloned().collect();
        available.sort();
        let missing = MissingField {
            field: mapping.field_video.clone(),
            available,
        };
        tracing::error!(%missing, "media field not found in table");
        out.missing_field = Some(missing);
        return out;
    }

    let script_field = mapping.field_script.as_deref().filter(|f| !f.is_empty());
    let start_number = mapping
        .start_script_no
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|_| script_field.is_some())
        .map(|s| {
            let number = script_number(s);
            tracing::info!(start_script_no = s, start_number = number, "filtering records >= {}", number);
            number
        });

    for record in records {
        let script_text = script_field
            .and_then(|f| record.field(f))
            .and_then(FieldValue::first_text)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let (Some(start), Some(script_no)) = (start_number, script_text) {
            let current = script_number(script_no);
            if current < start {
                tracing::debug!(
                    record_id = %record.record_id,
                    script_no,
                    current,
                    start,
                    "record below start script number"
                );
                out.stats.script_filtered += 1;
                continue;
            }
        }

        let name_base = script_text.unwrap_or(&record.record_id).to_string();

        let Some(media) = record.field(&mapping.field_video).filter(|v| !v.is_empty()) else {
            out.stats.skipped += 1;
            continue;
        };

        match media {
            FieldValue::Link { link, .. } => {
                out.stats.links += 1;
                let extension = link_extension(link);
                tracing::debug!(record_id = %record.record_id, filename = %name_base, %extension, "parsed hyperlink");
                out.tasks.push(Task::with_url(
                    link.clone(),
                    name_base,
                    extension,
                    record.record_id.clone(),
                ));
            }
            FieldValue::Text(text) if text.starts_with("http") => {
                out.stats.texts += 1;
                tracing::debug!(record_id = %record.record_id, filename = %name_base, "parsed URL text");
                out.tasks.push(Task::with_url(
                    text.clone(),
                    name_base,
                    DEFAULT_EXTENSION,
                    record.record_id.clone(),
                ));
            }
            FieldValue::List(items) => {
                let many = items.len() > 1;
                for (index, item) in items.iter().enumerate() {
                    let Some(token) = item.file_token.as_deref().filter(|t| !t.is_empty()) else {
                        continue;
                    };
                    let filename = if many {
                        format!("{}_{}", name_base, index + 1)
                    } else {
                        name_base.clone()
                    };
                    out.stats.attachments += 1;
                    tracing::debug!(
                        record_id = %record.record_id,
                        %filename,
                        file_token = %crate::utils::mask_sensitive(token, 4, 4),
                        "parsed attachment"
                    );
                    out.pending.push(PendingAttachment {
                        file_token: token.to_string(),
                        filename,
                        extension: name_extension(item.name.as_deref()),
                        unique_id: record.record_id.clone(),
                    });
                }
            }
            FieldValue::Text(_) | FieldValue::Unknown => {
                tracing::debug!(record_id = %record.record_id, "unrecognized media field shape");
                out.stats.unrecognized += 1;
            }
        }
    }

    if out.stats.script_filtered > 0 {
        tracing::info!(
            skipped = out.stats.script_filtered,
            "skipped records below the start script number"
        );
    }
    tracing::debug!(
        links = out.stats.links,
        texts = out.stats.texts,
        attachments = out.stats.attachments,
        skipped = out.stats.skipped,
        unrecognized = out.stats.unrecognized,
        "records normalized"
    );

    out
}
