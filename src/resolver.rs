//! Attachment resolution: storage tokens into download tasks.

use crate::normalize::PendingAttachment;
use crate::source::{AccessToken, AttachmentResolver};
use crate::types::Task;
use std::collections::{HashMap, HashSet};

/// Tokens sent per resolver request
pub const RESOLVE_BATCH_SIZE: usize = 50;

/// Resolve pending attachments into tasks
///
/// Distinct tokens are sent in sequential batches of [`RESOLVE_BATCH_SIZE`]. A
/// failed batch is logged and its attachments produce no tasks; the other
/// batches are unaffected. Each resolved URL is attached to every pending entry
/// citing its token. The returned tasks keep the order of `pending`.
pub async fn resolve_attachments(
    resolver: &dyn AttachmentResolver,
    token: &AccessToken,
    pending: Vec<PendingAttachment>,
) -> Vec<Task> {
    if pending.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let tokens: Vec<String> = pending
        .iter()
        .filter(|p| seen.insert(p.file_token.as_str()))
        .map(|p| p.file_token.clone())
        .collect();

    let batches = tokens.len().div_ceil(RESOLVE_BATCH_SIZE);
    tracing::debug!(tokens = tokens.len(), batches, "resolving attachment tokens");

    let mut urls: HashMap<String, String> = HashMap::with_capacity(tokens.len());
    for (batch, chunk) in tokens.chunks(RESOLVE_BATCH_SIZE).enumerate() {
        match resolver.resolve(token, chunk).await {
            Ok(resolved) => {
                tracing::debug!(batch, requested = chunk.len(), resolved = resolved.len(), "resolved batch");
                let requested: HashSet<&str> = chunk.iter().map(String::as_str).collect();
                for item in resolved {
                    if requested.contains(item.file_token.as_str()) {
                        urls.insert(item.file_token, item.url);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(batch, tokens = chunk.len(), error = %e, "attachment batch failed, dropping its files");
            }
        }
    }

    let total = pending.len();
    let tasks: Vec<Task> = pending
        .into_iter()
        .filter_map(|p| {
            let url = urls.get(&p.file_token)?.clone();
            Some(p.into_task(url))
        })
        .collect();

    if tasks.len() < total {
        tracing::warn!(
            resolved = tasks.len(),
            total,
            "some attachments could not be resolved"
        );
    }

    tasks
}
