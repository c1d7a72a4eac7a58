//! In-memory palette search over registered command kinds.
//!
//! Queries run directly against the registry; there is no background index.
//! Each descriptor contributes a haystack built from its kind, display name,
//! icon key and summary, and the fuzzy scorer from `stepflow-util` ranks it.

use std::borrow::Cow;

use stepflow_util::fuzzy_score;

use crate::{CommandDescriptor, CommandRegistry};

const COVERAGE_SCORE_MULTIPLIER: i64 = 20;
const EXACT_KIND_MATCH_SCORE_BONUS: i64 = 50;
const PREFIX_KIND_MATCH_SCORE_BONUS: i64 = 25;

/// One ranked palette row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteEntry {
    pub kind: String,
    pub display_name: String,
    pub icon_key: Option<String>,
    pub score: i64,
}

impl CommandRegistry {
    /// Ranks registered kinds against `query`, best first, keeping at most `limit` rows.
    ///
    /// A blank query lists every kind in registration order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<PaletteEntry> {
        let trimmed_query = query.trim();
        if trimmed_query.is_empty() {
            return self.all().take(limit).map(|descriptor| palette_entry(descriptor.as_ref(), 0)).collect();
        }

        let query_lower = trimmed_query.to_ascii_lowercase();
        let query_tokens = tokenize_query(trimmed_query);

        let mut scored: Vec<PaletteEntry> = self
            .all()
            .filter_map(|descriptor| {
                score_descriptor(descriptor.as_ref(), &query_lower, &query_tokens).map(|score| palette_entry(descriptor.as_ref(), score))
            })
            .collect();

        scored.sort_by(|left, right| right.score.cmp(&left.score).then_with(|| left.kind.cmp(&right.kind)));
        scored.truncate(limit);
        scored
    }
}

fn palette_entry(descriptor: &dyn CommandDescriptor, score: i64) -> PaletteEntry {
    PaletteEntry {
        kind: descriptor.kind().to_string(),
        display_name: descriptor.display_name().to_string(),
        icon_key: descriptor.icon_key().map(str::to_string),
        score,
    }
}

fn score_descriptor(descriptor: &dyn CommandDescriptor, query_lower: &str, query_tokens: &[String]) -> Option<i64> {
    if query_tokens.is_empty() {
        return None;
    }

    let haystack = build_haystack(descriptor);
    let fuzzy_total = query_tokens
        .iter()
        .try_fold(0_i64, |accumulator, token| fuzzy_score(&haystack, token).map(|score| accumulator + score))?;
    let haystack_lower = haystack.to_ascii_lowercase();

    let coverage_score = query_tokens.iter().filter(|token| haystack_lower.contains(token.as_str())).count() as i64 * COVERAGE_SCORE_MULTIPLIER;

    let kind_lower = descriptor.kind().to_ascii_lowercase();
    let exact_bonus = if kind_lower.contains(query_lower) { EXACT_KIND_MATCH_SCORE_BONUS } else { 0 };
    let prefix_bonus = if query_tokens.first().is_some_and(|token| kind_lower.starts_with(token.as_str())) {
        PREFIX_KIND_MATCH_SCORE_BONUS
    } else {
        0
    };

    Some(fuzzy_total + coverage_score + exact_bonus + prefix_bonus)
}

fn tokenize_query(query: &str) -> Vec<String> {
    query.split_whitespace().map(|token| token.to_ascii_lowercase()).collect()
}

fn build_haystack(descriptor: &dyn CommandDescriptor) -> String {
    let mut haystack = String::new();
    append_non_empty(&mut haystack, descriptor.kind());
    append_non_empty(&mut haystack, descriptor.display_name());
    append_non_empty(&mut haystack, &normalize_identifier(descriptor.kind()));
    if let Some(icon_key) = descriptor.icon_key() {
        append_non_empty(&mut haystack, icon_key);
    }
    append_non_empty(&mut haystack, descriptor.summary());
    haystack
}

fn append_non_empty(buffer: &mut String, value: &str) {
    let trimmed = value.trim();
    if !trimmed.is_empty() {
        if !buffer.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(trimmed);
    }
}

fn normalize_identifier(value: &str) -> Cow<'_, str> {
    if value.bytes().any(|byte| matches!(byte, b'_' | b'-' | b'.')) {
        Cow::Owned(value.replace(['_', '-', '.'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
