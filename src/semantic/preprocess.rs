//! Query preprocessing for embedding generation.
//!
//! Prepares user queries for embedding:
//! 1. Trim whitespace
//! 2. Truncate to a maximum number of characters (never splitting a char)

use std::borrow::Cow;

/// Default maximum query length for embedding input (characters, not tokens)
pub const DEFAULT_MAX_QUERY_CHARS: usize = 2000;

/// Trim and truncate every query. The batch keeps its length and order.
pub fn preprocess_queries<S: AsRef<str>>(queries: &[S], max_chars: usize) -> Vec<String> {
    queries
        .iter()
        .map(|q| truncate_to_chars(q.as_ref().trim(), max_chars).into_owned())
        .collect()
}

/// Whether a query is empty after trimming.
pub fn is_blank(query: &str) -> bool {
    query.trim().is_empty()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].trim_end().to_string()),
        None => Cow::Borrowed(input),
    }
}
