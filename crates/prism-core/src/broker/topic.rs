//! Topic routing-key matching.
//!
//! Keys and patterns are dot-separated words. In a pattern `*` matches exactly
//! one word and `#` matches zero or more words.

/// Does `pattern` match `routing_key`?
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // Zero words, or swallow one and try again.
            matches_words(rest, key) || (!key.is_empty() && matches_words(pattern, &key[1..]))
        }
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) => (word == "*" || word == first) && matches_words(rest, key_rest),
            None => false,
        },
    }
}
