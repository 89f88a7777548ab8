//! Shell-style include/exclude pattern lists.
//!
//! A list like `["*", "-*/skip"]` is evaluated left to right: positive
//! patterns add matches, patterns prefixed by `-` or `!` remove them. An
//! empty list matches everything.

use regex::Regex;

/// Match `text` against a single glob pattern supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).is_ok_and(|re| re.is_match(text))
}

/// Evaluate an include/exclude pattern list against `item`.
pub fn matches<S: AsRef<str>>(item: &str, patterns: &[S]) -> bool {
    let mut matched = patterns.is_empty();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        if let Some(negated) = pattern.strip_prefix(['-', '!']) {
            matched = matched && !glob_match(negated, item);
        } else {
            let pattern = pattern.strip_prefix('+').unwrap_or(pattern);
            matched = matched || glob_match(pattern, item);
        }
    }
    matched
}
