// src/core/commons.rs

use std::cmp::Ordering;

/// Compares dotted version strings segment-wise: numeric segments compare
/// numerically, anything else lexicographically, missing segments count as
/// zero (`19.36` < `19.36.1`).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (left_part, right_part) => {
                let left_part = left_part.unwrap_or("0");
                let right_part = right_part.unwrap_or("0");
                let ordering = match (left_part.parse::<u64>(), right_part.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => left_part.cmp(right_part),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Matches `candidate` against a glob-style pattern where `*` is the only
/// wildcard (everything else is literal). Matching is case-sensitive.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let mut escaped = String::with_capacity(pattern.len() + 8);
    escaped.push('^');
    for c in pattern.chars() {
        if c == '*' {
            escaped.push_str(".*");
        } else {
            escaped.push_str(&regex::escape(&c.to_string()));
        }
    }
    escaped.push('$');
    regex::Regex::new(&escaped)
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}
