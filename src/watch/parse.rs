//! Scanner for watch expression text.
//!
//! An expression is a dotted chain of member names. Dots inside `[...]`
//! index suffixes or single-quoted literal names do not split the chain;
//! parenthesis characters are stripped. An index suffix is the text
//! between the first top-level `[` and the last `]` of a segment; it may
//! itself be a full expression.

/// Split expression text on top-level dots.
pub(crate) fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0u32;
    let mut literal = false;

    for ch in text.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '\'' if depth == 0 => {
                literal = !literal;
            }
            '(' | ')' if depth == 0 && !literal => {}
            '.' if depth == 0 && !literal => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split one segment into its member name and optional index text.
pub(crate) fn split_index_suffix(segment: &str) -> (String, Option<String>) {
    let Some(open) = segment.find('[') else {
        return (segment.trim().to_string(), None);
    };

    let name = segment[..open].trim().to_string();
    let rest = &segment[open + 1..];
    let index = match rest.rfind(']') {
        Some(close) => rest[..close].to_string(),
        None => rest.to_string(),
    };

    (name, Some(index))
}
