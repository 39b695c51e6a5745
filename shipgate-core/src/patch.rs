//! Line-oriented document surgery.
//!
//! The status graph and progress log are shared with tooling outside the
//! gate, so updates rewrite exactly one scalar (or insert one entry) and
//! leave every other byte untouched. Each function returns None when its
//! target cannot be located; callers treat that as a no-op.

use regex::{Captures, Regex};

/// Rewrite the second cell of the table row keyed by `key`, preserving the
/// remaining cells: `| key | old | notes |` becomes `| key | value | notes |`.
pub fn set_table_cell(text: &str, key: &str, value: &str) -> Option<String> {
    let pattern = format!(
        r"(?m)^(\|\s*{}\s*\|)\s*[^|\n]*(\|.*)$",
        regex::escape(key)
    );
    let re = Regex::new(&pattern).ok()?;
    if !re.is_match(text) {
        return None;
    }
    let updated = re.replace(text, |caps: &Captures| {
        format!("{} {} {}", &caps[1], value, &caps[2])
    });
    Some(updated.into_owned())
}

/// Rewrite the `field:` scalar inside the indented block headed by `block:`,
/// preserving all sibling fields.
pub fn set_block_field(text: &str, block: &str, field: &str, value: &str) -> Option<String> {
    let re = block_field_pattern(block, field)?;
    if !re.is_match(text) {
        return None;
    }
    let updated = re.replace(text, |caps: &Captures| format!("{} {}", &caps[1], value));
    Some(updated.into_owned())
}

/// Read the `field:` scalar inside the block headed by `block:`.
pub fn get_block_field(text: &str, block: &str, field: &str) -> Option<String> {
    let re = block_field_pattern(block, field)?;
    let caps = re.captures(text)?;
    let value = caps.get(2)?.as_str().trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

fn block_field_pattern(block: &str, field: &str) -> Option<Regex> {
    let pattern = format!(
        r"(?m)^({block}:[ \t]*\n(?:[ \t]+[^\n]*\n)*?[ \t]+{field}:)[ \t]*([^\n]*)",
        block = regex::escape(block),
        field = regex::escape(field),
    );
    Regex::new(&pattern).ok()
}

/// Insert `entry` directly after the first occurrence of the heading line.
pub fn insert_after_heading(text: &str, heading: &str, entry: &str) -> Option<String> {
    let needle = format!("{heading}\n");
    let pos = text.find(&needle)?;
    let insert_at = pos + needle.len();
    let mut out = String::with_capacity(text.len() + entry.len());
    out.push_str(&text[..insert_at]);
    out.push_str(entry);
    out.push_str(&text[insert_at..]);
    Some(out)
}
