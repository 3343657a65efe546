//! Filename collation keys.
//!
//! A key is the case-folded name with every run of ASCII digits replaced by
//! a length-prefixed form, so comparing keys as plain strings orders
//! numbers by value:
//!
//! ```text
//! "IMG_9.jpg"   → "img_\u{1}0001 9.jpg"
//! "IMG_10.jpg"  → "img_\u{1}0002 10.jpg"
//! "img_010.jpg" → "img_\u{1}0002 10.jpg"   (leading zeros ignored)
//! ```
//!
//! The `\u{1}` marker sorts number runs before any printable character,
//! the way file managers list `2.jpg` ahead of `a.jpg`.

use std::cmp::Ordering;

const NUMBER_MARK: char = '\u{1}';

/// Natural, case-insensitive sort key for a file name.
pub fn collate_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 8);
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            let mut digits = String::from(c);
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let significant = digits.trim_start_matches('0');
            let significant = if significant.is_empty() { "0" } else { significant };
            key.push(NUMBER_MARK);
            key.push_str(&format!("{:04} ", significant.len()));
            key.push_str(significant);
        } else {
            key.extend(c.to_lowercase());
        }
    }
    key
}

/// Compare two keys, placing a key that is a strict prefix of the other
/// after it.
///
/// ```
/// # use glance_io::collate::{collate_key, compare_prefix_last};
/// # use std::cmp::Ordering;
/// let (short, long) = (collate_key("trip"), collate_key("trip day two"));
/// assert_eq!(compare_prefix_last(&short, &long), Ordering::Greater);
/// ```
pub fn compare_prefix_last(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();
    loop {
        match (a_chars.next(), b_chars.next()) {
            (Some(x), Some(y)) if x == y => continue,
            (Some(x), Some(y)) => return x.cmp(&y),
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}
