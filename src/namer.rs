//! Output filename computation
//!
//! A rename template may contain `%YEAR%`, `%MONTH%`, `%DAY%` and
//! `%NAME%` (matched case-insensitively). A template without any `%`
//! keeps the attachment's own name.

use chrono::{Datelike, NaiveDate};

/// Name used when an attachment carries no filename.
pub const UNKNOWN_NAME: &str = "unknown";

/// Compute the output filename for one attachment.
///
/// `date` is the message's declared send date; callers fall back to
/// today when the message has none.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use imap_to_fs::compute_filename;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
/// assert_eq!(
///     compute_filename("%YEAR%-%MONTH%-%DAY%_%NAME%", date, Some("invoice.pdf")),
///     "2024-03-05_invoice.pdf"
/// );
/// assert_eq!(compute_filename("", date, None), "unknown");
/// ```
#[must_use]
pub fn compute_filename(template: &str, date: NaiveDate, original: Option<&str>) -> String {
    let name = original.unwrap_or(UNKNOWN_NAME);
    if !template.contains('%') {
        return name.to_string();
    }

    let year = format!("{:04}", date.year());
    let month = format!("{:02}", date.month());
    let day = format!("{:02}", date.day());

    let out = replace_token(template, "%YEAR%", &year);
    let out = replace_token(&out, "%MONTH%", &month);
    let out = replace_token(&out, "%DAY%", &day);
    replace_token(&out, "%NAME%", name)
}

/// Replace every ASCII-case-insensitive occurrence of `token`.
fn replace_token(haystack: &str, token: &str, value: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = find_ignore_case(rest, token) {
        out.push_str(&rest[..pos]);
        out.push_str(value);
        rest = &rest[pos + token.len()..];
    }
    out.push_str(rest);
    out
}

fn find_ignore_case(haystack: &str, token: &str) -> Option<usize> {
    haystack
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| {
            haystack
                .get(i..i + token.len())
                .is_some_and(|window| window.eq_ignore_ascii_case(token))
        })
}
