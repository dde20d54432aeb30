//! IMAP SEARCH criteria
//!
//! Filter rules carry their search predicate as a list of terms, in
//! the same shape the config file uses: a bare keyword (`"UNSEEN"`) or
//! a keyword followed by its arguments (`["FROM", "bank@example.com"]`).
//! This module turns those terms into the IMAP wire form.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Keys whose arguments are free text and must be sent as quoted
/// strings.
const STRING_KEYS: &[&str] = &["BCC", "BODY", "CC", "FROM", "HEADER", "SUBJECT", "TEXT", "TO"];

/// Keys whose argument is a date (`D-Mon-YYYY` on the wire).
const DATE_KEYS: &[&str] = &["BEFORE", "ON", "SENTBEFORE", "SENTON", "SENTSINCE", "SINCE"];

/// Keys whose arguments are themselves search keys.
const NESTED_KEYS: &[&str] = &["NOT", "OR"];

/// One search term of a filter rule.
///
/// # Examples
///
/// ```
/// use imap_to_fs::SearchTerm;
///
/// let term: SearchTerm = serde_json::from_str(r#"["FROM", "bank@example.com"]"#).unwrap();
/// assert_eq!(term.render().unwrap(), r#"FROM "bank@example.com""#);
///
/// let unseen = SearchTerm::keyword("unseen");
/// assert_eq!(unseen.render().unwrap(), "UNSEEN");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchTerm {
    /// A keyword without arguments, e.g. `UNSEEN` or `!FLAGGED`.
    Keyword(String),
    /// A keyword followed by its arguments.
    Compound(Vec<SearchArg>),
}

/// An argument of a compound [`SearchTerm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchArg {
    Text(String),
    Number(i64),
    Term(SearchTerm),
}

impl SearchTerm {
    /// A bare keyword term.
    #[must_use]
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::Keyword(name.into())
    }

    /// A keyword with one text argument.
    #[must_use]
    pub fn with_arg(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self::Compound(vec![
            SearchArg::Text(name.into()),
            SearchArg::Text(arg.into()),
        ])
    }

    /// Render this term as IMAP SEARCH syntax.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Criteria`] if the keyword is missing or is
    /// not a valid atom.
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        self.render_into(&mut out)?;
        Ok(out)
    }

    fn render_into(&self, out: &mut String) -> Result<()> {
        match self {
            Self::Keyword(raw) => {
                let (negated, key) = split_keyword(raw)?;
                if negated {
                    out.push_str("NOT ");
                }
                out.push_str(&key);
            }
            Self::Compound(parts) => {
                let Some((head, args)) = parts.split_first() else {
                    return Err(Error::Criteria("empty search term".into()));
                };
                let SearchArg::Text(raw) = head else {
                    return Err(Error::Criteria(format!(
                        "search term must start with a keyword, got {head:?}"
                    )));
                };
                let (negated, key) = split_keyword(raw)?;
                if negated {
                    out.push_str("NOT ");
                }
                out.push_str(&key);
                for arg in args {
                    out.push(' ');
                    render_arg(&key, arg, out)?;
                }
            }
        }
        Ok(())
    }
}

/// Render a full criteria list, space separated (IMAP's implicit AND).
///
/// # Errors
///
/// Returns [`Error::Criteria`] if any term is malformed.
pub fn render_all(terms: &[SearchTerm]) -> Result<String> {
    let mut rendered = Vec::with_capacity(terms.len());
    for term in terms {
        rendered.push(term.render()?);
    }
    Ok(rendered.join(" "))
}

/// Prefix a search query with `CHARSET UTF-8` when it carries
/// non-ASCII text, so the server decodes quoted arguments as UTF-8.
///
/// ```
/// use imap_to_fs::with_charset;
///
/// assert_eq!(with_charset("SUBJECT \"Invoice\"".into()), "SUBJECT \"Invoice\"");
/// assert_eq!(
///     with_charset("SUBJECT \"März\"".into()),
///     "CHARSET UTF-8 SUBJECT \"März\""
/// );
/// ```
#[must_use]
pub fn with_charset(query: String) -> String {
    if query.is_ascii() {
        query
    } else {
        format!("CHARSET UTF-8 {query}")
    }
}

/// Split an optional leading `!` off a keyword and upper-case it.
fn split_keyword(raw: &str) -> Result<(bool, String)> {
    let trimmed = raw.trim();
    let (negated, key) = trimmed
        .strip_prefix('!')
        .map_or((false, trimmed), |rest| (true, rest));
    if !is_atom(key) {
        return Err(Error::Criteria(format!("invalid search keyword '{raw}'")));
    }
    Ok((negated, key.to_ascii_uppercase()))
}

fn render_arg(key: &str, arg: &SearchArg, out: &mut String) -> Result<()> {
    match arg {
        SearchArg::Number(n) => {
            let _ = write!(out, "{n}");
        }
        SearchArg::Term(term @ SearchTerm::Compound(_)) => {
            out.push('(');
            term.render_into(out)?;
            out.push(')');
        }
        SearchArg::Term(term @ SearchTerm::Keyword(_)) => term.render_into(out)?,
        SearchArg::Text(text) if NESTED_KEYS.contains(&key) => {
            SearchTerm::Keyword(text.clone()).render_into(out)?;
        }
        SearchArg::Text(text) if DATE_KEYS.contains(&key) => out.push_str(&imap_date(text)),
        SearchArg::Text(text) if STRING_KEYS.contains(&key) || !is_atom(text) => {
            out.push_str(&quote(text));
        }
        SearchArg::Text(text) => out.push_str(text),
    }
    Ok(())
}

/// Convert `YYYY-MM-DD` into the IMAP date form; anything else is
/// assumed to already be in IMAP form.
fn imap_date(value: &str) -> String {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_or_else(
        |_| value.to_string(),
        |date| date.format("%-d-%b-%Y").to_string(),
    )
}

/// RFC 3501 `atom`: printable ASCII without atom-specials.
pub(crate) fn is_atom(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']')
        })
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
