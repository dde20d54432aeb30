//! UID SEARCH command handler.
//!
//! Matches emails against parsed `SearchKey` criteria from imap-types.
//! Supported keys:
//!
//! - `ALL`, `SEEN` / `UNSEEN`, `DELETED` / `UNDELETED`
//! - `KEYWORD kw` / `UNKEYWORD kw` -- user keyword flags
//! - `SUBJECT s` / `FROM s` -- case-insensitive header substring
//! - `SINCE d` / `BEFORE d` -- the `Date:` header's calendar day
//! - `AND`, `OR`, `NOT`
//!
//! Anything else is answered with `BAD`, so a test notices when the
//! client sends criteria the server does not understand.
//!
//! The response format (RFC 3501 Section 7.2.5):
//!
//! ```text
//! * SEARCH 1 2 3
//! A0003 OK SEARCH completed
//! ```

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use chrono::NaiveDate;
use imap_codec::imap_types::core::AString;
use imap_codec::imap_types::search::SearchKey;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the UID SEARCH command. Returns matching UIDs from the
/// selected folder.
pub async fn handle_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    criteria: &[SearchKey<'_>],
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        let _ = write_line(stream, &format!("{tag} BAD No folder selected\r\n")).await;
        return;
    };

    let mut uids = Vec::new();
    for email in &folder.emails {
        match criteria.iter().try_fold(true, |all, key| {
            matches_key(email, key).map(|hit| all && hit)
        }) {
            Some(true) => uids.push(email.uid),
            Some(false) => {}
            None => {
                let _ = write_line(stream, &format!("{tag} BAD Unsupported criteria\r\n")).await;
                return;
            }
        }
    }

    let mut line = String::from("* SEARCH");
    for uid in &uids {
        line.push_str(&format!(" {uid}"));
    }
    line.push_str("\r\n");
    let _ = write_line(stream, &line).await;
    let _ = write_line(stream, &format!("{tag} OK SEARCH completed\r\n")).await;
}

/// Whether `email` matches `key`; `None` for unsupported keys.
fn matches_key(email: &TestEmail, key: &SearchKey<'_>) -> Option<bool> {
    Some(match key {
        SearchKey::All => true,
        SearchKey::Seen => email.seen,
        SearchKey::Unseen => !email.seen,
        SearchKey::Deleted => email.deleted,
        SearchKey::Undeleted => !email.deleted,
        SearchKey::Keyword(kw) => email.has_keyword(kw.inner()),
        SearchKey::Unkeyword(kw) => !email.has_keyword(kw.inner()),
        SearchKey::Subject(s) => header_contains(&email.raw, "Subject", s),
        SearchKey::From(s) => header_contains(&email.raw, "From", s),
        SearchKey::Since(date) => header_date(&email.raw).is_some_and(|d| d >= *date.as_ref()),
        SearchKey::Before(date) => header_date(&email.raw).is_some_and(|d| d < *date.as_ref()),
        SearchKey::And(keys) => {
            for k in keys.as_ref() {
                if !matches_key(email, k)? {
                    return Some(false);
                }
            }
            true
        }
        SearchKey::Or(a, b) => matches_key(email, a)? || matches_key(email, b)?,
        SearchKey::Not(k) => !matches_key(email, k)?,
        _ => return None,
    })
}

/// The value of the first `name:` header in a raw message.
fn header(raw: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let head = text.split("\r\n\r\n").next()?;
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

fn header_contains(raw: &[u8], name: &str, needle: &AString<'_>) -> bool {
    let needle: &[u8] = needle.as_ref();
    let needle = String::from_utf8_lossy(needle).to_lowercase();
    header(raw, name).is_some_and(|value| value.to_lowercase().contains(&needle))
}

fn header_date(raw: &[u8]) -> Option<NaiveDate> {
    chrono::DateTime::parse_from_rfc2822(&header(raw, "Date")?)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::core::Atom;
    use imap_codec::imap_types::datetime::NaiveDate as ImapDate;
    use tokio::io::BufReader;

    fn email(subject: &str, date: &str) -> Vec<u8> {
        format!(
            "From: Billing <billing@example.com>\r\n\
             Date: {date}\r\n\
             Subject: {subject}\r\n\
             \r\n\
             Body"
        )
        .into_bytes()
    }

    async fn run(criteria: &[SearchKey<'_>], mailbox: &Mailbox, selected: Option<&str>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_uid_search("A1", criteria, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn keyword(kw: &str) -> Atom<'_> {
        Atom::try_from(kw).unwrap()
    }

    fn text(s: &str) -> AString<'_> {
        AString::try_from(s).unwrap()
    }

    fn inbox() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .email(1, &email("Invoice 1001", "Mon, 01 Jan 2024 10:00:00 +0000"))
            .keyword("AttachmentSaved")
            .email(2, &email("Invoice 1002", "Mon, 15 Jan 2024 10:00:00 +0000"))
            .email(3, &email("Newsletter", "Sat, 20 Jan 2024 10:00:00 +0000"))
            .build()
    }

    #[tokio::test]
    async fn unkeyword_skips_marked_messages() {
        let output = run(
            &[SearchKey::Unkeyword(keyword("AttachmentSaved"))],
            &inbox(),
            Some("INBOX"),
        )
        .await;
        assert!(output.starts_with("* SEARCH 2 3\r\n"));
        assert!(output.ends_with("A1 OK SEARCH completed\r\n"));
    }

    #[tokio::test]
    async fn keyword_finds_marked_messages() {
        let output = run(
            &[SearchKey::Keyword(keyword("attachmentsaved"))],
            &inbox(),
            Some("INBOX"),
        )
        .await;
        assert!(output.starts_with("* SEARCH 1\r\n"));
    }

    #[tokio::test]
    async fn subject_is_a_case_insensitive_substring() {
        let output = run(
            &[
                SearchKey::Unkeyword(keyword("AttachmentSaved")),
                SearchKey::Subject(text("invoice")),
            ],
            &inbox(),
            Some("INBOX"),
        )
        .await;
        assert!(output.starts_with("* SEARCH 2\r\n"));
    }

    #[tokio::test]
    async fn from_matches_address() {
        let output = run(
            &[SearchKey::From(text("billing@example.com"))],
            &inbox(),
            Some("INBOX"),
        )
        .await;
        assert!(output.starts_with("* SEARCH 1 2 3\r\n"));
    }

    #[tokio::test]
    async fn since_is_inclusive_and_before_exclusive() {
        let day = ImapDate::unvalidated(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        let since = run(&[SearchKey::Since(day.clone())], &inbox(), Some("INBOX")).await;
        let before = run(&[SearchKey::Before(day)], &inbox(), Some("INBOX")).await;
        assert!(since.starts_with("* SEARCH 2 3\r\n"));
        assert!(before.starts_with("* SEARCH 1\r\n"));
    }

    #[tokio::test]
    async fn no_hits_is_an_empty_search_line() {
        let output = run(&[SearchKey::Subject(text("refund"))], &inbox(), Some("INBOX")).await;
        assert_eq!(output, "* SEARCH\r\nA1 OK SEARCH completed\r\n");
    }

    #[tokio::test]
    async fn unsupported_key_is_bad() {
        let output = run(&[SearchKey::Recent], &inbox(), Some("INBOX")).await;
        assert_eq!(output, "A1 BAD Unsupported criteria\r\n");
    }

    #[tokio::test]
    async fn search_without_select_is_bad() {
        let output = run(&[SearchKey::All], &inbox(), None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }

    #[test]
    fn header_lookup_ignores_body() {
        let raw = b"Subject: a\r\n\r\nDate: not a header";
        assert_eq!(header(raw, "subject").as_deref(), Some("a"));
        assert!(header(raw, "Date").is_none());
    }
}
