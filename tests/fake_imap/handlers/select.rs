//! SELECT command handler.
//!
//! Opens a folder and answers with the metadata a client needs to
//! start watching it:
//!
//! - `* N EXISTS` -- the message count. The server remembers it so a
//!   later NOOP can report growth.
//! - `* OK [UIDVALIDITY V]` / `* OK [UIDNEXT U]` -- the folder's UID
//!   space.
//! - `* OK [PERMANENTFLAGS (...)]` -- which flags stick. The `\*`
//!   entry tells the client that new keywords may be created.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the SELECT command. Returns the folder's message count, or
/// `None` if the folder does not exist.
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<usize> {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let _ = write_line(stream, &format!("{tag} NO Folder not found\r\n")).await;
        return None;
    };

    let exists = folder.emails.len();
    let lines = [
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n".to_string(),
        format!("* {exists} EXISTS\r\n"),
        "* 0 RECENT\r\n".to_string(),
        "* OK [UIDVALIDITY 1]\r\n".to_string(),
        format!("* OK [UIDNEXT {}]\r\n", folder.next_uid()),
        "* OK [PERMANENTFLAGS (\\Seen \\Deleted \\*)] Limited\r\n".to_string(),
        format!("{tag} OK [READ-WRITE] SELECT completed\r\n"),
    ];
    for line in &lines {
        if write_line(stream, line).await.is_err() {
            break;
        }
    }
    Some(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    const RAW: &[u8] = b"From: a@b.com\r\nSubject: Test\r\n\r\nBody";

    async fn run(folder_name: &str, mailbox: &Mailbox) -> (String, Option<usize>) {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let selected = handle_select("A1", folder_name, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        (String::from_utf8(buf).unwrap(), selected)
    }

    #[tokio::test]
    async fn reports_count_and_uid_space() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(5, RAW)
            .email(10, RAW)
            .build();

        let (output, selected) = run("INBOX", &mailbox).await;

        assert_eq!(selected, Some(2));
        assert!(output.contains("* 2 EXISTS\r\n"));
        assert!(output.contains("* OK [UIDNEXT 11]"));
        assert!(output.ends_with("A1 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn empty_folder_starts_uids_at_one() {
        let mailbox = MailboxBuilder::new().folder("Invoices").build();

        let (output, selected) = run("Invoices", &mailbox).await;

        assert_eq!(selected, Some(0));
        assert!(output.contains("* 0 EXISTS\r\n"));
        assert!(output.contains("* OK [UIDNEXT 1]"));
    }

    #[tokio::test]
    async fn keywords_are_permanent() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let (output, _) = run("INBOX", &mailbox).await;
        assert!(output.contains("PERMANENTFLAGS (\\Seen \\Deleted \\*)"));
    }

    #[tokio::test]
    async fn missing_folder_is_no() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let (output, selected) = run("NoSuchFolder", &mailbox).await;

        assert!(selected.is_none());
        assert_eq!(output, "A1 NO Folder not found\r\n");
    }
}
