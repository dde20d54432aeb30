//! UID MOVE command handler (RFC 6851).
//!
//! A COPY followed by removing the originals in one step. The removals
//! are reported as `* N EXPUNGE` before the tagged OK, the same way
//! EXPUNGE reports them.

use super::expunge::remove;
use super::uid_copy::{Outcome, copy};
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the UID MOVE command.
pub async fn handle_uid_move<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    dest_folder: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let result = {
        let mut mb = mailbox.lock().unwrap();
        if mb.uid_move {
            match copy(&mut mb, sequence_set, selected_folder, dest_folder) {
                Outcome::Copied(moved) => {
                    let seqs = selected_folder
                        .and_then(|name| mb.get_folder_mut(name))
                        .map(|folder| remove(folder, |email| moved.contains(&email.uid)))
                        .unwrap_or_default();
                    Ok(seqs)
                }
                Outcome::NoSource => Err(format!("{tag} BAD No folder selected\r\n")),
                Outcome::NoDestination => {
                    Err(format!("{tag} NO [TRYCREATE] Destination folder not found\r\n"))
                }
            }
        } else {
            Err(format!("{tag} BAD MOVE not supported\r\n"))
        }
    };

    let seqs = match result {
        Ok(seqs) => seqs,
        Err(resp) => {
            let _ = write_line(stream, &resp).await;
            return;
        }
    };
    for seq in seqs {
        if write_line(stream, &format!("* {seq} EXPUNGE\r\n")).await.is_err() {
            return;
        }
    }
    let _ = write_line(stream, &format!("{tag} OK MOVE completed\r\n")).await;
}

#[cfg(test)]
mod tests {
    use super::super::uid_set::single;
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    const RAW: &[u8] = b"From: a@b.com\r\nSubject: Test\r\n\r\nBody";

    async fn run_move(dest: &str, mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_uid_move("A1", &single(2), dest, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn inbox_and_done(builder: MailboxBuilder) -> Mutex<Mailbox> {
        Mutex::new(
            builder
                .folder("INBOX")
                .email(1, RAW)
                .email(2, RAW)
                .keyword("AttachmentSaved")
                .folder("Done")
                .build(),
        )
    }

    #[tokio::test]
    #[allow(clippy::significant_drop_tightening)]
    async fn moves_and_reports_expunge() {
        let mb = inbox_and_done(MailboxBuilder::new().with_move());

        let output = run_move("Done", &mb).await;

        assert_eq!(output, "* 2 EXPUNGE\r\nA1 OK MOVE completed\r\n");
        let locked = mb.lock().unwrap();
        let inbox: Vec<u32> = locked.get_folder("INBOX").unwrap().emails.iter().map(|e| e.uid).collect();
        assert_eq!(inbox, vec![1]);
        let done = locked.get_folder("Done").unwrap();
        assert!(done.find(1).unwrap().has_keyword("AttachmentSaved"));
    }

    #[tokio::test]
    async fn missing_destination_leaves_source_alone() {
        let mb = inbox_and_done(MailboxBuilder::new().with_move());
        let output = run_move("Nowhere", &mb).await;
        assert!(output.starts_with("A1 NO [TRYCREATE]"));
        assert_eq!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails.len(), 2);
    }

    #[tokio::test]
    async fn refused_without_the_capability() {
        let mb = inbox_and_done(MailboxBuilder::new());
        let output = run_move("Done", &mb).await;
        assert_eq!(output, "A1 BAD MOVE not supported\r\n");
        assert!(mb.lock().unwrap().get_folder("Done").unwrap().emails.is_empty());
    }
}
