//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Mailvane.
//
// Mailvane is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailvane is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailvane. If not, see <http://www.gnu.org/licenses/>.

use super::defs::*;
use crate::support::system_config::SystemConfig;

#[tokio::test]
async fn append_and_fetch() {
    let setup = set_up();
    let mut client = setup.connect("appfetch");
    client.log_in().await;

    let responses = client.append("INBOX", "hello there").await;
    assert_has_line(&responses, r"^A1 OK \[APPENDUID \d+ 1\]");

    client.select("INBOX").await;
    let responses = client.ok("FETCH 1 (UID RFC822.SIZE FLAGS)").await;
    assert_has_line(
        &responses,
        r"^\* 1 FETCH \(UID 1 RFC822\.SIZE \d+ FLAGS \(",
    );

    let responses = client.ok("FETCH 1 ENVELOPE").await;
    assert_has_line(
        &responses,
        r#"^\* 1 FETCH \(ENVELOPE \("Tue, 13 Oct 2026 10:00:00 \+0000" "hello there" \(\("Someone" NIL "someone" "example\.net"\)\)"#,
    );

    let responses = client.ok("FETCH 1 BODY.PEEK[HEADER]").await;
    assert_has_line(&responses, r"BODY\[HEADER\] \{\d+\}\r\nFrom: Someone");

    let responses = client.ok("FETCH 1 BODY.PEEK[TEXT]<0.5>").await;
    assert_has_line(&responses, r"BODY\[TEXT\]<0> \{5\}\r\nHello\)");

    // Nothing has been marked seen so far
    let responses = client.ok("FETCH 1 FLAGS").await;
    assert_no_line(&responses, r"\\Seen");

    let responses = client.ok("FETCH 1 BODY[TEXT]").await;
    assert_has_line(&responses, r"\\Seen");
    let responses = client.ok("FETCH 1 FLAGS").await;
    assert_has_line(&responses, r"FLAGS \(.*\\Seen");
}

#[tokio::test]
async fn fetch_bodystructure() {
    let setup = set_up();
    let mut client = setup.connect("bs");
    client.log_in().await;
    client.append("INBOX", "structure").await;
    client.select("INBOX").await;

    let responses = client.ok("FETCH 1 BODYSTRUCTURE").await;
    assert_has_line(
        &responses,
        r#"BODYSTRUCTURE \("TEXT" "PLAIN" \("CHARSET" "US-ASCII"\) NIL NIL "7BIT" 13 1"#,
    );
}

#[tokio::test]
async fn append_failures() {
    let mut config = SystemConfig::default();
    config.imap.max_message_size = 100;
    let setup = set_up_with(config, None);
    let mut client = setup.connect("appfail");
    client.log_in().await;

    // Too big, with a synchronising literal: refused before the client
    // sends anything.
    client.write_raw(b"A1 APPEND INBOX {1000}\r\n").await;
    let responses = client.responses_until("A1").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[TOOBIG\]");

    // Too big with LITERAL+: the literal is skipped.
    let mut data = b"A2 APPEND INBOX {200+}\r\n".to_vec();
    data.extend_from_slice(&[b'x'; 200]);
    data.extend_from_slice(b"\r\n");
    client.write_raw(&data).await;
    let responses = client.responses_until("A2").await;
    assert_tagged_no(&responses);

    // Small enough to pass the size check, so the missing mailbox is what
    // gets reported.
    let message = "Subject: a\r\n\r\nb";
    let mut data =
        format!("A3 APPEND Nowhere {{{}+}}\r\n", message.len()).into_bytes();
    data.extend_from_slice(message.as_bytes());
    data.extend_from_slice(b"\r\n");
    client.write_raw(&data).await;
    let responses = client.responses_until("A3").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[TRYCREATE\]");

    client.ok("NOOP").await;
}

#[tokio::test]
async fn append_to_selected_announces_message() {
    let setup = set_up();
    let mut client = setup.connect("appsel");
    client.log_in().await;
    let responses = client.select("INBOX").await;
    assert_has_line(&responses, r"^\* 0 EXISTS");

    let responses = client.append("INBOX", "while selected").await;
    let exists = responses
        .iter()
        .position(|l| l.starts_with("* 1 EXISTS"))
        .expect("no EXISTS before APPEND completed");
    let tagged = responses
        .iter()
        .position(|l| l.starts_with("A1 OK"))
        .unwrap();
    assert!(exists < tagged);

    // The new message is addressable straight away.
    let responses = client.ok("STORE 1 +FLAGS (\\Flagged)").await;
    assert_has_line(&responses, r"^\* 1 FETCH \(FLAGS \(.*\\Flagged");
    let responses = client.ok("FETCH 1 FLAGS").await;
    assert_has_line(&responses, r"\\Flagged");
}

#[tokio::test]
async fn append_with_flags_and_sync_literal() {
    let setup = set_up();
    let mut client = setup.connect("appflags");
    client.log_in().await;

    let message = make_message("flagged", "body\r\n");
    client
        .write_raw(
            format!(
                "A1 APPEND INBOX (\\Flagged $Work) \"13-Oct-2026 10:00:00 +0000\" {{{}}}\r\n",
                message.len()
            )
            .as_bytes(),
        )
        .await;
    receive_line_like(&mut client, r"^\+ Ready for literal data").await;
    client.write_raw(message.as_bytes()).await;
    client.write_raw(b"\r\n").await;
    assert_tagged_ok(&client.responses_until("A1").await);

    client.select("INBOX").await;
    let responses = client.ok("FETCH 1 (FLAGS INTERNALDATE)").await;
    assert_has_line(&responses, r"\\Flagged");
    assert_has_line(&responses, r"\$Work");
    assert_has_line(&responses, r#"INTERNALDATE "13-Oct-2026 10:00:00 \+0000""#);
}

#[tokio::test]
async fn store_flags() {
    let setup = set_up();
    let mut client = setup.connect("store");
    client.log_in().await;
    client.append("INBOX", "one").await;
    client.append("INBOX", "two").await;
    client.select("INBOX").await;

    let responses = client.ok("STORE 1:2 +FLAGS (\\Flagged)").await;
    assert_has_line(&responses, r"^\* 1 FETCH \(FLAGS \(.*\\Flagged");
    assert_has_line(&responses, r"^\* 2 FETCH \(FLAGS \(.*\\Flagged");

    let responses = client.ok("STORE 1 -FLAGS.SILENT (\\Flagged)").await;
    assert_no_line(&responses, "FETCH");

    let responses = client.ok("UID STORE 2 FLAGS (\\Answered)").await;
    assert_has_line(&responses, r"^\* 2 FETCH \(FLAGS \(\\Answered.*UID 2");

    let responses = client.ok("SEARCH FLAGGED").await;
    assert_has_line(&responses, r"^\* SEARCH\r");
    let responses = client.ok("SEARCH ANSWERED").await;
    assert_has_line(&responses, r"^\* SEARCH 2\r");
}

#[tokio::test]
async fn search() {
    let setup = set_up();
    let mut client = setup.connect("search");
    client.log_in().await;
    client.append("INBOX", "apples and pears").await;
    client.append("INBOX", "bananas").await;
    client.append("INBOX", "cherries").await;
    client.select("INBOX").await;
    client.ok("STORE 2 +FLAGS (\\Seen)").await;

    let responses = client.ok("SEARCH ALL").await;
    assert_has_line(&responses, r"^\* SEARCH 1 2 3\r");
    let responses = client.ok("SEARCH SUBJECT BANANAS").await;
    assert_has_line(&responses, r"^\* SEARCH 2\r");
    let responses = client.ok("SEARCH UNSEEN").await;
    assert_has_line(&responses, r"^\* SEARCH 1 3\r");
    let responses = client.ok("SEARCH OR SUBJECT apples SUBJECT cherries").await;
    assert_has_line(&responses, r"^\* SEARCH 1 3\r");
    let responses = client.ok("SEARCH NOT 2:3").await;
    assert_has_line(&responses, r"^\* SEARCH 1\r");
    let responses = client.ok("UID SEARCH BODY world").await;
    assert_has_line(&responses, r"^\* SEARCH 1 2 3\r");
    let responses = client.ok("SEARCH CHARSET UTF-8 FROM someone").await;
    assert_has_line(&responses, r"^\* SEARCH 1 2 3\r");

    let responses = client.command("SEARCH CHARSET KOI8-R ALL").await;
    assert_tagged_no(&responses);
}

#[tokio::test]
async fn expunge() {
    let setup = set_up();
    let mut client = setup.connect("expunge");
    client.log_in().await;
    for subject in &["a", "b", "c", "d"] {
        client.append("INBOX", subject).await;
    }
    client.select("INBOX").await;

    client.ok("STORE 2,4 +FLAGS.SILENT (\\Deleted)").await;
    let responses = client.ok("EXPUNGE").await;
    assert_eq!(
        vec!["* 4 EXPUNGE\r\n", "* 2 EXPUNGE\r\n"],
        responses[..2].to_vec()
    );

    let responses = client.ok("FETCH 1:* UID").await;
    assert_has_line(&responses, r"^\* 1 FETCH \(UID 1\)");
    assert_has_line(&responses, r"^\* 2 FETCH \(UID 3\)");

    // UID EXPUNGE only touches the given messages.
    client.ok("STORE 1:2 +FLAGS.SILENT (\\Deleted)").await;
    let responses = client.ok("UID EXPUNGE 3").await;
    assert_has_line(&responses, r"^\* 2 EXPUNGE\r");
    assert_no_line(&responses, r"^\* 1 EXPUNGE");

    // CLOSE expunges silently.
    let responses = client.ok("CLOSE").await;
    assert_eq!(1, responses.len());
    let responses = client.select("INBOX").await;
    assert_has_line(&responses, r"^\* 0 EXISTS");
}

#[tokio::test]
async fn copy_and_move() {
    let setup = set_up();
    let mut client = setup.connect("copymove");
    client.log_in().await;
    client.append("INBOX", "one").await;
    client.append("INBOX", "two").await;
    client.select("INBOX").await;

    let responses = client.ok("COPY 1:2 Archive").await;
    assert_has_line(&responses, r"^T\d+ OK \[COPYUID \d+ 1:2 1:2\] COPY completed");

    let responses = client.command("COPY 1 Nowhere").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[TRYCREATE\]");

    let responses = client.ok("UID MOVE 2 Trash").await;
    assert_has_line(&responses, r"^\* OK \[COPYUID \d+ 2 1\]");
    assert_has_line(&responses, r"^\* 2 EXPUNGE\r");
    assert_has_line(&responses, r"^T\d+ OK MOVE completed");

    let responses = client
        .ok("STATUS Archive (MESSAGES)")
        .await;
    assert_has_line(&responses, r"MESSAGES 2\)");
    let responses = client.ok("STATUS Trash (MESSAGES)").await;
    assert_has_line(&responses, r"MESSAGES 1\)");

    client.ok("EXAMINE INBOX").await;
    assert_tagged_no(&client.command("MOVE 1 Trash").await);
}

#[tokio::test]
async fn thread() {
    let setup = set_up();
    let mut client = setup.connect("thread");
    client.log_in().await;
    client.append("INBOX", "Lunch").await;
    client.append("INBOX", "Other").await;
    client.append("INBOX", "Re: Lunch").await;
    client.select("INBOX").await;

    let responses = client.ok("THREAD ORDEREDSUBJECT UTF-8 ALL").await;
    assert_has_line(&responses, r"^\* THREAD \(1 3\)\(2\)\r");

    let responses = client.ok("UID THREAD ORDEREDSUBJECT UTF-8 NOT 2").await;
    assert_has_line(&responses, r"^\* THREAD \(1 3\)\r");
}

#[tokio::test]
async fn quota() {
    let setup = set_up();
    let mut client = setup.connect("quota");
    client.log_in().await;

    let responses = client.ok("GETQUOTAROOT INBOX").await;
    assert_has_line(&responses, r#"^\* QUOTAROOT INBOX "example\.com"\r"#);
    assert_has_line(&responses, r#"^\* QUOTA "example\.com" \(STORAGE 0 1048576\)"#);

    let responses = client.ok(r#"GETQUOTA """#).await;
    assert_has_line(&responses, r#"^\* QUOTA "" \(STORAGE 0 1048576\)"#);

    // Only administrators may change quotas.
    assert_tagged_no(&client.command(r#"SETQUOTA "" (STORAGE 10)"#).await);

    let mut admin = setup.connect("quotaadmin");
    admin.log_in_as(ADMIN).await;
    let responses = admin
        .ok(r#"SETQUOTA "" (STORAGE 10 MESSAGE 5)"#)
        .await;
    assert_has_line(&responses, r#"^\* QUOTA "" \(STORAGE 0 10 MESSAGE 0 5\)"#);
    assert_tagged_no(&admin.command(r#"SETQUOTA "" (FROBS 1)"#).await);
    assert_tagged_no(&admin.command(r#"GETQUOTA "nowhere.example""#).await);
}
