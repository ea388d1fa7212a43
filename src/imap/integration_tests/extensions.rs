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

#[tokio::test]
async fn enable_extensions() {
    let setup = set_up();
    let mut client = setup.connect("enable");
    client.log_in().await;

    let responses = client.ok("ENABLE condstore XYZZY").await;
    assert_has_line(&responses, r"^\* ENABLED CONDSTORE\r");

    let responses = client.ok("ENABLE QRESYNC").await;
    assert_has_line(&responses, r"^\* ENABLED QRESYNC\r");
}

#[tokio::test]
async fn condstore_modseqs() {
    let setup = set_up();
    let mut client = setup.connect("condstore");
    client.log_in().await;
    client.append("INBOX", "one").await;
    client.append("INBOX", "two").await;

    let responses = client.ok("SELECT INBOX (CONDSTORE)").await;
    assert_has_line(&responses, r"^\* OK \[HIGHESTMODSEQ 2\]");

    let responses = client.ok("FETCH 1:* (FLAGS) (CHANGEDSINCE 1)").await;
    assert_has_line(&responses, r"^\* 2 FETCH \(FLAGS \(.*\) MODSEQ \(2\)\)");
    assert_no_line(&responses, r"^\* 1 FETCH");

    let responses = client.ok("STORE 1 +FLAGS (\\Flagged)").await;
    assert_has_line(&responses, r"^\* 1 FETCH \(FLAGS .* UID 1 MODSEQ \(3\)\)");

    let responses = client
        .ok("STORE 1:2 (UNCHANGEDSINCE 2) +FLAGS.SILENT (\\Seen)")
        .await;
    assert_has_line(&responses, r"^T\d+ OK \[MODIFIED 1\] ");

    let responses = client.ok("FETCH 2 FLAGS").await;
    assert_has_line(&responses, r"\\Seen");
}

#[tokio::test]
async fn qresync_reports_vanished() {
    let setup = set_up();
    let mut client = setup.connect("qresync");
    client.log_in().await;
    client.ok("ENABLE QRESYNC").await;
    for subject in &["a", "b", "c"] {
        client.append("INBOX", subject).await;
    }
    client.select("INBOX").await;

    client.ok("STORE 1,3 +FLAGS.SILENT (\\Deleted)").await;
    let responses = client.ok("EXPUNGE").await;
    assert_has_line(&responses, r"^\* VANISHED 1,3\r");
    assert_no_line(&responses, "EXPUNGE\r");
}

#[tokio::test]
async fn check_and_unselect() {
    let setup = set_up();
    let mut client = setup.connect("unselect");
    client.log_in().await;
    client.append("INBOX", "keep me").await;
    client.select("INBOX").await;

    client.ok("CHECK").await;
    client.ok("STORE 1 +FLAGS.SILENT (\\Deleted)").await;
    client.ok("UNSELECT").await;
    assert_tagged_bad(&client.command("CHECK").await);

    // UNSELECT does not expunge.
    let responses = client.select("INBOX").await;
    assert_has_line(&responses, r"^\* 1 EXISTS");
}

#[tokio::test]
async fn list_special_use() {
    let setup = set_up();
    let mut client = setup.connect("specialuse");
    client.log_in().await;
    client.ok("CREATE Plain").await;

    let responses = client.ok(r#"LIST (SPECIAL-USE) "" "*""#).await;
    assert_has_line(&responses, r"\\Drafts");
    assert_has_line(&responses, r"\\Junk");
    assert_no_line(&responses, "Plain");
}

#[tokio::test]
async fn compress_checks() {
    let setup = set_up();
    let mut client = setup.connect("compress");
    client.log_in().await;

    assert_tagged_bad(&client.command("COMPRESS LZ4").await);
    client.ok("NOOP").await;
}
