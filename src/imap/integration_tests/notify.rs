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
async fn changes_reach_other_sessions() {
    let setup = set_up();
    let mut writer = setup.connect("nwriter");
    writer.log_in().await;
    writer.select("INBOX").await;

    let mut watcher = setup.connect("nwatcher");
    watcher.log_in().await;
    watcher.select("INBOX").await;

    writer.append("INBOX", "news").await;
    let responses = watcher.ok("NOOP").await;
    assert_has_line(&responses, r"^\* 1 EXISTS\r");
    assert_has_line(&responses, r"^\* 1 RECENT\r");

    // The session that made the change hears about it at its next command
    // too.
    let responses = writer.ok("NOOP").await;
    assert_has_line(&responses, r"^\* 1 EXISTS\r");

    writer.ok("STORE 1 +FLAGS.SILENT (\\Flagged)").await;
    let responses = watcher.ok("NOOP").await;
    assert_has_line(&responses, r"^\* 1 FETCH \(FLAGS \(.*\\Flagged.*\) UID 1\)");

    writer.ok("STORE 1 +FLAGS.SILENT (\\Deleted)").await;
    writer.ok("EXPUNGE").await;
    let responses = watcher.ok("NOOP").await;
    assert_has_line(&responses, r"^\* 1 EXPUNGE\r");
}

#[tokio::test]
async fn expunge_is_deferred_during_fetch() {
    let setup = set_up();
    let mut writer = setup.connect("dwriter");
    writer.log_in().await;
    writer.append("INBOX", "one").await;
    writer.append("INBOX", "two").await;
    writer.select("INBOX").await;

    let mut watcher = setup.connect("dwatcher");
    watcher.log_in().await;
    watcher.select("INBOX").await;

    writer.ok("STORE 1 +FLAGS.SILENT (\\Deleted)").await;
    writer.ok("EXPUNGE").await;

    // Sequence numbers must stay stable across FETCH, so the removal waits.
    let responses = watcher.ok("FETCH 2 UID").await;
    assert_no_line(&responses, "EXPUNGE");
    assert_has_line(&responses, r"^\* 2 FETCH \(UID 2\)");

    let responses = watcher.ok("NOOP").await;
    assert_has_line(&responses, r"^\* 1 EXPUNGE\r");
}

#[tokio::test]
async fn other_folders_are_not_reported_outside_idle() {
    let setup = set_up();
    let mut writer = setup.connect("owriter");
    writer.log_in().await;

    let mut watcher = setup.connect("owatcher");
    watcher.log_in().await;
    watcher.select("INBOX").await;

    writer.append("Archive", "elsewhere").await;
    let responses = watcher.ok("NOOP").await;
    assert_eq!(1, responses.len());
}

#[tokio::test]
async fn idle_pushes_changes() {
    let setup = set_up();
    let mut writer = setup.connect("iwriter");
    writer.log_in().await;
    writer.select("INBOX").await;

    let mut idler = setup.connect("iidler");
    idler.log_in().await;
    idler.select("INBOX").await;

    idler.write_raw(b"I1 IDLE\r\n").await;
    receive_line_like(&mut idler, r"^\+ idling\r\n$").await;

    writer.append("INBOX", "pushed").await;
    within("EXISTS", idler.read_until_like(r"^\* 1 EXISTS\r")).await;

    writer.ok("STORE 1 +FLAGS.SILENT (\\Seen)").await;
    within(
        "FETCH",
        idler.read_until_like(r"^\* 1 FETCH \(FLAGS \(.*\\Seen"),
    )
    .await;

    // Changes in other folders show up as STATUS while idling.
    writer.append("Archive", "status").await;
    within(
        "STATUS",
        idler.read_until_like(r"^\* STATUS Archive \(MESSAGES 1\)"),
    )
    .await;

    idler.write_raw(b"DONE\r\n").await;
    let responses = within("DONE", idler.responses_until("I1")).await;
    assert_tagged_ok(&responses);

    idler.ok("NOOP").await;
}

#[tokio::test]
async fn idle_requires_done() {
    let setup = set_up();
    let mut idler = setup.connect("idone");
    idler.log_in().await;
    idler.select("INBOX").await;

    idler.write_raw(b"I1 IDLE\r\n").await;
    receive_line_like(&mut idler, r"^\+ ").await;
    idler.write_raw(b"NOOP\r\n").await;
    assert_tagged_bad(&idler.responses_until("I1").await);

    idler.ok("NOOP").await;
}

#[tokio::test]
async fn deleting_selected_folder_ends_session() {
    let setup = set_up();
    let mut client = setup.connect("delsel");
    client.log_in().await;
    client.ok("CREATE Doomed").await;

    let mut victim = setup.connect("delselv");
    victim.log_in().await;
    victim.select("Doomed").await;

    client.ok("DELETE Doomed").await;

    victim.write_raw(b"V1 EXPUNGE\r\n").await;
    receive_line_like(&mut victim, r"^\* BYE ").await;
    assert_eq!("", victim.read_line().await);
}

#[tokio::test]
async fn sessions_leave_the_hub() {
    let setup = set_up();
    {
        let mut client = setup.connect("leave");
        client.log_in().await;
        client.select("INBOX").await;
        client.ok("LOGOUT").await;
        assert_eq!("", client.read_line().await);
    }

    // The session task finishes after closing the connection.
    for _ in 0..100 {
        if 0 == setup.server.active_connections() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(0, setup.server.active_connections());
    assert_eq!(
        0,
        setup.metrics.get(&format!(
            "subscriptions_active{{{}}}",
            setup.mailbox.id
        ))
    );
}
