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
async fn list_default_folders() {
    let setup = set_up();
    let mut client = setup.connect("listdef");
    client.log_in().await;

    let responses = client.ok(r#"LIST "" "*""#).await;
    assert_has_line(&responses, r#"^\* LIST \(\\HasNoChildren\) "/" "?INBOX"?\r"#);
    assert_has_line(&responses, r#"^\* LIST \(\\HasNoChildren \\Sent\) "/" "?Sent"?\r"#);
    assert_has_line(&responses, r#"^\* LIST \(\\HasNoChildren \\Trash\) "/" "?Trash"?\r"#);

    let responses = client.ok(r#"LIST "" """#).await;
    assert_has_line(&responses, r#"^\* LIST \(\\Noselect\) "/" ""\r"#);
}

#[tokio::test]
async fn create_list_delete() {
    let setup = set_up();
    let mut client = setup.connect("cld");
    client.log_in().await;

    client.ok("CREATE Projects/Alpha").await;
    let responses = client.ok(r#"LIST "" "Projects*""#).await;
    assert_has_line(&responses, r#"\\HasChildren.*"?Projects"?\r"#);
    assert_has_line(&responses, r#"\\HasNoChildren.*"?Projects/Alpha"?\r"#);

    let responses = client.ok(r#"LIST "" "Projects/%""#).await;
    assert_eq!(2, responses.len());

    let responses = client.command("CREATE Projects/Alpha").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[ALREADYEXISTS\]");

    // A mailbox with inferiors is not deleted.
    let responses = client.command("DELETE Projects").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[HASCHILDREN\]");

    client.ok("DELETE Projects/Alpha").await;
    client.ok("DELETE Projects").await;
    let responses = client.ok(r#"LIST "" "Projects*""#).await;
    assert_eq!(1, responses.len());

    let responses = client.command("DELETE Nonexistent").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[NONEXISTENT\]");
}

#[tokio::test]
async fn special_folders_are_protected() {
    let setup = set_up();
    let mut client = setup.connect("protect");
    client.log_in().await;

    let responses = client.command("DELETE INBOX").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[CANNOT\]");

    let responses = client.command("DELETE Trash").await;
    assert_tagged_no(&responses);

    let responses = client.command("RENAME INBOX Old").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[CANNOT\]");
}

#[tokio::test]
async fn rename_moves_children() {
    let setup = set_up();
    let mut client = setup.connect("rename");
    client.log_in().await;

    client.ok("CREATE Old/Child").await;
    client.ok("RENAME Old New").await;

    let responses = client.ok(r#"LIST "" "*""#).await;
    assert_has_line(&responses, r#""?New/Child"?\r"#);
    assert_no_line(&responses, "Old");

    let responses = client.command("RENAME New New/Inner").await;
    assert_tagged_no(&responses);
}

#[tokio::test]
async fn subscriptions() {
    let setup = set_up();
    let mut client = setup.connect("subs");
    client.log_in().await;

    client.ok("CREATE Lists").await;
    client.ok("UNSUBSCRIBE Lists").await;
    let responses = client.ok(r#"LSUB "" "*""#).await;
    assert_no_line(&responses, "Lists");

    client.ok("SUBSCRIBE Lists").await;
    let responses = client.ok(r#"LSUB "" "*""#).await;
    assert_has_line(&responses, r#"^\* LSUB .*"?Lists"?\r"#);

    let responses = client.ok(r#"LIST (SUBSCRIBED) "" "*""#).await;
    assert_has_line(&responses, r#"\\Subscribed.*"?Lists"?\r"#);
}

#[tokio::test]
async fn select_and_examine() {
    let setup = set_up();
    let mut client = setup.connect("select");
    client.log_in().await;
    client.append("INBOX", "first").await;
    client.append("INBOX", "second").await;

    let responses = client.select("INBOX").await;
    assert_has_line(&responses, r"^\* FLAGS \(");
    assert_has_line(&responses, r"^\* 2 EXISTS\r");
    assert_has_line(&responses, r"^\* 2 RECENT\r");
    assert_has_line(&responses, r"^\* OK \[UIDVALIDITY \d+\]");
    assert_has_line(&responses, r"^\* OK \[UIDNEXT 3\]");
    assert_has_line(&responses, r"^\* OK \[UNSEEN 1\]");
    assert_has_line(&responses, r"^\* OK \[PERMANENTFLAGS \(.*\\\*\)\]");
    assert_has_line(&responses, r"^T\d+ OK \[READ-WRITE\] SELECT completed");

    let responses = client.ok("EXAMINE INBOX").await;
    assert_has_line(&responses, r"^T\d+ OK \[READ-ONLY\] EXAMINE completed");
    assert_tagged_no(&client.command("STORE 1 +FLAGS (\\Seen)").await);

    let responses = client.command("SELECT Nowhere").await;
    assert_tagged_no(&responses);
    // A failed SELECT leaves nothing selected.
    assert_tagged_bad(&client.command("FETCH 1 FLAGS").await);
}

#[tokio::test]
async fn status() {
    let setup = set_up();
    let mut client = setup.connect("status");
    client.log_in().await;
    client.append("Archive", "one").await;

    let responses = client
        .ok("STATUS Archive (MESSAGES UIDNEXT UNSEEN RECENT)")
        .await;
    assert_has_line(
        &responses,
        r#"^\* STATUS "?Archive"? \(MESSAGES 1 UIDNEXT 2 UNSEEN 1 RECENT 1\)"#,
    );

    let responses = client.ok(r#"LIST "" "Arch*" RETURN (STATUS (MESSAGES))"#).await;
    assert_has_line(&responses, r#"^\* STATUS "?Archive"? \(MESSAGES 1\)"#);
}

#[tokio::test]
async fn namespace_unified() {
    let setup = set_up();
    let mut client = setup.connect("ns");
    client.log_in().await;

    let responses = client.ok("NAMESPACE").await;
    assert_has_line(&responses, r#"^\* NAMESPACE \(\(""\s+"/"\)\)"#);
}

#[tokio::test]
async fn shared_mailboxes() {
    use crate::account::model::Permissions;

    let setup = set_up();
    let owner = setup
        .directory
        .add_user("org", "team-owner@example.com", PASSWORD, Default::default())
        .unwrap();
    let team = setup
        .directory
        .add_mailbox(&owner.id, "team@example.com", true);
    setup
        .directory
        .share(&team.id, &setup.user.id, Permissions::READ);
    setup
        .directory
        .deliver(&team.id, "INBOX", make_message("shared", "x\r\n").as_bytes())
        .unwrap();

    let mut client = setup.connect("shared");
    client.log_in().await;

    let responses = client.ok(r#"LIST "" "Shared/*""#).await;
    assert_has_line(&responses, r#""?Shared/team@example.com/INBOX"?\r"#);

    let responses = client.ok("EXAMINE Shared/team@example.com/INBOX").await;
    assert_has_line(&responses, r"^\* 1 EXISTS");

    // Read-only access
    assert_tagged_no(&client.command("CREATE Shared/team@example.com/New").await);
    let responses = client.ok("GETQUOTAROOT Shared/team@example.com/INBOX").await;
    assert_has_line(&responses, r#"^\* QUOTAROOT "?Shared/team@example.com/INBOX"?\r"#);
}
