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

use std::sync::Arc;

use super::defs::*;
use crate::support::system_config::SystemConfig;

#[tokio::test]
async fn greeting_and_logout() {
    let setup = set_up();
    let mut client = setup.connect("greet");

    receive_line_like(
        &mut client,
        r"^\* OK \[CAPABILITY IMAP4rev1 .*AUTH=PLAIN.*\] Mailvane IMAP ready\r\n$",
    )
    .await;

    let responses = client.command("LOGOUT").await;
    assert_has_line(&responses, r"^\* BYE ");
    assert_tagged_ok(&responses);
    assert_eq!("", client.read_line().await);
}

#[tokio::test]
async fn capabilities_follow_state() {
    let setup = set_up();
    let mut client = setup.connect("caps");
    client.skip_greeting().await;

    let responses = client.ok("CAPABILITY").await;
    assert_has_line(&responses, r"^\* CAPABILITY .*AUTH=LOGIN");
    assert_has_line(&responses, r"^\* CAPABILITY .*SASL-IR");

    client.ok(&format!("LOGIN {} {}", USER, PASSWORD)).await;
    let responses = client.ok("CAPABILITY").await;
    assert_no_line(&responses, "AUTH=");
    assert_has_line(&responses, r"^\* CAPABILITY .*IDLE");
}

#[tokio::test]
async fn login_failures() {
    let setup = set_up();
    let mut client = setup.connect("badlogin");
    client.skip_greeting().await;

    let responses = client
        .command(&format!("LOGIN {} wrong", USER))
        .await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[AUTHENTICATIONFAILED\]");

    // Indistinguishable from a wrong password.
    let responses = client.command("LOGIN nobody@example.com hunter2").await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[AUTHENTICATIONFAILED\]");

    // Still usable afterwards
    client.ok(&format!("LOGIN {} {}", USER, PASSWORD)).await;
    assert!(setup.directory.last_login(&setup.user.id).is_some());
}

#[tokio::test]
async fn authenticate_plain() {
    let setup = set_up();
    let mut client = setup.connect("authplain");
    client.skip_greeting().await;

    // \0azure@example.com\0hunter2
    let creds = base64::encode(format!("\0{}\0{}", USER, PASSWORD));
    client.write_raw(b"A1 AUTHENTICATE PLAIN\r\n").await;
    receive_line_like(&mut client, r"^\+ ").await;
    client.write_raw(format!("{}\r\n", creds).as_bytes()).await;
    let responses = client.responses_until("A1").await;
    assert_tagged_ok(&responses);

    client.select("INBOX").await;
}

#[tokio::test]
async fn authenticate_with_initial_response() {
    let setup = set_up();
    let mut client = setup.connect("authir");
    client.skip_greeting().await;

    let creds = base64::encode(format!("\0{}\0{}", USER, PASSWORD));
    client.ok(&format!("AUTHENTICATE PLAIN {}", creds)).await;
}

#[tokio::test]
async fn authenticate_cancelled() {
    let setup = set_up();
    let mut client = setup.connect("authcancel");
    client.skip_greeting().await;

    client.write_raw(b"A1 AUTHENTICATE PLAIN\r\n").await;
    receive_line_like(&mut client, r"^\+ ").await;
    client.write_raw(b"*\r\n").await;
    let responses = client.responses_until("A1").await;
    assert_tagged_bad(&responses);

    let responses = client.command("AUTHENTICATE CRAM-MD5").await;
    assert_tagged_no(&responses);
}

#[tokio::test]
async fn authenticate_login_mechanism() {
    let setup = set_up();
    let mut client = setup.connect("authlogin");
    client.skip_greeting().await;

    client.write_raw(b"A1 AUTHENTICATE LOGIN\r\n").await;
    receive_line_like(&mut client, r"^\+ ").await;
    client
        .write_raw(format!("{}\r\n", base64::encode(USER)).as_bytes())
        .await;
    receive_line_like(&mut client, r"^\+ ").await;
    client
        .write_raw(format!("{}\r\n", base64::encode(PASSWORD)).as_bytes())
        .await;
    assert_tagged_ok(&client.responses_until("A1").await);
}

#[tokio::test]
async fn commands_in_wrong_state() {
    let setup = set_up();
    let mut client = setup.connect("state");
    client.skip_greeting().await;

    assert_tagged_bad(&client.command("SELECT INBOX").await);
    assert_tagged_bad(&client.command("FETCH 1 FLAGS").await);

    client.ok(&format!("LOGIN {} {}", USER, PASSWORD)).await;
    assert_tagged_bad(&client.command("LOGIN x y").await);
    assert_tagged_bad(&client.command("FETCH 1 FLAGS").await);
    assert_tagged_bad(&client.command("IDLE").await);
    client.ok("NOOP").await;
}

#[tokio::test]
async fn bad_commands() {
    let setup = set_up();
    let mut client = setup.connect("bad");
    client.log_in().await;

    let responses = client.command("XYZZY").await;
    assert_tagged_bad(&responses);

    let responses = client.command("SELECT").await;
    assert_tagged_bad(&responses);

    client.write_raw(b"\r\n").await;
    receive_line_like(&mut client, r"^\* BAD ").await;

    client.ok("NOOP").await;
}

#[tokio::test]
async fn synchronising_literals() {
    let setup = set_up();
    let mut client = setup.connect("literal");
    client.log_in().await;

    client.write_raw(b"A1 CREATE {4}\r\n").await;
    receive_line_like(&mut client, r"^\+ ").await;
    client.write_raw(b"Work\r\n").await;
    assert_tagged_ok(&client.responses_until("A1").await);

    client.write_raw(b"A2 SELECT {4+}\r\nWork\r\n").await;
    assert_tagged_ok(&client.responses_until("A2").await);
}

#[tokio::test]
async fn connection_limit() {
    let mut config = SystemConfig::default();
    config.server.max_connections = 1;
    let setup = set_up_with(config, None);

    let mut first = setup.connect("first");
    first.skip_greeting().await;

    let mut second = setup.connect("second");
    receive_line_like(&mut second, r"^\* BYE Server busy, try again later\r\n$")
        .await;
    assert_eq!("", second.read_line().await);

    first.ok("NOOP").await;
    assert_eq!(1, setup.server.active_connections());
}

#[tokio::test]
async fn starttls_upgrade() {
    let mut config = SystemConfig::default();
    config.tls.enabled = true;
    config.tls.starttls = true;
    config.auth.require_encryption = true;
    let setup = set_up_with(config, Some(Arc::new(PassThroughTls)));

    let mut client = setup.connect("starttls");
    receive_line_like(&mut client, r"^\* OK \[CAPABILITY .*STARTTLS.*LOGINDISABLED")
        .await;

    let responses = client
        .command(&format!("LOGIN {} {}", USER, PASSWORD))
        .await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[PRIVACYREQUIRED\]");

    let responses = client.command("STARTTLS").await;
    assert_has_line(&responses, r"^T\d+ OK Begin TLS negotiation now");

    let responses = client.ok("CAPABILITY").await;
    assert_no_line(&responses, "STARTTLS");
    assert_no_line(&responses, "LOGINDISABLED");

    client.ok(&format!("LOGIN {} {}", USER, PASSWORD)).await;
    assert_tagged_bad(&client.command("STARTTLS").await);
}

#[tokio::test]
async fn bearer_authentication_requires_tls() {
    let mut config = SystemConfig::default();
    config.tls.enabled = true;
    config.tls.starttls = true;
    config.auth.require_encryption = true;
    config.oauth2.enabled = true;
    let setup = set_up_with(config, Some(Arc::new(PassThroughTls)));

    let mut client = setup.connect("bearerplain");
    client.skip_greeting().await;

    let responses = client.ok("CAPABILITY").await;
    assert_no_line(&responses, "AUTH=XOAUTH2");
    assert_no_line(&responses, "AUTH=OAUTHBEARER");

    let xoauth2 =
        base64::encode(format!("user={}\x01auth=Bearer tok\x01\x01", USER));
    let responses =
        client.command(&format!("AUTHENTICATE XOAUTH2 {}", xoauth2)).await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[PRIVACYREQUIRED\]");

    let oauthbearer = base64::encode("n,,\x01auth=Bearer tok\x01\x01");
    let responses = client
        .command(&format!("AUTHENTICATE OAUTHBEARER {}", oauthbearer))
        .await;
    assert_tagged_no(&responses);
    assert_has_line(&responses, r"\[PRIVACYREQUIRED\]");

    client.command("STARTTLS").await;
    let responses = client.ok("CAPABILITY").await;
    assert_has_line(&responses, "AUTH=XOAUTH2");
    assert_has_line(&responses, "AUTH=OAUTHBEARER");
}

#[tokio::test]
async fn starttls_not_offered() {
    let setup = set_up();
    let mut client = setup.connect("nostarttls");
    client.skip_greeting().await;

    assert_tagged_bad(&client.command("STARTTLS").await);
    client.ok("NOOP").await;
}

#[tokio::test]
async fn id_exchange() {
    let setup = set_up();
    let mut client = setup.connect("id");
    client.log_in().await;

    let responses = client.ok(r#"ID ("name" "Tester" "version" "1.0")"#).await;
    assert_has_line(&responses, r#"^\* ID \("name" "Mailvane" "version" ""#);

    let responses = client.ok("ID NIL").await;
    assert_has_line(&responses, r"^\* ID ");
}

#[tokio::test]
async fn commands_are_counted() {
    let setup = set_up();
    let mut client = setup.connect("metrics");
    client.log_in().await;
    client.ok("NOOP").await;
    client.ok("NOOP").await;

    assert_eq!(2, setup.metrics.get("commands_processed{NOOP}"));
    assert_eq!(1, setup.metrics.get("connections_total"));
}
