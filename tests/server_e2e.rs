//! End-to-end runs of the connection pipeline over in-memory and TCP
//! transports.

mod common;

use std::time::Duration;

use common::{fast_config, read_until};
use doorway::config::Config;
use doorway::server::{serve_connection, DoorServer, ServerContext};
use doorway::session::SessionRegistry;
use doorway::terminal::TransportKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(5);

/// Open an in-memory connection served by `ctx`; returns the client end.
fn connect(ctx: &ServerContext) -> DuplexStream {
    let (client, server) = tokio::io::duplex(8192);
    let (reader, writer) = tokio::io::split(server);
    tokio::spawn(serve_connection(ctx.clone(), TransportKind::Raw, None, reader, writer));
    client
}

/// Log in as `handle` and wait for the lobby prompt.
async fn login(client: &mut DuplexStream, handle: &str) -> String {
    read_until(client, b"Handle: ", WAIT).await;
    client
        .write_all(format!("{handle}\r\n").as_bytes())
        .await
        .unwrap();
    let seen = read_until(client, b"> ", WAIT).await;
    String::from_utf8_lossy(&seen).into_owned()
}

async fn wait_detached(registry: &SessionRegistry, handle: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let detached = registry
            .lookup_by_handle(handle)
            .iter()
            .any(|session| session.terminal_count() == 0);
        if detached {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "{handle} never detached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_login_reaches_lobby() {
    let ctx = ServerContext::new(fast_config());
    let mut client = connect(&ctx);

    let screen = login(&mut client, "alice").await;
    assert!(screen.contains("Welcome, alice."), "screen: {screen:?}");
    assert!(screen.contains("Who's online:"));

    let sessions = ctx.registry.list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].handle.as_deref(), Some("alice"));
    assert_eq!(sessions[0].activity, "lobby");
}

#[tokio::test]
async fn test_invalid_handle_is_asked_again() {
    let ctx = ServerContext::new(fast_config());
    let mut client = connect(&ctx);

    read_until(&mut client, b"Handle: ", WAIT).await;
    client.write_all(b"no spaces\r\n").await.unwrap();
    read_until(&mut client, b"letters, digits", WAIT).await;
    read_until(&mut client, b"Handle: ", WAIT).await;
    client.write_all(b"ok_name\r\n").await.unwrap();
    read_until(&mut client, b"Welcome, ok_name.", WAIT).await;
}

#[tokio::test]
async fn test_chat_between_two_users() {
    let ctx = ServerContext::new(fast_config());
    let mut alice = connect(&ctx);
    login(&mut alice, "alice").await;

    let mut bob = connect(&ctx);
    login(&mut bob, "bob").await;
    read_until(&mut alice, b"*** bob has logged in", WAIT).await;

    bob.write_all(b"hello there\r\n").await.unwrap();
    read_until(&mut alice, b"<bob> hello there", WAIT).await;

    alice.write_all(b"/page bob psst\r\n").await.unwrap();
    read_until(&mut bob, b"*alice* psst", WAIT).await;
}

#[tokio::test]
async fn test_detach_then_resume() {
    let ctx = ServerContext::new(fast_config());
    let mut first = connect(&ctx);
    login(&mut first, "carol").await;

    first.write_all(b"/bye\r\n").await.unwrap();
    read_until(&mut first, b"See you.", WAIT).await;
    wait_detached(&ctx.registry, "carol").await;
    let original = ctx.registry.lookup_by_handle("carol")[0].id();

    let mut second = connect(&ctx);
    read_until(&mut second, b"Handle: ", WAIT).await;
    second.write_all(b"carol\r\n").await.unwrap();
    let menu = read_until(&mut second, b"Choice: ", WAIT).await;
    let menu = String::from_utf8_lossy(&menu);
    assert!(menu.contains("1) Resume session"), "menu: {menu:?}");
    assert!(menu.contains("2) Start a new session"));

    second.write_all(b"1").await.unwrap();
    read_until(&mut second, b"Session resumed.", WAIT).await;
    read_until(&mut second, b"> ", WAIT).await;

    let carols = ctx.registry.lookup_by_handle("carol");
    assert_eq!(carols.len(), 1);
    assert_eq!(carols[0].id(), original);
    assert_eq!(carols[0].terminal_count(), 1);
}

#[tokio::test]
async fn test_quit_ends_session() {
    let ctx = ServerContext::new(fast_config());
    let mut client = connect(&ctx);
    login(&mut client, "dora").await;

    client.write_all(b"/quit\r\n").await.unwrap();
    read_until(&mut client, b"Goodbye.", WAIT).await;

    let deadline = tokio::time::Instant::now() + WAIT;
    while !ctx.registry.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "session survived /quit");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_hangup_during_login_leaves_nothing_behind() {
    let ctx = ServerContext::new(fast_config());
    let mut client = connect(&ctx);
    read_until(&mut client, b"Handle: ", WAIT).await;
    drop(client);

    let deadline = tokio::time::Instant::now() + WAIT;
    while !ctx.registry.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "provisional session leaked");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_terminal_count(registry: &SessionRegistry, handle: &str, count: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let sessions = registry.lookup_by_handle(handle);
        if sessions.iter().any(|session| session.terminal_count() == count) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{handle} never reached {count} terminal(s)"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_hijacker_hangup_leaves_owner_connected() {
    let mut config = fast_config();
    config.server.operators = vec!["root".to_string()];
    let ctx = ServerContext::new(config);

    let mut owner = connect(&ctx);
    login(&mut owner, "frank").await;
    let mut operator = connect(&ctx);
    login(&mut operator, "root").await;

    operator.write_all(b"/hijack frank\r\n").await.unwrap();
    read_until(&mut operator, b"Done.", WAIT).await;
    wait_terminal_count(&ctx.registry, "frank", 2).await;

    drop(operator);
    wait_terminal_count(&ctx.registry, "frank", 1).await;

    // The owner's connection still reads input and can detach normally.
    owner.write_all(b"/bye\r\n").await.unwrap();
    read_until(&mut owner, b"See you.", WAIT).await;
    wait_detached(&ctx.registry, "frank").await;
    let frank = ctx.registry.lookup_by_handle("frank");
    assert_eq!(frank.len(), 1);
    assert_eq!(frank[0].terminal_count(), 0);
}

// -- TCP ----------------------------------------------------------------------

fn tcp_config(max_connections: usize) -> Config {
    let mut config = fast_config();
    config.server.max_connections = max_connections;
    config.server.shutdown_grace_seconds = 2;
    config
}

#[tokio::test]
async fn test_tcp_server_serves_and_shuts_down() {
    let mut server = DoorServer::new(ServerContext::new(tcp_config(8)));
    let addr = server.bind().await.unwrap();
    let shutdown = server.context().shutdown.clone();
    let registry = server.context().registry.clone();
    let running = tokio::spawn(server.run());

    let mut client = TcpStream::connect(addr).await.unwrap();
    read_until(&mut client, b"Handle: ", WAIT).await;
    client.write_all(b"erin\r\n").await.unwrap();
    read_until(&mut client, b"Welcome, erin.", WAIT).await;
    assert_eq!(registry.len(), 1);

    shutdown.signal_shutdown();
    tokio::time::timeout(WAIT, running)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
    assert!(registry.is_empty());
    assert_eq!(shutdown.active_connections(), 0);
}

#[tokio::test]
async fn test_tcp_server_refuses_when_full() {
    let mut server = DoorServer::new(ServerContext::new(tcp_config(1)));
    let addr = server.bind().await.unwrap();
    let shutdown = server.context().shutdown.clone();
    let running = tokio::spawn(server.run());

    let mut first = TcpStream::connect(addr).await.unwrap();
    read_until(&mut first, b"Handle: ", WAIT).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut refused = Vec::new();
    tokio::time::timeout(WAIT, second.read_to_end(&mut refused))
        .await
        .expect("refused connection should close")
        .unwrap();
    assert!(String::from_utf8_lossy(&refused).contains("Too many users"));

    shutdown.signal_shutdown();
    tokio::time::timeout(WAIT, running)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_run_without_bind_fails() {
    let server = DoorServer::new(ServerContext::new(fast_config()));
    assert!(server.run().await.is_err());
}
