//! End-to-end tests: a real server on an ephemeral port, driven over TCP.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use godis::{AeLoop, Config, Server};

/// Starts a server on its own thread and returns the address it bound.
/// The loop runs until the test process exits.
fn start_server() -> SocketAddr {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let cfg = Config {
            port: 0,
            ..Config::default()
        };
        let mut server = Server::new(cfg).expect("server starts");
        let mut el = AeLoop::new();
        server.register(&mut el).expect("server registers");
        tx.send(server.local_addr()).expect("address sent");
        el.run(&mut server);
    });
    rx.recv_timeout(Duration::from_secs(5)).expect("server came up")
}

fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let conn = TcpStream::connect(addr)?;
    conn.set_read_timeout(Some(Duration::from_secs(2)))?;
    Ok(conn)
}

fn read_exact(conn: &mut TcpStream, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    conn.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn request(conn: &mut TcpStream, req: &[u8], expected: &str) -> Result<()> {
    conn.write_all(req)?;
    assert_eq!(read_exact(conn, expected.len())?, expected);
    Ok(())
}

/// True once the peer has closed: a read returns EOF or a reset.
fn is_closed(conn: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    match conn.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe),
    }
}

#[test]
fn test_set_get_expire_flow() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;

    request(&mut conn, b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n5\r\n", "+OK\r\n")?;
    request(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n", "$15\r\n")?;
    request(&mut conn, b"*3\r\n$6\r\nEXPIRE\r\n$1\r\nx\r\n$1\r\n0\r\n", "+OK\r\n")?;
    request(&mut conn, b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n", "$-1\r\n")?;
    Ok(())
}

#[test]
fn test_get_missing_key() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    request(&mut conn, b"GET nosuch\r\n", "$-1\r\n")
}

#[test]
fn test_pipelined_inline_commands() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    request(
        &mut conn,
        b"SET a 1\r\nSET b 22\r\nGET a\r\nGET b\r\n",
        "+OK\r\n+OK\r\n$11\r\n$222\r\n",
    )
}

#[test]
fn test_fragmented_bulk_command() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    conn.set_nodelay(true)?;

    for piece in [&b"*3\r\n$3\r\nS"[..], b"ET\r\n$3", b"\r\nkey\r", b"\n$5\r\nhel", b"lo\r\n"] {
        conn.write_all(piece)?;
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(read_exact(&mut conn, 5)?, "+OK\r\n");
    request(&mut conn, b"GET key\r\n", "$5hello\r\n")
}

#[test]
fn test_long_inline_value_round_trips() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    let value = "v".repeat(5000);

    request(&mut conn, format!("SET big {value}\r\n").as_bytes(), "+OK\r\n")?;
    request(&mut conn, b"GET big\r\n", &format!("$5000{value}\r\n"))
}

#[test]
fn test_command_errors_keep_connection() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;

    request(&mut conn, b"PING\r\n", "-ERR: unknown command 'PING'\r\n")?;
    request(
        &mut conn,
        b"GET a b\r\n",
        "-ERR: wrong number of arguments for 'GET'\r\n",
    )?;
    request(
        &mut conn,
        b"EXPIRE a later\r\n",
        "-ERR: value is not an integer or out of range\r\n",
    )?;
    request(&mut conn, b"set a v\r\n", "+OK\r\n")?;
    Ok(())
}

#[test]
fn test_empty_lines_are_ignored() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    request(&mut conn, b"\r\n*0\r\nGET a\r\n", "$-1\r\n")
}

#[test]
fn test_oversized_bulk_closes_connection() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;

    conn.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$999999999\r\n")?;
    assert!(is_closed(&mut conn));

    let mut other = connect(addr)?;
    request(&mut other, b"GET k\r\n", "$-1\r\n")
}

#[test]
fn test_quit_closes_connection() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    request(&mut conn, b"SET k v\r\n", "+OK\r\n")?;
    conn.write_all(b"QUIT\r\n")?;
    assert!(is_closed(&mut conn));

    let mut other = connect(addr)?;
    request(&mut other, b"GET k\r\n", "$1v\r\n")
}

#[test]
fn test_expire_in_future_then_lapse() -> Result<()> {
    let addr = start_server();
    let mut conn = connect(addr)?;
    request(&mut conn, b"SET t v\r\n", "+OK\r\n")?;
    request(&mut conn, b"EXPIRE t 1\r\n", "+OK\r\n")?;
    request(&mut conn, b"GET t\r\n", "$1v\r\n")?;

    thread::sleep(Duration::from_millis(1200));
    request(&mut conn, b"GET t\r\n", "$-1\r\n")
}
