//! End-to-end tests against a live event loop on 127.0.0.1.
//!
//! Each test starts its own server on an ephemeral port. When the kernel
//! refuses to create an io_uring instance (seccomp, old kernel) the test
//! is skipped.

#![cfg(target_os = "linux")]

use delayed_echo::autotest::{self, AutotestConfig};
use delayed_echo::config::{ServerConfig, SocketConfig};
use delayed_echo::logger::TracingLogger;
use delayed_echo::protocols::{AnswerStrategy, EchoAnswer};
use delayed_echo::runtime::{EventLoop, SetupError};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const DELAY: Duration = Duration::from_millis(200);

fn server_config(buffer_size: usize, max_connections: usize) -> ServerConfig {
    ServerConfig {
        buffer_size,
        max_connections,
        delay: DELAY,
    }
}

/// Start a server on a background thread; `None` if io_uring is unavailable.
fn start_with<A>(server: ServerConfig, answer: A) -> Option<SocketAddr>
where
    A: AnswerStrategy + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let socket = SocketConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            backlog: 16,
        };
        match EventLoop::new(&socket, &server, answer, TracingLogger) {
            Ok(event_loop) => {
                tx.send(event_loop.local_addr().map_err(SetupError::Socket))
                    .unwrap();
                let _ = event_loop.run();
            }
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
    });

    match rx.recv().unwrap() {
        Ok(addr) => Some(addr),
        Err(SetupError::RingInit(e)) => {
            eprintln!("skipping: io_uring unavailable: {}", e);
            None
        }
        Err(e) => panic!("server setup failed: {}", e),
    }
}

fn start(server: ServerConfig) -> Option<SocketAddr> {
    start_with(server, EchoAnswer)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
}

/// Send `msg`, read `expected_len` bytes back, return them with the elapsed time.
fn exchange(stream: &mut TcpStream, msg: &[u8], expected_len: usize) -> (Vec<u8>, Duration) {
    let started = Instant::now();
    stream.write_all(msg).unwrap();
    let mut buf = vec![0u8; expected_len];
    stream.read_exact(&mut buf).unwrap();
    (buf, started.elapsed())
}

#[test]
fn test_hello_sequence_on_one_connection() {
    let Some(addr) = start(server_config(1024, 16)) else {
        return;
    };
    let mut stream = connect(addr);

    for index in 1..=3 {
        let hello = autotest::message(index, 1);
        let (answer, elapsed) = exchange(&mut stream, hello.as_bytes(), hello.len());
        assert_eq!(answer, hello.as_bytes());
        assert!(elapsed >= DELAY, "answered after {:?}", elapsed);
    }
}

#[test]
fn test_concurrent_clients_without_crosstalk() {
    let Some(addr) = start(server_config(1024, 16)) else {
        return;
    };

    let config = AutotestConfig {
        addr,
        clients: 3,
        messages: 3,
        min_delay: DELAY,
        timeout: Duration::from_secs(10),
    };
    let report = tokio_test::block_on(autotest::run(&config)).unwrap();

    assert_eq!(report.exchanges.len(), 9);
    assert!(report.fastest().unwrap() >= DELAY);
}

#[test]
fn test_message_at_capacity_is_echoed_in_full() {
    let Some(addr) = start(server_config(16, 4)) else {
        return;
    };
    let mut stream = connect(addr);

    let msg = b"0123456789abcdef";
    let (answer, _) = exchange(&mut stream, msg, msg.len());
    assert_eq!(&answer, msg);
}

#[test]
fn test_oversized_message_is_answered_per_buffer() {
    let Some(addr) = start(server_config(8, 4)) else {
        return;
    };
    let mut stream = connect(addr);

    let started = Instant::now();
    stream.write_all(b"abcdefghijkl").unwrap();

    // Each answer is bounded by the buffer; the tail is its own message
    let mut first = [0u8; 8];
    stream.read_exact(&mut first).unwrap();
    assert_eq!(&first, b"abcdefgh");

    let mut rest = [0u8; 4];
    stream.read_exact(&mut rest).unwrap();
    assert_eq!(&rest, b"ijkl");
    assert!(started.elapsed() >= DELAY * 2);
}

#[test]
fn test_disconnect_does_not_affect_others() {
    let Some(addr) = start(server_config(1024, 16)) else {
        return;
    };

    let mut survivor = connect(addr);

    // Closes while its answer is still pending
    let mut leaver = connect(addr);
    leaver.write_all(b"gone before the answer").unwrap();
    drop(leaver);

    // Closes without ever sending
    drop(connect(addr));

    // Let the pending answer hit the closed socket
    thread::sleep(DELAY * 2);

    let (answer, _) = exchange(&mut survivor, b"still here", 10);
    assert_eq!(&answer, b"still here");

    let mut newcomer = connect(addr);
    let (answer, _) = exchange(&mut newcomer, b"new", 3);
    assert_eq!(&answer, b"new");
}

#[test]
fn test_connection_limit_rejects_extra_clients() {
    let Some(addr) = start(server_config(64, 1)) else {
        return;
    };

    let mut first = connect(addr);
    let (answer, _) = exchange(&mut first, b"one", 3);
    assert_eq!(&answer, b"one");

    // The server accepts and immediately closes the second client
    let mut second = connect(addr);
    let mut buf = [0u8; 8];
    match second.read(&mut buf) {
        Ok(0) => {}
        Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) => {}
        other => panic!("expected the server to close the connection, got {:?}", other),
    }

    // The admitted client is unaffected
    let (answer, _) = exchange(&mut first, b"two", 3);
    assert_eq!(&answer, b"two");

    // Its slot is reusable once it leaves
    drop(first);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut third = connect(addr);
        third.write_all(b"three").unwrap();
        let mut answer = [0u8; 5];
        match third.read_exact(&mut answer) {
            Ok(()) => {
                assert_eq!(&answer, b"three");
                break;
            }
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Err(e) => panic!("slot was never released: {}", e),
        }
    }
}

#[test]
fn test_custom_answer_strategy() {
    struct Uppercase;

    impl AnswerStrategy for Uppercase {
        fn answer(&self, input: &[u8], output: &mut [u8]) -> usize {
            let len = input.len().min(output.len());
            for (out, byte) in output.iter_mut().zip(&input[..len]) {
                *out = byte.to_ascii_uppercase();
            }
            len
        }
    }

    let Some(addr) = start_with(server_config(64, 4), Uppercase) else {
        return;
    };
    let mut stream = connect(addr);

    let (answer, elapsed) = exchange(&mut stream, b"shout", 5);
    assert_eq!(&answer, b"SHOUT");
    assert!(elapsed >= DELAY);
}
