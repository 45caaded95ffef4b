//! Multi-client autotest for a running delayed echo server.
//!
//! Each client opens its own connection and sends a short sequence of
//! numbered messages, waiting for every answer before sending the next.
//! An exchange passes when the answer matches the message byte for byte
//! and did not arrive before the server's configured delay.

use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::info;

/// Autotest parameters.
#[derive(Debug, Clone)]
pub struct AutotestConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Number of concurrent clients.
    pub clients: usize,
    /// Messages sent by each client.
    pub messages: usize,
    /// Minimum time an answer may take.
    pub min_delay: Duration,
    /// Upper bound on waiting for a single answer.
    pub timeout: Duration,
}

impl Default for AutotestConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7050)),
            clients: 3,
            messages: 3,
            min_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Message `index` of client `instance`, both 1-based.
pub fn message(index: usize, instance: usize) -> String {
    format!("Hello, world! #{}({})", index, instance)
}

/// One successful request/answer round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub instance: usize,
    pub index: usize,
    pub elapsed: Duration,
}

/// Outcome of a passing run.
#[derive(Debug, Default)]
pub struct Report {
    pub exchanges: Vec<Exchange>,
}

impl Report {
    /// Fastest observed answer, if any.
    pub fn fastest(&self) -> Option<Duration> {
        self.exchanges.iter().map(|e| e.elapsed).min()
    }

    /// Slowest observed answer, if any.
    pub fn slowest(&self) -> Option<Duration> {
        self.exchanges.iter().map(|e| e.elapsed).max()
    }
}

/// Autotest failures
#[derive(Debug)]
pub enum AutotestError {
    Connect(SocketAddr, io::Error),
    Io { instance: usize, source: io::Error },
    /// Server closed the connection before answering.
    Closed { instance: usize, index: usize },
    Timeout { instance: usize, index: usize },
    Mismatch {
        instance: usize,
        expected: String,
        received: String,
    },
    /// Answer arrived before the configured delay.
    TooEarly {
        instance: usize,
        index: usize,
        elapsed: Duration,
        min_delay: Duration,
    },
    Join(String),
}

impl fmt::Display for AutotestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutotestError::Connect(addr, e) => write!(f, "Failed to connect to {}: {}", addr, e),
            AutotestError::Io { instance, source } => {
                write!(f, "Client {}: I/O error: {}", instance, source)
            }
            AutotestError::Closed { instance, index } => {
                write!(f, "Client {}: connection closed before answer #{}", instance, index)
            }
            AutotestError::Timeout { instance, index } => {
                write!(f, "Client {}: no answer to message #{}", instance, index)
            }
            AutotestError::Mismatch {
                instance,
                expected,
                received,
            } => write!(
                f,
                "Client {}: test failed: \"{}\" received, expected \"{}\"",
                instance, received, expected
            ),
            AutotestError::TooEarly {
                instance,
                index,
                elapsed,
                min_delay,
            } => write!(
                f,
                "Client {}: answer #{} after {:?}, expected at least {:?}",
                instance, index, elapsed, min_delay
            ),
            AutotestError::Join(msg) => write!(f, "Client task failed: {}", msg),
        }
    }
}

impl std::error::Error for AutotestError {}

/// Run all clients concurrently and collect their exchanges.
///
/// Fails with the first error any client reports.
pub async fn run(config: &AutotestConfig) -> Result<Report, AutotestError> {
    let mut clients = JoinSet::new();

    for instance in 1..=config.clients {
        let config = config.clone();
        clients.spawn(async move { run_client(instance, &config).await });
    }

    let mut exchanges = Vec::with_capacity(config.clients * config.messages);
    while let Some(joined) = clients.join_next().await {
        let client = joined.map_err(|e| AutotestError::Join(e.to_string()))??;
        exchanges.extend(client);
    }

    exchanges.sort_by_key(|e| (e.instance, e.index));
    Ok(Report { exchanges })
}

/// Run the message sequence for a single client.
pub async fn run_client(
    instance: usize,
    config: &AutotestConfig,
) -> Result<Vec<Exchange>, AutotestError> {
    let mut stream = TcpStream::connect(config.addr)
        .await
        .map_err(|e| AutotestError::Connect(config.addr, e))?;
    let mut buffer = BytesMut::with_capacity(1024);
    let mut exchanges = Vec::with_capacity(config.messages);

    for index in 1..=config.messages {
        let hello = message(index, instance);
        let started = Instant::now();

        stream
            .write_all(hello.as_bytes())
            .await
            .map_err(|source| AutotestError::Io { instance, source })?;
        info!(instance, "Sent: {}", hello);

        buffer.clear();
        let answered = tokio::time::timeout(config.timeout, async {
            while buffer.len() < hello.len() {
                if stream.read_buf(&mut buffer).await? == 0 {
                    return Ok(false);
                }
            }
            Ok::<_, io::Error>(true)
        })
        .await;

        match answered {
            Err(_) => return Err(AutotestError::Timeout { instance, index }),
            Ok(Err(source)) => return Err(AutotestError::Io { instance, source }),
            Ok(Ok(false)) => return Err(AutotestError::Closed { instance, index }),
            Ok(Ok(true)) => {}
        }

        let elapsed = started.elapsed();
        let received = String::from_utf8_lossy(&buffer).into_owned();
        info!(instance, elapsed_ms = elapsed.as_millis() as u64, "Received: {}", received);

        if buffer[..] != *hello.as_bytes() {
            return Err(AutotestError::Mismatch {
                instance,
                expected: hello,
                received,
            });
        }
        if elapsed < config.min_delay {
            return Err(AutotestError::TooEarly {
                instance,
                index,
                elapsed,
                min_delay: config.min_delay,
            });
        }

        info!(instance, index, "Test passed");
        exchanges.push(Exchange {
            instance,
            index,
            elapsed,
        });
    }

    Ok(exchanges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_format() {
        assert_eq!(message(1, 1), "Hello, world! #1(1)");
        assert_eq!(message(3, 2), "Hello, world! #3(2)");
    }

    #[test]
    fn test_report_bounds() {
        let report = Report {
            exchanges: vec![
                Exchange {
                    instance: 1,
                    index: 1,
                    elapsed: Duration::from_millis(120),
                },
                Exchange {
                    instance: 2,
                    index: 1,
                    elapsed: Duration::from_millis(80),
                },
            ],
        };
        assert_eq!(report.fastest(), Some(Duration::from_millis(80)));
        assert_eq!(report.slowest(), Some(Duration::from_millis(120)));
        assert_eq!(Report::default().fastest(), None);
    }

    #[test]
    fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening there
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = AutotestConfig {
            addr,
            clients: 1,
            messages: 1,
            ..AutotestConfig::default()
        };

        let err = tokio_test::block_on(run(&config)).unwrap_err();
        assert!(matches!(err, AutotestError::Connect(..)));
    }

    #[test]
    fn test_detects_early_answer() {
        // A plain echo with no delay must be flagged
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 64];
                let n = socket.read(&mut buf).await.unwrap();
                socket.write_all(&buf[..n]).await.unwrap();
            });

            let config = AutotestConfig {
                addr,
                clients: 1,
                messages: 1,
                min_delay: Duration::from_secs(60),
                timeout: Duration::from_secs(5),
            };
            let err = run_client(1, &config).await.unwrap_err();
            assert!(matches!(err, AutotestError::TooEarly { index: 1, .. }));
        });
    }
}
