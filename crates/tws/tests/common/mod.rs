//! In-process fake TWS server for client tests.
//!
//! Speaks the real framing: accepts the `API\0` handshake, replies with a
//! server version, answers START_API with NEXT_VALID_ID, then hands every
//! further request to a test-supplied handler.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chaindesk_tws::codec::TwsCodec;
use chaindesk_tws::TwsConfig;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

pub const SERVER_VERSION: i32 = 157;
pub const FIRST_ORDER_ID: i64 = 100;

/// What the fake server does with one request.
pub enum Reply {
    Frames(Vec<Vec<String>>),
    /// Drop the socket.
    Close,
}

pub type Handler = Arc<dyn Fn(&[String]) -> Reply + Send + Sync>;

pub fn frame(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Handler that never answers.
pub fn silent() -> Handler {
    Arc::new(|_| Reply::Frames(Vec::new()))
}

pub struct FakeTws {
    pub port: u16,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl FakeTws {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&handler), Arc::clone(&log)));
            }
        });

        Self {
            port,
            received,
            accept_task,
        }
    }

    /// Client settings pointing at this server, with short timeouts.
    pub fn config(&self) -> TwsConfig {
        TwsConfig {
            port: self.port,
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
            snapshot_timeout: Duration::from_millis(300),
            ..TwsConfig::default()
        }
    }

    /// Every frame received so far, across connections.
    pub fn received(&self) -> Vec<Vec<String>> {
        self.received.lock().unwrap().clone()
    }

    /// Number of received frames whose message id is `msg_id`.
    pub fn count(&self, msg_id: &str) -> usize {
        self.received().iter().filter(|f| f[0] == msg_id).count()
    }
}

impl Drop for FakeTws {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(mut stream: TcpStream, handler: Handler, log: Arc<Mutex<Vec<Vec<String>>>>) {
    let mut magic = [0u8; 4];
    if stream.read_exact(&mut magic).await.is_err() || &magic != b"API\0" {
        return;
    }
    let Ok(len) = stream.read_u32().await else {
        return;
    };
    let mut range = vec![0u8; len as usize];
    if stream.read_exact(&mut range).await.is_err() {
        return;
    }

    let (rd, wr) = stream.into_split();
    let mut reader = FramedRead::new(rd, TwsCodec::new());
    let mut writer = FramedWrite::new(wr, TwsCodec::new());

    let version = SERVER_VERSION.to_string();
    let first_order_id = FIRST_ORDER_ID.to_string();
    let hello = frame(&[version.as_str(), "20250514 09:30:00 EST"]);
    if writer.send(hello).await.is_err() {
        return;
    }

    while let Some(Ok(fields)) = reader.next().await {
        log.lock().unwrap().push(fields.clone());

        let reply = if fields[0] == "71" {
            Reply::Frames(vec![
                frame(&["15", "1", "DU123456"]),
                frame(&["9", "1", first_order_id.as_str()]),
                frame(&["4", "2", "-1", "2104", "Market data farm connection is OK:usfarm"]),
            ])
        } else {
            handler(&fields)
        };

        match reply {
            Reply::Frames(frames) => {
                for f in frames {
                    if writer.send(f).await.is_err() {
                        return;
                    }
                }
            }
            Reply::Close => return,
        }
    }
}
