//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use lounge::{ChatClient, ChatServer, ChatService, ClientEvent, Config};

/// Default timeout for anything a test waits on.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test server wrapper that runs a chat service on an ephemeral port.
pub struct TestServer {
    addr: SocketAddr,
    service: Arc<ChatService>,
    temp_dir: TempDir,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with the test configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Start a server after letting the caller adjust the test configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = test_config(&temp_dir);
        adjust(&mut config);

        let service = ChatService::from_config(&config).expect("Failed to build service");
        let server = ChatServer::bind(&config.server)
            .await
            .expect("Failed to bind server");
        let addr = server.local_addr().expect("Failed to get local address");

        let running = Arc::clone(&service);
        let handle = tokio::spawn(async move {
            let _ = server.run(running).await;
        });

        Self {
            addr,
            service,
            temp_dir,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn service(&self) -> &Arc<ChatService> {
        &self.service
    }

    /// Directory a named client keeps its local files in.
    pub fn client_dir(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("clients").join(name)
    }

    /// Scratch directory for files a test wants to upload.
    pub fn scratch_dir(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("scratch");
        std::fs::create_dir_all(&dir).expect("Failed to create scratch dir");
        dir
    }

    /// Path of a file as stored by the service.
    pub fn stored_file(&self, room: &str, name: &str) -> PathBuf {
        self.temp_dir.path().join("server").join(room).join(name)
    }

    /// Connect a client and wait for its welcome.
    pub async fn connect(&self, name: &str) -> ChatClient {
        with_timeout(ChatClient::connect(self.addr, self.client_dir(name)))
            .await
            .expect("Failed to connect client")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Configuration rooted in `temp_dir`, listening on an ephemeral port.
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.server.max_connections = 16;
    config.files.storage_path = temp_dir
        .path()
        .join("server")
        .to_string_lossy()
        .into_owned();
    config.logging.file = String::new();
    config
}

/// Await `fut`, panicking if it takes longer than [`DEFAULT_TIMEOUT`].
pub async fn with_timeout<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(DEFAULT_TIMEOUT, fut)
        .await
        .expect("Timed out")
}

/// Next event on `client`, failing the test if none arrives in time.
pub async fn next_event(client: &mut ChatClient) -> ClientEvent {
    with_timeout(client.next_event())
        .await
        .expect("Event stream ended")
}

/// Skip events until one matches `pred`, and return it.
pub async fn wait_for<P>(client: &mut ChatClient, mut pred: P) -> ClientEvent
where
    P: FnMut(&ClientEvent) -> bool,
{
    with_timeout(async {
        loop {
            match client.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("Event stream ended"),
            }
        }
    })
    .await
}

/// Assert that no event arrives within `window`.
pub async fn assert_quiet(client: &mut ChatClient, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, client.next_event()).await {
        panic!("Unexpected event: {event:?}");
    }
}

/// Poll `check` until it holds or the default timeout passes.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    with_timeout(async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Write `size` bytes of patterned data to `dir/name`.
pub fn make_file(dir: &std::path::Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(&path, data).expect("Failed to write test file");
    path
}
