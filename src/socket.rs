//! Persistent client connection to the streaming endpoint.
//!
//! One `SocketManager` owns at most one live WebSocket transport. Inbound
//! text frames are fanned out verbatim to every registered listener in
//! arrival order; parsing is the consumer's job. A dropped transport is
//! retried indefinitely on a fixed delay until `close()` is called.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Open,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

/// Identity token returned by `add_listener`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// WebSocket endpoint address.
    pub url: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Client for the streaming endpoint.
///
/// Cloning is cheap; clones share the same transport and listener set.
#[derive(Clone)]
pub struct SocketManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SocketConfig,
    status: AtomicU8,
    listeners: Mutex<Registry>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: Mutex<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

impl SocketManager {
    pub fn new(config: SocketConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                status: AtomicU8::new(ConnectionStatus::Disconnected as u8),
                listeners: Mutex::new(Registry::default()),
                outbound: Mutex::new(None),
                shutdown: Mutex::new(shutdown),
                task: Mutex::new(None),
            }),
        }
    }

    /// Open the connection. Idempotent: while a transport task is alive and
    /// not shutting down, further calls do nothing.
    pub fn connect(&self) {
        let mut task = self.inner.task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            let closing = *self.inner.shutdown.lock().unwrap().borrow();
            if !handle.is_finished() && !closing {
                tracing::debug!("socket already connecting or open, ignoring connect");
                return;
            }
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let (tx, rx) = watch::channel(false);
        *self.inner.shutdown.lock().unwrap() = tx;
        *task = Some(tokio::spawn(run_loop(Arc::clone(&self.inner), rx)));
    }

    /// Register a listener for inbound frames. Every text frame delivered
    /// while the listener is registered reaches it exactly once, in the
    /// order the transport received them.
    pub fn add_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> ListenerHandle {
        let mut registry = self.inner.listeners.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(listener)));
        ListenerHandle(id)
    }

    /// Unregister a listener. Safe to call from inside a listener while a
    /// dispatch is in progress; the removed listener sees no further frames.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .entries
            .retain(|(id, _)| *id != handle.0);
    }

    /// Serialize and transmit `payload` if the connection is open. A closed
    /// connection drops the frame with a warning; nothing is raised.
    pub fn send<T: Serialize>(&self, payload: &T) {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("failed to serialize outbound frame: {}", e);
                return;
            }
        };

        let outbound = self.inner.outbound.lock().unwrap();
        match outbound.as_ref() {
            Some(tx) if self.is_connected() => {
                if tx.send(text).is_err() {
                    tracing::warn!("socket closed while sending, outbound frame dropped");
                }
            }
            _ => tracing::warn!("socket not open, outbound frame dropped"),
        }
    }

    /// Non-blocking status read.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.inner.status.load(Ordering::SeqCst))
    }

    /// Tear down the transport and suppress the pending reconnect. A later
    /// `connect()` starts over.
    pub fn close(&self) {
        let _ = self.inner.shutdown.lock().unwrap().send(true);
        self.inner.outbound.lock().unwrap().take();
        self.inner.set_status(ConnectionStatus::Disconnected);
    }
}

impl Inner {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    /// Fan one frame out to the listeners registered at dispatch time.
    /// Iterates a snapshot and re-checks registration per listener, so a
    /// listener removed mid-dispatch is skipped rather than invoked.
    fn dispatch(&self, raw: &str) {
        let snapshot: Vec<(u64, Listener)> = self.listeners.lock().unwrap().entries.clone();
        for (id, listener) in snapshot {
            let registered = self
                .listeners
                .lock()
                .unwrap()
                .entries
                .iter()
                .any(|(other, _)| *other == id);
            if registered {
                listener(raw);
            }
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        inner.set_status(ConnectionStatus::Connecting);
        tracing::info!(url = %inner.config.url, "connecting to socket endpoint");

        let attempt = tokio::select! {
            result = connect_async(inner.config.url.as_str()) => Some(result),
            _ = shutdown.changed() => None,
        };

        match attempt {
            Some(Ok((stream, _))) => {
                tracing::info!("socket connected");

                let (mut sink, mut source) = stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                *inner.outbound.lock().unwrap() = Some(tx);
                inner.set_status(ConnectionStatus::Open);

                let writer = tokio::spawn(async move {
                    while let Some(text) = rx.recv().await {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                });

                loop {
                    tokio::select! {
                        frame = source.next() => match frame {
                            Some(Ok(Message::Text(text))) => inner.dispatch(&text),
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("socket closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {} // ping/pong/binary, nothing to fan out
                            Some(Err(e)) => {
                                tracing::error!("socket error: {}", e);
                                break;
                            }
                        },
                        _ = shutdown.changed() => break,
                    }
                }

                inner.outbound.lock().unwrap().take();
                writer.abort();
                inner.set_status(ConnectionStatus::Disconnected);
            }
            Some(Err(e)) => {
                tracing::error!("socket connect failed: {}", e);
                inner.set_status(ConnectionStatus::Disconnected);
            }
            None => {}
        }

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }

    inner.set_status(ConnectionStatus::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(url: String) -> SocketConfig {
        SocketConfig {
            url,
            reconnect_delay: Duration::from_millis(50),
        }
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn test_fanout_delivers_every_frame_in_order() {
        let (listener, url) = bind().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in ["one", "two", "three"] {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            // Keep the connection open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let manager = SocketManager::new(test_config(url));
        let first = Arc::new(Mutex::new(Vec::<String>::new()));
        let second = Arc::new(Mutex::new(Vec::<String>::new()));
        for sink in [&first, &second] {
            let sink = Arc::clone(sink);
            manager.add_listener(move |raw| sink.lock().unwrap().push(raw.to_string()));
        }

        manager.connect();
        wait_for(|| second.lock().unwrap().len() == 3).await;

        assert_eq!(*first.lock().unwrap(), ["one", "two", "three"]);
        assert_eq!(*second.lock().unwrap(), ["one", "two", "three"]);

        manager.close();
        server.abort();
    }

    #[tokio::test]
    async fn test_remove_listener_during_dispatch() {
        let (listener, url) = bind().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text("first".to_string())).await.unwrap();
            ws.send(Message::Text("second".to_string())).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let manager = SocketManager::new(test_config(url));
        let doomed_frames = Arc::new(Mutex::new(Vec::<String>::new()));
        let survivor_frames = Arc::new(Mutex::new(Vec::<String>::new()));
        let doomed_handle = Arc::new(Mutex::new(None::<ListenerHandle>));

        // First listener removes the second one from inside the dispatch of
        // the very first frame.
        {
            let manager = manager.clone();
            let doomed_handle = Arc::clone(&doomed_handle);
            let survivor_frames = Arc::clone(&survivor_frames);
            manager.clone().add_listener(move |raw| {
                if let Some(handle) = doomed_handle.lock().unwrap().take() {
                    manager.remove_listener(handle);
                }
                survivor_frames.lock().unwrap().push(raw.to_string());
            });
        }
        {
            let doomed_frames = Arc::clone(&doomed_frames);
            let handle =
                manager.add_listener(move |raw| doomed_frames.lock().unwrap().push(raw.to_string()));
            *doomed_handle.lock().unwrap() = Some(handle);
        }

        manager.connect();
        wait_for(|| survivor_frames.lock().unwrap().len() == 2).await;

        assert_eq!(*survivor_frames.lock().unwrap(), ["first", "second"]);
        assert!(
            doomed_frames.lock().unwrap().is_empty(),
            "removed listener must not receive frames after removal"
        );

        manager.close();
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_open() {
        let (listener, url) = bind().await;
        let accepted = Arc::new(AtomicUsize::new(0));
        let server = {
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                loop {
                    let (stream, _) = listener.accept().await.unwrap();
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                }
            })
        };

        let manager = SocketManager::new(test_config(url));
        manager.connect();
        wait_for(|| manager.is_connected()).await;

        manager.connect();
        manager.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        manager.close();
        server.abort();
    }

    #[tokio::test]
    async fn test_reconnects_until_closed() {
        let (listener, url) = bind().await;
        let accepted = Arc::new(AtomicUsize::new(0));
        let server = {
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                loop {
                    // Accept and immediately drop the connection so the
                    // client keeps retrying.
                    let (stream, _) = listener.accept().await.unwrap();
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let ws = accept_async(stream).await.unwrap();
                    drop(ws);
                }
            })
        };

        let manager = SocketManager::new(test_config(url));
        manager.connect();
        wait_for(|| accepted.load(Ordering::SeqCst) >= 3).await;

        manager.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_close = accepted.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            accepted.load(Ordering::SeqCst),
            after_close,
            "no reconnect attempts after close()"
        );

        server.abort();
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_a_logged_noop() {
        let manager = SocketManager::new(test_config("ws://127.0.0.1:1".to_string()));
        assert!(!manager.is_connected());
        // Must neither panic nor error back to the caller.
        manager.send(&serde_json::json!({ "topic": "dropped" }));
    }

    #[tokio::test]
    async fn test_connect_after_close_opens_a_fresh_transport() {
        let (listener, url) = bind().await;
        let accepted = Arc::new(AtomicUsize::new(0));
        let server = {
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                loop {
                    let (stream, _) = listener.accept().await.unwrap();
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                }
            })
        };

        let manager = SocketManager::new(test_config(url));
        manager.connect();
        wait_for(|| manager.is_connected()).await;

        manager.close();
        wait_for({
            let manager = manager.clone();
            move || !manager.is_connected()
        })
        .await;

        manager.connect();
        wait_for(|| manager.is_connected()).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 2);

        manager.close();
        server.abort();
    }
}
