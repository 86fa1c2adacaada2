// Tokio task that owns a StreamClient and carries out its actions

use std::collections::VecDeque;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::market_data::adapters::{Connector, FeedConnection, TransportError, TransportEvent};
use crate::market_data::client::{Action, ConnectionState, StreamClient};
use crate::market_data::quote::FeedSnapshot;

pub struct StreamHandle {
    snapshot_rx: watch::Receiver<FeedSnapshot>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified whenever the quote or connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the stream: pending reconnects are cancelled and the socket is closed.
    /// Idempotent; safe at any point.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for the background task to finish. Call after `dispose()`.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "stream task ended abnormally");
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Activate `client` and drive it on a background task.
pub fn spawn<C>(client: StreamClient, connector: C) -> StreamHandle
where
    C: Connector + 'static,
{
    let (snapshot_tx, snapshot_rx) = watch::channel(client.snapshot());
    let shutdown = CancellationToken::new();
    let runner = Runner {
        client,
        connector,
        snapshot_tx,
        shutdown: shutdown.clone(),
        phase: Phase::Inert,
    };
    let task = tokio::spawn(runner.run());
    StreamHandle { snapshot_rx, shutdown, task: Some(task) }
}

// What the task is currently waiting on. Only one of these exists at a time, which
// is what keeps a single connection attempt outstanding.
enum Phase {
    Inert,
    Connecting(String),
    Open(Box<dyn FeedConnection>),
    Waiting(Instant),
}

enum Step {
    Shutdown,
    Connected(Result<Box<dyn FeedConnection>, TransportError>),
    Transport(TransportEvent),
    TimerFired,
}

struct Runner<C> {
    client: StreamClient,
    connector: C,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    shutdown: CancellationToken,
    phase: Phase,
}

impl<C: Connector> Runner<C> {
    async fn run(mut self) {
        let actions = self.client.activate();
        self.apply(actions).await;

        while self.client.state() != ConnectionState::Disposed {
            let actions = match self.next_step().await {
                Step::Shutdown => self.client.dispose(),
                Step::Connected(Ok(connection)) => {
                    self.phase = Phase::Open(connection);
                    self.client.on_transport_open()
                }
                Step::Connected(Err(e)) => {
                    warn!(error = %e, "connection attempt failed");
                    self.phase = Phase::Inert;
                    self.client.on_transport_error()
                }
                Step::Transport(TransportEvent::Text(raw)) => self.client.on_transport_message(&raw),
                Step::Transport(TransportEvent::Closed) => {
                    self.phase = Phase::Inert;
                    self.client.on_transport_close()
                }
                Step::Transport(TransportEvent::Failed(e)) => {
                    warn!(error = %e, "transport failed");
                    self.phase = Phase::Inert;
                    self.client.on_transport_error()
                }
                Step::TimerFired => {
                    self.phase = Phase::Inert;
                    self.client.on_reconnect_timer()
                }
            };
            self.apply(actions).await;
        }

        // whatever dispose left behind
        self.release().await;
        info!("stream task stopped");
    }

    async fn next_step(&mut self) -> Step {
        let shutdown = &self.shutdown;
        match &mut self.phase {
            Phase::Inert => {
                shutdown.cancelled().await;
                Step::Shutdown
            }
            Phase::Connecting(url) => {
                let url = url.clone();
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => Step::Shutdown,
                    result = connect(&self.connector, &url) => Step::Connected(result),
                }
            }
            Phase::Open(connection) => {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => Step::Shutdown,
                    event = connection.recv() => Step::Transport(event),
                }
            }
            Phase::Waiting(deadline) => {
                let deadline = *deadline;
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => Step::Shutdown,
                    () = sleep_until(deadline) => Step::TimerFired,
                }
            }
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::OpenTransport { url } => {
                    self.phase = Phase::Connecting(url);
                }
                Action::Send(text) => {
                    let Phase::Open(connection) = &mut self.phase else {
                        debug!("send skipped, no open transport");
                        continue;
                    };
                    if let Err(e) = connection.send_text(text).await {
                        warn!(error = %e, "subscription send failed");
                        self.phase = Phase::Inert;
                        // the connection never went live; its pending publish is stale
                        queue.retain(|pending| !matches!(pending, Action::Publish(_)));
                        queue.extend(self.client.on_transport_error());
                    }
                }
                Action::ArmReconnectTimer(delay) => {
                    self.phase = Phase::Waiting(Instant::now() + delay);
                }
                Action::CancelReconnectTimer => {
                    if matches!(self.phase, Phase::Waiting(_)) {
                        self.phase = Phase::Inert;
                    }
                }
                Action::CloseTransport => self.release().await,
                Action::Publish(snapshot) => {
                    self.snapshot_tx.send_if_modified(|current| {
                        if *current == snapshot {
                            return false;
                        }
                        *current = snapshot;
                        true
                    });
                }
            }
        }
    }

    // Close an open connection or drop a handshake in progress.
    async fn release(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Inert) {
            Phase::Open(mut connection) => connection.close().await,
            Phase::Connecting(url) => debug!(%url, "abandoning connection attempt"),
            Phase::Waiting(_) | Phase::Inert => {}
        }
    }
}

#[instrument(skip(connector))]
async fn connect<C: Connector>(connector: &C, url: &str) -> Result<Box<dyn FeedConnection>, TransportError> {
    info!("connecting to feed");
    connector.connect(url).await
}
