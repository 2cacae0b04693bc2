use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::peer::{PeerId, PeerInfo};
use crate::resp::RespType;
use crate::store::Store;

const INBOX_CAPACITY: usize = 1024;

/// A decoded command together with where its reply should go.
///
/// `reply` receives `None` when the command failed and nothing should be
/// written back.
#[derive(Debug)]
pub struct Message {
    pub peer: PeerId,
    pub cmd: Command,
    pub reply: oneshot::Sender<Option<RespType>>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("dispatch loop has stopped")]
pub struct DispatchClosed;

/// Sending side of the dispatch loop's inboxes, one clone per peer.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    msg_tx: mpsc::Sender<Message>,
    add_tx: mpsc::Sender<PeerInfo>,
    del_tx: mpsc::Sender<PeerInfo>,
}

impl DispatchHandle {
    pub async fn connected(&self, peer: PeerInfo) -> Result<(), DispatchClosed> {
        self.add_tx.send(peer).await.map_err(|_| DispatchClosed)
    }

    pub async fn disconnected(&self, peer: PeerInfo) -> Result<(), DispatchClosed> {
        self.del_tx.send(peer).await.map_err(|_| DispatchClosed)
    }

    pub async fn submit(&self, msg: Message) -> Result<(), DispatchClosed> {
        self.msg_tx.send(msg).await.map_err(|_| DispatchClosed)
    }
}

/// Owns the peer registry and is the only place commands are executed.
pub struct Dispatcher {
    store: Store,
    peers: HashMap<PeerId, PeerInfo>,
    msg_rx: mpsc::Receiver<Message>,
    add_rx: mpsc::Receiver<PeerInfo>,
    del_rx: mpsc::Receiver<PeerInfo>,
    sweep_interval: Duration,
}

pub fn channel(store: Store, sweep_interval: Duration) -> (Dispatcher, DispatchHandle) {
    let (msg_tx, msg_rx) = mpsc::channel(INBOX_CAPACITY);
    let (add_tx, add_rx) = mpsc::channel(INBOX_CAPACITY);
    let (del_tx, del_rx) = mpsc::channel(INBOX_CAPACITY);

    let dispatcher = Dispatcher {
        store,
        peers: HashMap::new(),
        msg_rx,
        add_rx,
        del_rx,
        sweep_interval,
    };
    let handle = DispatchHandle {
        msg_tx,
        add_tx,
        del_tx,
    };
    (dispatcher, handle)
}

impl Dispatcher {
    /// Runs until `shutdown` resolves. Connections still open at that point
    /// are left alone; their next submit fails and they wind down.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut ticker = time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Order matters: a peer's connect must be seen before its disconnect.
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(peers = self.peers.len(), "dispatch loop stopping");
                    break;
                }
                Some(peer) = self.add_rx.recv() => self.handle_connect(peer),
                Some(peer) = self.del_rx.recv() => self.handle_disconnect(peer),
                _ = ticker.tick() => self.handle_tick(),
                Some(msg) = self.msg_rx.recv() => self.handle_message(msg),
            }
        }
    }

    fn handle_connect(&mut self, peer: PeerInfo) {
        info!(peer = %peer.id, remote_addr = %peer.addr, "peer connected");
        self.peers.insert(peer.id, peer);
    }

    fn handle_disconnect(&mut self, peer: PeerInfo) {
        info!(peer = %peer.id, remote_addr = %peer.addr, "peer disconnected");
        self.peers.remove(&peer.id);
    }

    fn handle_tick(&mut self) {
        let removed = self.store.sweep_expired();
        if removed > 0 {
            debug!(removed, "swept expired keys");
        }
    }

    fn handle_message(&mut self, msg: Message) {
        let Message { peer, cmd, reply } = msg;

        let response = match cmd.execute(&self.store) {
            Ok(response) => Some(response),
            Err(err) => {
                let remote_addr = self.peers.get(&peer).map(|info| info.addr);
                warn!(%peer, ?remote_addr, command = cmd.name(), error = %err, "command failed");
                None
            }
        };

        if reply.send(response).is_err() {
            debug!(%peer, "peer went away before its reply");
        }
    }
}

#[cfg(test)]
pub(crate) struct TestInbox {
    pub messages: mpsc::Receiver<Message>,
    pub connected: mpsc::Receiver<PeerInfo>,
    pub disconnected: mpsc::Receiver<PeerInfo>,
}

/// A handle whose inboxes are read by the test instead of a dispatcher.
#[cfg(test)]
pub(crate) fn test_inbox() -> (DispatchHandle, TestInbox) {
    let (dispatcher, handle) = channel(Store::new(), Duration::from_secs(1));
    let inbox = TestInbox {
        messages: dispatcher.msg_rx,
        connected: dispatcher.add_rx,
        disconnected: dispatcher.del_rx,
    };
    (handle, inbox)
}
