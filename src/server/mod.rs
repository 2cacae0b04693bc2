pub mod dispatch;

use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::{Config, DEFAULT_SWEEP_INTERVAL};
use crate::peer::{Peer, PeerId};
use crate::store::Store;
use dispatch::DispatchHandle;

pub struct Server {
    listener: TcpListener,
    store: Store,
    sweep_interval: Duration,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            store: Store::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Binds the configured listen address. Failing here is the one error
    /// that should take the process down.
    pub async fn bind(config: &Config) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::new(listener).with_sweep_interval(config.sweep_interval()))
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = store;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// Accepts connections until `shutdown` resolves, then stops the dispatch
    /// loop and waits for it to exit.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            store,
            sweep_interval,
        } = self;

        let (dispatcher, handle) = dispatch::channel(store, sweep_interval);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let dispatch_task = tokio::spawn(dispatcher.run(async move {
            let _ = stop_rx.await;
        }));

        tokio::pin!(shutdown);
        let mut next_id = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_id += 1;
                        spawn_peer(PeerId(next_id), stream, addr, handle.clone());
                    }
                    Err(err) => warn!(error = %err, "accept error"),
                },
            }
        }

        let _ = stop_tx.send(());
        dispatch_task.await.context("dispatch loop panicked")?;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_peer(id: PeerId, stream: TcpStream, addr: SocketAddr, handle: DispatchHandle) {
    tokio::spawn(async move {
        let peer = Peer::from_stream(id, stream, addr, handle);
        if let Err(err) = peer.run().await {
            warn!(peer = %id, remote_addr = %addr, error = %err, "peer read error");
        }
    });
}
