use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, select, sync::watch};
use tracing::{info, warn};

use crate::{config::RelayConfig, hub::RoomHub, tcp, ws};

/// The relay process: one TCP listener, one HTTP listener, one shared hub.
pub struct RelayServer {
    tcp: TcpListener,
    http: TcpListener,
    hub: Arc<RoomHub>,
}

impl RelayServer {
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let tcp = TcpListener::bind(config.tcp_listen)
            .await
            .with_context(|| format!("failed to bind tcp listener on {}", config.tcp_listen))?;
        let http = TcpListener::bind(config.http_listen)
            .await
            .with_context(|| format!("failed to bind http listener on {}", config.http_listen))?;

        Ok(Self {
            tcp,
            http,
            hub: Arc::new(RoomHub::new(config.outbox_capacity)),
        })
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn hub(&self) -> Arc<RoomHub> {
        Arc::clone(&self.hub)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { tcp, http, hub } = self;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let app = ws::router(Arc::clone(&hub));
        let http_server = tokio::spawn(async move {
            axum::serve(
                http,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stopped| *stopped).await;
            })
            .await
        });

        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = tcp.accept() => {
                    tcp::handle_accept_result(accept_result, &hub);
                }
            }
        }

        let closed = hub.close_all().await;
        info!(closed, "relay shutting down");
        let _ = stop_tx.send(true);

        match http_server.await {
            Ok(result) => result.context("http server failed")?,
            Err(err) => warn!(error = ?err, "http server task failed"),
        }
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
