use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::{
    hub::RoomHub,
    relay::{FrameSink, FrameSource, serve_connection},
};

/// Routes browser clients to the relay at `/ws`.
pub fn router(hub: Arc<RoomHub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(hub)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<RoomHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, hub))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, hub: Arc<RoomHub>) {
    let (sink, stream) = socket.split();
    let mut source = WsSource(stream);
    let mut sink = WsSink(sink);

    if let Err(err) = serve_connection(hub, &mut source, &mut sink, &peer.to_string()).await {
        warn!(peer = %peer, error = ?err, "websocket connection closed with error");
    }
    // Best effort close frame; the peer may already be gone.
    let _ = sink.0.close().await;
}

struct WsSource(SplitStream<WebSocket>);

impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> io::Result<Option<String>> {
        while let Some(message) = self.0.next().await {
            match message.map_err(io::Error::other)? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Close(_) => return Ok(None),
                Message::Binary(bytes) => {
                    debug!(len = bytes.len(), "ignoring binary websocket frame");
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

struct WsSink(SplitSink<WebSocket, Message>);

impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: &str) -> io::Result<()> {
        self.0
            .send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(io::Error::other)
    }
}
