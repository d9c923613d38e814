use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::warn;

use crate::{
    hub::RoomHub,
    message::{LineReader, write_frame},
    relay::{FrameSink, FrameSource, serve_connection},
};

impl FrameSource for LineReader<BufReader<OwnedReadHalf>> {
    async fn next_frame(&mut self) -> io::Result<Option<String>> {
        LineReader::next_frame(self).await
    }
}

/// Write half of a TCP connection speaking newline-delimited JSON.
pub struct LineWriter(OwnedWriteHalf);

impl FrameSink for LineWriter {
    async fn send_frame(&mut self, frame: &str) -> io::Result<()> {
        write_frame(&mut self.0, frame).await
    }
}

pub(crate) fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    hub: &Arc<RoomHub>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, hub),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, hub: &Arc<RoomHub>) {
    let hub = Arc::clone(hub);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, hub).await {
            warn!(peer = %peer, error = ?err, "tcp connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<RoomHub>,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut source = LineReader::new(BufReader::new(reader));
    let mut sink = LineWriter(writer);

    serve_connection(hub, &mut source, &mut sink, &peer.to_string()).await?;
    Ok(())
}
