use std::{future::Future, io, sync::Arc};

use tokio::select;
use tracing::{debug, info, warn};

use crate::{
    hub::{ConnectionId, Outbox, RoomHub},
    message::{ClientEvent, FrameError, ServerEvent, decode},
};

/// Inbound half of a connection.
pub trait FrameSource {
    /// Yields the next text frame, or `None` when the peer is gone. Must be
    /// cancel safe.
    fn next_frame(&mut self) -> impl Future<Output = io::Result<Option<String>>> + Send;
}

/// Outbound half of a connection.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &str) -> impl Future<Output = io::Result<()>> + Send;
}

/// One connection's view of the hub.
pub struct Session {
    id: ConnectionId,
    hub: Arc<RoomHub>,
}

impl Session {
    pub async fn open(hub: Arc<RoomHub>) -> (Self, Outbox) {
        let (id, outbox) = hub.connect().await;
        (Self { id, hub }, outbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Decodes and relays one inbound frame. Frames that do not decode are
    /// dropped; the connection stays open.
    pub async fn handle_frame(&self, frame: &str) -> Result<(), FrameError> {
        match decode::<ClientEvent>(frame) {
            Ok(event) => self.dispatch(event).await,
            Err(error) => {
                warn!(connection = %self.id, ?error, "dropping malformed frame");
                Ok(())
            }
        }
    }

    pub async fn dispatch(&self, event: ClientEvent) -> Result<(), FrameError> {
        match event {
            ClientEvent::Enter(request) => {
                self.hub.join(self.id, &request.room_id).await;
                debug!(connection = %self.id, room = %request.room_id, "entered room");
                self.hub
                    .broadcast(&request.room_id, &ServerEvent::Enter(request.notice()))
                    .await?;
            }
            ClientEvent::Exit(request) => {
                let was_member = self.hub.leave(self.id, &request.room_id).await;
                debug!(connection = %self.id, room = %request.room_id, was_member, "left room");
                let notice = ServerEvent::Exit(request.notice());
                self.hub.broadcast(&request.room_id, &notice).await?;
                // The leaver is already out of the room but still sees its own exit.
                if was_member {
                    self.hub.send_to(self.id, &notice).await?;
                }
            }
            ClientEvent::Publish(request) => {
                self.hub
                    .broadcast(&request.room_id, &ServerEvent::Publish(request.notice()))
                    .await?;
            }
            ClientEvent::PublishExist(request) => {
                self.hub
                    .broadcast(&request.room_id, &ServerEvent::PublishExist(request.message))
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn close(self) {
        let rooms = self.hub.disconnect(self.id).await;
        if !rooms.is_empty() {
            debug!(connection = %self.id, ?rooms, "removed from rooms on disconnect");
        }
    }
}

/// Runs one connection until either side closes, then removes it from the
/// hub regardless of how the session ended.
pub async fn serve_connection<S, K>(
    hub: Arc<RoomHub>,
    source: &mut S,
    sink: &mut K,
    peer: &str,
) -> Result<(), FrameError>
where
    S: FrameSource,
    K: FrameSink,
{
    let (session, mut outbox) = Session::open(hub).await;
    info!(connection = %session.id(), peer, "connection opened");

    let result = drive(&session, source, sink, &mut outbox).await;

    info!(connection = %session.id(), peer, "connection closed");
    session.close().await;
    result
}

async fn drive<S, K>(
    session: &Session,
    source: &mut S,
    sink: &mut K,
    outbox: &mut Outbox,
) -> Result<(), FrameError>
where
    S: FrameSource,
    K: FrameSink,
{
    loop {
        select! {
            inbound = source.next_frame() => {
                match inbound? {
                    Some(frame) => session.handle_frame(&frame).await?,
                    None => break,
                }
            }
            outbound = outbox.recv() => {
                let Some(frame) = outbound else {
                    break;
                };
                sink.send_frame(&frame).await?;
            }
        }
    }

    Ok(())
}
