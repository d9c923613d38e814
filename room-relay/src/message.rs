use std::{fmt, io};

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

/// Opaque room identifier chosen by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Events a client may send to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "enterEvent")]
    Enter(PresenceRequest),
    #[serde(rename = "exitEvent")]
    Exit(PresenceRequest),
    #[serde(rename = "publishEvent")]
    Publish(PostRequest),
    #[serde(rename = "publishExistEvent")]
    PublishExist(ExistRequest),
}

impl ClientEvent {
    pub fn room_id(&self) -> &RoomId {
        match self {
            ClientEvent::Enter(request) | ClientEvent::Exit(request) => &request.room_id,
            ClientEvent::Publish(request) => &request.room_id,
            ClientEvent::PublishExist(request) => &request.room_id,
        }
    }
}

/// Events the relay fans out to room members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "enterEvent")]
    Enter(PresenceNotice),
    #[serde(rename = "exitEvent")]
    Exit(PresenceNotice),
    #[serde(rename = "publishEvent")]
    Publish(PostNotice),
    /// Carries the sender's `message` exactly as received.
    #[serde(rename = "publishExistEvent")]
    PublishExist(Value),
}

/// Payload fields are relayed as whatever JSON the sender used. `None` means
/// the key was absent; an explicit `null` is kept as `Some(Value::Null)`.
pub type Field = Option<Value>;

fn present<'de, D>(deserializer: D) -> Result<Field, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub room_id: RoomId,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub user_name: Field,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub message: Field,
    #[serde(
        default,
        rename = "event_type",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Field,
}

impl PresenceRequest {
    pub fn notice(&self) -> PresenceNotice {
        PresenceNotice {
            user_name: self.user_name.clone(),
            message: self.message.clone(),
            event_type: self.event_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub user_name: Field,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub message: Field,
    #[serde(
        default,
        rename = "event_type",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Field,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostRequest {
    pub room_id: RoomId,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub user_name: Field,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub message: Field,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub date: Field,
    #[serde(
        default,
        rename = "event_type",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Field,
}

impl PostRequest {
    pub fn notice(&self) -> PostNotice {
        PostNotice {
            user_name: self.user_name.clone(),
            message: self.message.clone(),
            date: self.date.clone(),
            event_type: self.event_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostNotice {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub user_name: Field,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub message: Field,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub date: Field,
    #[serde(
        default,
        rename = "event_type",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_type: Field,
}

/// `message` has no fixed schema; a missing value is relayed as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExistRequest {
    pub room_id: RoomId,
    #[serde(default)]
    pub message: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error on connection")]
    Io(#[from] io::Error),
    #[error("malformed frame")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame")]
    Encode(#[source] serde_json::Error),
}

pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, FrameError> {
    serde_json::from_str(frame).map_err(FrameError::Decode)
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, FrameError> {
    serde_json::to_string(message).map_err(FrameError::Encode)
}

/// Newline-delimited frame reader. `next_frame` is cancel safe, so it can sit
/// in a `select!` next to the outbox.
pub struct LineReader<R> {
    lines: Lines<R>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Returns the next non-blank line with line endings stripped, or `None`
    /// once the peer closes its side.
    pub async fn next_frame(&mut self) -> io::Result<Option<String>> {
        while let Some(line) = self.lines.next_line().await? {
            let trimmed = line.trim_end_matches('\r');
            if trimmed.trim().is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
        Ok(None)
    }

    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        match self.next_frame().await? {
            Some(frame) => decode(&frame).map(Some),
            None => Ok(None),
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(frame.len() + 1);
    encoded.extend_from_slice(frame.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    write_frame(writer, &frame).await?;
    Ok(())
}
