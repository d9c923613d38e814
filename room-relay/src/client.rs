use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::Value;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{
        ClientEvent, ExistRequest, Field, FrameError, LineReader, PostRequest, PresenceRequest,
        RoomId, ServerEvent, write_message,
    },
};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type ServerReader = LineReader<BufReader<OwnedReadHalf>>;

/// Terminal participant in one room.
struct Participant {
    user: String,
    room: RoomId,
    roster: BTreeSet<String>,
}

impl Participant {
    fn new(user: String, room: RoomId) -> Self {
        Self {
            user,
            room,
            roster: BTreeSet::new(),
        }
    }

    fn enter_event(&self) -> ClientEvent {
        ClientEvent::Enter(PresenceRequest {
            room_id: self.room.clone(),
            user_name: Some(self.user.as_str().into()),
            message: Some(format!("{} entered the room", self.user).into()),
            event_type: Some("enter".into()),
        })
    }

    fn exit_event(&self) -> ClientEvent {
        ClientEvent::Exit(PresenceRequest {
            room_id: self.room.clone(),
            user_name: Some(self.user.as_str().into()),
            message: Some(format!("{} left the room", self.user).into()),
            event_type: Some("exit".into()),
        })
    }

    fn publish_event(&self, text: &str) -> ClientEvent {
        ClientEvent::Publish(PostRequest {
            room_id: self.room.clone(),
            user_name: Some(self.user.as_str().into()),
            message: Some(text.into()),
            date: Some(Local::now().format(DATE_FORMAT).to_string().into()),
            event_type: Some("publish".into()),
        })
    }

    fn exist_event(&self) -> ClientEvent {
        ClientEvent::PublishExist(ExistRequest {
            room_id: self.room.clone(),
            message: Value::String(self.user.clone()),
        })
    }

    /// Updates local state for an incoming event and returns the line to
    /// print, if any, plus an event to send back.
    fn observe(&mut self, event: ServerEvent) -> (Option<String>, Option<ClientEvent>) {
        match event {
            ServerEvent::Enter(notice) => {
                let reply = match display(&notice.user_name) {
                    Some(name) => {
                        let newcomer = name != self.user;
                        self.roster.insert(name);
                        newcomer.then(|| self.exist_event())
                    }
                    None => None,
                };
                let text = display(&notice.message).unwrap_or_default();
                (Some(format!("*** {text}")), reply)
            }
            ServerEvent::Exit(notice) => {
                if let Some(name) = display(&notice.user_name) {
                    self.roster.remove(&name);
                }
                let text = display(&notice.message).unwrap_or_default();
                (Some(format!("*** {text}")), None)
            }
            ServerEvent::Publish(post) => {
                let user = display(&post.user_name).unwrap_or_default();
                let text = display(&post.message).unwrap_or_default();
                let line = match display(&post.date) {
                    Some(date) => format!("[{date}] <{user}> {text}"),
                    None => format!("<{user}> {text}"),
                };
                (Some(line), None)
            }
            ServerEvent::PublishExist(Value::String(name)) => {
                if self.roster.insert(name.clone()) {
                    (Some(format!("*** {name} is here")), None)
                } else {
                    (None, None)
                }
            }
            ServerEvent::PublishExist(_) => (None, None),
        }
    }

    fn roster_line(&self) -> String {
        let names: Vec<&str> = self.roster.iter().map(String::as_str).collect();
        format!("*** in room: {}", names.join(", "))
    }
}

/// Renders a relayed field for the terminal. Other clients may send any JSON,
/// so non-string values print as JSON and `null` counts as absent.
fn display(field: &Field) -> Option<String> {
    match field {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (user, room) = login(&args)?;
    let mut participant = Participant::new(user, room);

    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_stdout(&format!(
        "*** entering room {} as {}",
        participant.room, participant.user
    ))
    .await?;
    write_message(&mut writer, &participant.enter_event()).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut participant, &mut reader, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

fn login(args: &ClientArgs) -> Result<(String, RoomId)> {
    let user = args.user.trim();
    let room = args.room.trim();
    if user.is_empty() {
        anyhow::bail!("a user name is required to enter a room");
    }
    if room.is_empty() {
        anyhow::bail!("a room id is required to enter a room");
    }
    Ok((user.to_string(), RoomId::new(room)))
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerReader, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((LineReader::new(BufReader::new(reader)), writer))
}

async fn run_client_loop(
    participant: &mut Participant,
    reader: &mut ServerReader,
    writer: &mut OwnedWriteHalf,
    stdin: &mut io::Lines<BufReader<io::Stdin>>,
) -> Result<()> {
    loop {
        select! {
            server_message = reader.read_message::<ServerEvent>() => {
                if !handle_server_message(server_message, participant, writer).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_input(line?, participant, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                leave_room(participant, writer).await?;
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(
    message: Result<Option<ServerEvent>, FrameError>,
    participant: &mut Participant,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let event = match message {
        Ok(Some(event)) => event,
        Ok(None) => {
            write_stdout("*** relay closed the connection").await?;
            return Ok(false);
        }
        Err(FrameError::Decode(error)) => {
            warn!(?error, "ignoring unreadable frame from relay");
            return Ok(true);
        }
        Err(error) => return Err(error.into()),
    };

    let (line, reply) = participant.observe(event);
    if let Some(line) = line {
        write_stdout(&line).await?;
    }
    if let Some(reply) = reply {
        write_message(writer, &reply).await?;
    }
    Ok(true)
}

async fn handle_stdin_input(
    line: Option<String>,
    participant: &mut Participant,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(line) = line else {
        leave_room(participant, writer).await?;
        return Ok(false);
    };

    let text = line.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        leave_room(participant, writer).await?;
        return Ok(false);
    }

    if text.eq_ignore_ascii_case("/who") {
        write_stdout(&participant.roster_line()).await?;
        return Ok(true);
    }

    write_message(writer, &participant.publish_event(text)).await?;
    Ok(true)
}

async fn leave_room(participant: &Participant, writer: &mut OwnedWriteHalf) -> Result<()> {
    write_message(writer, &participant.exit_event()).await?;
    write_stdout(&format!("*** leaving room {}", participant.room)).await?;
    Ok(())
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
