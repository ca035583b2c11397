//! Terminal chat client for the chatsync engine.
//!
//! Reads lines with `rustyline`, turns slash commands into engine calls and
//! prints every engine event as one line.

use std::{sync::Arc, time::Duration};

use chatsync_engine::{
    EngineConfig, EngineEvent, EngineHandle, WebSocketConnector,
    domain::{
        AuthToken, ConnectionStatus, DeliveryState, MessageId, RoomId, SyncError, UserId,
        ValueObjectError,
    },
    format_typing,
};
use chatsync_shared::time::timestamp_to_local_clock;
use clap::Parser;
use rustyline::{DefaultEditor, error::ReadlineError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Command line arguments of `chatsync-client`
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Terminal chat client for the chatsync engine")]
pub struct Args {
    /// WebSocket endpoint of the messaging server
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    pub endpoint: String,

    /// Bearer token presented on every handshake
    #[arg(long, env = "CHATSYNC_TOKEN", hide_env_values = true)]
    pub token: String,

    #[arg(long)]
    pub user_id: String,

    /// Display name shown to peers (defaults to the user id)
    #[arg(long)]
    pub name: Option<String>,

    /// Rooms to join on start; the first one becomes the current room
    #[arg(long = "room", default_value = "lobby")]
    pub rooms: Vec<String>,

    #[arg(long, default_value_t = 15)]
    pub heartbeat_secs: u64,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.user_id)
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs.max(1)))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValueObjectError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("terminal input failed: {0}")]
    Input(String),
}

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Join(String),
    Leave(String),
    /// Switch the room plain text is sent to
    Room(String),
    Watch(Vec<String>),
    Unwatch(Vec<String>),
    Read(String),
    Typing,
    Quit,
    Say(String),
    Empty,
    /// Unknown command or a command missing its argument
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<String> = parts.map(str::to_string).collect();
    let single = |build: fn(String) -> Input| match args.as_slice() {
        [arg] => build(arg.clone()),
        _ => Input::Invalid(format!("usage: /{} <id>", name)),
    };

    match name {
        "join" => single(Input::Join),
        "leave" => single(Input::Leave),
        "room" => single(Input::Room),
        "read" => single(Input::Read),
        "watch" | "unwatch" if args.is_empty() => {
            Input::Invalid(format!("usage: /{} <user>...", name))
        }
        "watch" => Input::Watch(args),
        "unwatch" => Input::Unwatch(args),
        "typing" => Input::Typing,
        "quit" | "exit" => Input::Quit,
        _ => Input::Invalid(format!("unknown command: /{}", name)),
    }
}

const STATUS_LABELS: [(ConnectionStatus, &str, &str); 4] = [
    (ConnectionStatus::Disconnected, "○", "disconnected"),
    (ConnectionStatus::Connecting, "◌", "connecting..."),
    (ConnectionStatus::Connected, "●", "connected"),
    (ConnectionStatus::Reconnecting, "◌", "reconnecting..."),
];

/// Icon and label shown for a connection status.
pub fn status_label(status: ConnectionStatus) -> (&'static str, &'static str) {
    STATUS_LABELS
        .iter()
        .find(|(s, _, _)| *s == status)
        .map(|(_, icon, label)| (*icon, *label))
        .unwrap_or(("?", "unknown"))
}

/// Line printed for an engine event, if any.
pub fn render_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::Message(message) => {
            let marker = match message.delivery {
                DeliveryState::Pending => " (sending)",
                _ => "",
            };
            Some(format!(
                "[{}] #{} {}: {}{}",
                timestamp_to_local_clock(message.sent_at.value()),
                message.room_id,
                message.sender_name,
                message.body,
                marker
            ))
        }
        EngineEvent::MessageConfirmed { .. } => None,
        EngineEvent::MessageFailed(message) => Some(format!(
            "! not delivered to #{}: {}",
            message.room_id, message.body
        )),
        EngineEvent::ReadReceipt { receipt, message } => Some(format!(
            "✓ {} read \"{}\" ({})",
            receipt.reader_id,
            message.body,
            message.id
        )),
        EngineEvent::TypingChanged { room_id, names } => {
            format_typing(names).map(|text| format!("#{} {}", room_id, text))
        }
        EngineEvent::PresenceChanged { user_id, online } => Some(format!(
            "{} is {}",
            user_id,
            if *online { "online" } else { "offline" }
        )),
        EngineEvent::ConnectionStateChanged(status) => {
            let (icon, label) = status_label(*status);
            Some(format!("{} {}", icon, label))
        }
        EngineEvent::AuthExpired => {
            Some("! session expired, restart with a fresh token".to_string())
        }
        EngineEvent::Error(e) => Some(format!("! {}", e)),
    }
}

/// Connect, join the configured rooms and run the interactive loop until
/// `/quit` or end of input.
pub async fn run_client(args: Args) -> Result<(), ClientError> {
    let user_id = UserId::try_from(args.user_id.as_str())?;
    let token = AuthToken::new(args.token.clone())?;
    let rooms = args
        .rooms
        .iter()
        .map(|r| RoomId::try_from(r.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let engine = EngineHandle::spawn(
        args.engine_config(),
        user_id,
        args.display_name(),
        Arc::new(WebSocketConnector::new()),
    );
    let mut events = engine.subscribe()?;

    tracing::info!("Connecting to {} as {}", args.endpoint, engine.user_id());
    engine.connect(args.endpoint.clone(), token).await?;
    for room in &rooms {
        engine.join_room(room.clone())?;
    }
    let mut current = rooms.first().cloned();

    let mut lines = spawn_line_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                let line = line?;
                if !handle_input(&engine, &mut current, parse_input(&line))? {
                    break;
                }
            }
            Some(event) = events.recv() => {
                if let Some(text) = render_event(&event) {
                    println!("{}", text);
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Apply one input line. Returns `false` once the user asked to quit.
///
/// Invalid ids are reported and the session goes on; only engine failures
/// end it.
fn handle_input(
    engine: &EngineHandle,
    current: &mut Option<RoomId>,
    input: Input,
) -> Result<bool, ClientError> {
    match apply_input(engine, current, input) {
        Err(ClientError::InvalidArgument(e)) => {
            println!("! {}", e);
            Ok(true)
        }
        result => result,
    }
}

fn apply_input(
    engine: &EngineHandle,
    current: &mut Option<RoomId>,
    input: Input,
) -> Result<bool, ClientError> {
    match input {
        Input::Join(room) => {
            let room = RoomId::try_from(room)?;
            engine.join_room(room.clone())?;
            *current = Some(room);
        }
        Input::Leave(room) => {
            let room = RoomId::try_from(room)?;
            engine.leave_room(room.clone())?;
            if current.as_ref() == Some(&room) {
                *current = None;
            }
        }
        Input::Room(room) => *current = Some(RoomId::try_from(room)?),
        Input::Watch(users) => engine.watch(parse_users(users)?)?,
        Input::Unwatch(users) => engine.unwatch(parse_users(users)?)?,
        Input::Read(id) => match current {
            Some(room) => engine.mark_read(MessageId::try_from(id)?, room.clone())?,
            None => println!("! no current room, /join one first"),
        },
        Input::Typing => {
            if let Some(room) = current {
                engine.notify_typing(room.clone())?;
            }
        }
        Input::Say(text) => match current {
            Some(room) => {
                if let Err(e) = engine.send_message(room, &text) {
                    println!("! {}", e);
                }
            }
            None => println!("! no current room, /join one first"),
        },
        Input::Invalid(reason) => println!("! {}", reason),
        Input::Empty => {}
        Input::Quit => return Ok(false),
    }
    Ok(true)
}

fn parse_users(users: Vec<String>) -> Result<Vec<UserId>, ValueObjectError> {
    users.into_iter().map(UserId::try_from).collect()
}

// rustyline blocks, so it runs on its own thread and forwards every line.
fn spawn_line_reader() -> mpsc::UnboundedReceiver<Result<String, ClientError>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = tx.send(Err(ClientError::Input(e.to_string())));
                return;
            }
        };
        loop {
            match editor.readline("> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    let _ = tx.send(Err(ClientError::Input(e.to_string())));
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use chatsync_engine::domain::{Message, MessageBody, Timestamp};

    use super::*;

    #[test]
    fn test_parse_plain_text_and_commands() {
        // テスト項目: 通常の入力はメッセージ、スラッシュで始まる入力はコマンドとして解釈される
        // when (操作) / then (期待する結果):
        assert_eq!(parse_input("  hello  "), Input::Say("hello".to_string()));
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("/join dev"), Input::Join("dev".to_string()));
        assert_eq!(parse_input("/leave dev"), Input::Leave("dev".to_string()));
        assert_eq!(parse_input("/room ops"), Input::Room("ops".to_string()));
        assert_eq!(parse_input("/read srv-1"), Input::Read("srv-1".to_string()));
        assert_eq!(
            parse_input("/watch bob carol"),
            Input::Watch(vec!["bob".to_string(), "carol".to_string()])
        );
        assert_eq!(parse_input("/unwatch bob"), Input::Unwatch(vec!["bob".to_string()]));
        assert_eq!(parse_input("/typing"), Input::Typing);
        assert_eq!(parse_input("/quit"), Input::Quit);
    }

    #[test]
    fn test_parse_rejects_missing_arguments() {
        // テスト項目: 引数が足りないコマンドや未知のコマンドは Invalid になる
        // when (操作) / then (期待する結果):
        assert!(matches!(parse_input("/join"), Input::Invalid(_)));
        assert!(matches!(parse_input("/join a b"), Input::Invalid(_)));
        assert!(matches!(parse_input("/watch"), Input::Invalid(_)));
        assert!(matches!(parse_input("/dance"), Input::Invalid(_)));
    }

    #[test]
    fn test_status_label_covers_every_status() {
        // テスト項目: すべての接続状態にラベルが対応している
        // given (前提条件):
        let statuses = [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Reconnecting,
        ];

        // when (操作) / then (期待する結果):
        for status in statuses {
            assert_ne!(status_label(status).1, "unknown");
        }
        assert_eq!(status_label(ConnectionStatus::Connected), ("●", "connected"));
    }

    #[test]
    fn test_render_events() {
        // テスト項目: イベントが 1 行の表示文字列に変換される
        // given (前提条件):
        let message = Message::outgoing(
            MessageId::try_from("tmp-1").unwrap(),
            RoomId::try_from("lobby").unwrap(),
            UserId::try_from("alice").unwrap(),
            "Alice",
            MessageBody::new("hi".to_string()).unwrap(),
            Timestamp::new(1_672_531_200_000),
        );

        // when (操作):
        let line = render_event(&EngineEvent::Message(message.clone())).unwrap();
        let typing = render_event(&EngineEvent::TypingChanged {
            room_id: RoomId::try_from("lobby").unwrap(),
            names: vec!["Bob".to_string()],
        });
        let nobody = render_event(&EngineEvent::TypingChanged {
            room_id: RoomId::try_from("lobby").unwrap(),
            names: vec![],
        });
        let confirmed = render_event(&EngineEvent::MessageConfirmed {
            local_id: message.id.clone(),
            message,
        });

        // then (期待する結果):
        assert!(line.ends_with("#lobby Alice: hi (sending)"));
        assert_eq!(typing, Some("#lobby Bob is typing...".to_string()));
        assert_eq!(nobody, None);
        assert_eq!(confirmed, None);
    }

    #[tokio::test]
    async fn test_invalid_argument_keeps_session_running() {
        // テスト項目: 不正な ID を指定したコマンドはエラー表示のみで、セッションは継続する
        // given (前提条件):
        let engine = EngineHandle::spawn(
            EngineConfig::default(),
            UserId::try_from("alice").unwrap(),
            "Alice",
            Arc::new(WebSocketConnector::new()),
        );
        let lobby = RoomId::try_from("lobby").unwrap();
        let mut current = Some(lobby.clone());

        // when (操作):
        let too_long = handle_input(&engine, &mut current, Input::Join("r".repeat(101)));
        let empty_read = handle_input(&engine, &mut current, Input::Read(String::new()));
        let bad_watch = handle_input(&engine, &mut current, Input::Watch(vec![String::new()]));

        // then (期待する結果):
        assert!(matches!(too_long, Ok(true)));
        assert!(matches!(empty_read, Ok(true)));
        assert!(matches!(bad_watch, Ok(true)));
        assert_eq!(current, Some(lobby));
        assert!(matches!(
            handle_input(&engine, &mut current, Input::Quit),
            Ok(false)
        ));

        engine.shutdown().await;
    }

    #[test]
    fn test_args_defaults() {
        // テスト項目: 省略した引数にデフォルト値が入る
        // when (操作):
        let args = Args::try_parse_from([
            "chatsync-client",
            "--token",
            "secret",
            "--user-id",
            "alice",
        ])
        .unwrap();

        // then (期待する結果):
        assert_eq!(args.endpoint, "ws://127.0.0.1:8080/ws");
        assert_eq!(args.rooms, vec!["lobby".to_string()]);
        assert_eq!(args.display_name(), "alice");
        assert_eq!(args.heartbeat_secs, 15);
    }
}
