//! Consumer-facing handle to a running engine.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use tokio::sync::{mpsc, oneshot, watch};

use super::EngineEvent;
use crate::{
    config::EngineConfig,
    domain::{
        AuthToken, ConnectionStatus, Connector, Message, MessageBody, MessageId,
        MessageIdFactory, RoomId, Session, SyncError, Timestamp, UserId,
    },
    infrastructure::connection::ConnectionManager,
    runner::{Command, Runner},
};

/// Cheap, cloneable handle to the engine task.
///
/// Every method only enqueues a command; queries wait for the answer of the
/// event loop. Once the engine has shut down every call fails with
/// [`SyncError::EngineClosed`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    user_id: UserId,
    display_name: Arc<str>,
    /// Last `sent_at` handed out, in milliseconds
    clock: Arc<AtomicI64>,
}

impl EngineHandle {
    /// Spawn the engine task for `user_id` on the current tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        user_id: UserId,
        display_name: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let display_name: String = display_name.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let session = Session::new(user_id.clone(), display_name.clone());
        let connection = ConnectionManager::new(connector, &config);
        let runner = Runner::new(session, connection, &config, commands_rx, status_tx);
        tokio::spawn(runner.run());

        Self {
            commands: commands_tx,
            status: status_rx,
            user_id,
            display_name: display_name.into(),
            clock: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receive every future [`EngineEvent`].
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<EngineEvent>, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.command(Command::Subscribe(tx))?;
        Ok(rx)
    }

    /// Connect and wait until the session is `Connected`.
    ///
    /// Fails with `AuthExpired` when the token keeps being rejected and
    /// with `Disconnected` when [`EngineHandle::disconnect`] cancels it.
    pub async fn connect(
        &self,
        endpoint: impl Into<String>,
        token: AuthToken,
    ) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect {
            endpoint: endpoint.into(),
            token,
            reply,
        })?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }

    /// Close the connection, stop reconnecting and drop unsent messages.
    pub async fn disconnect(&self) -> Result<(), SyncError> {
        self.ask(|reply| Command::Disconnect { reply }).await
    }

    pub fn join_room(&self, room_id: RoomId) -> Result<(), SyncError> {
        self.command(Command::JoinRoom(room_id))
    }

    pub fn leave_room(&self, room_id: RoomId) -> Result<(), SyncError> {
        self.command(Command::LeaveRoom(room_id))
    }

    pub async fn is_joined(&self, room_id: &RoomId) -> Result<bool, SyncError> {
        let room_id = room_id.clone();
        self.ask(|reply| Command::IsJoined { room_id, reply }).await
    }

    /// Send `body` to `room_id`.
    ///
    /// Never blocks: the optimistic message is returned (and delivered to
    /// subscribers) right away, and transmitted once connected.
    pub fn send_message(&self, room_id: &RoomId, body: &str) -> Result<Message, SyncError> {
        let body = MessageBody::new(body.to_string())?;
        let message = Message::outgoing(
            MessageIdFactory::temporary()?,
            room_id.clone(),
            self.user_id.clone(),
            &*self.display_name,
            body,
            self.next_sent_at(),
        );
        self.command(Command::SendMessage(message.clone()))?;
        Ok(message)
    }

    /// Acknowledge reading a message authored by someone else.
    pub fn mark_read(&self, message_id: MessageId, room_id: RoomId) -> Result<(), SyncError> {
        self.command(Command::MarkRead {
            message_id,
            room_id,
        })
    }

    /// The local user is typing in `room_id`; call on every keystroke.
    pub fn notify_typing(&self, room_id: RoomId) -> Result<(), SyncError> {
        self.command(Command::NotifyTyping(room_id))
    }

    /// Names of the peers currently typing in `room_id`.
    pub async fn typing_in(&self, room_id: &RoomId) -> Result<Vec<String>, SyncError> {
        let room_id = room_id.clone();
        self.ask(|reply| Command::TypingIn { room_id, reply }).await
    }

    pub fn watch(&self, user_ids: Vec<UserId>) -> Result<(), SyncError> {
        self.command(Command::Watch(user_ids))
    }

    pub fn unwatch(&self, user_ids: Vec<UserId>) -> Result<(), SyncError> {
        self.command(Command::Unwatch(user_ids))
    }

    pub async fn is_online(&self, user_id: &UserId) -> Result<bool, SyncError> {
        let user_id = user_id.clone();
        self.ask(|reply| Command::IsOnline { user_id, reply }).await
    }

    /// Timeline of `room_id` as known to the engine.
    pub async fn messages(&self, room_id: &RoomId) -> Result<Vec<Message>, SyncError> {
        let room_id = room_id.clone();
        self.ask(|reply| Command::Messages { room_id, reply }).await
    }

    /// Hand over messages fetched from history so their live redelivery is
    /// suppressed. Returns how many were new.
    pub async fn seed_history(
        &self,
        room_id: &RoomId,
        messages: Vec<Message>,
    ) -> Result<usize, SyncError> {
        let room_id = room_id.clone();
        self.ask(|reply| Command::SeedHistory {
            room_id,
            messages,
            reply,
        })
        .await
    }

    /// Stop the engine task. Later calls on any clone fail with `EngineClosed`.
    pub async fn shutdown(&self) {
        // Already stopped when the command cannot be delivered.
        let _ = self.ask(|reply| Command::Shutdown { reply }).await;
    }

    fn command(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::EngineClosed)
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply))?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }

    // Strictly increasing per session so two sends never share a sent_at.
    fn next_sent_at(&self) -> Timestamp {
        let now = Timestamp::now().value();
        let previous = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Timestamp::new(now.max(previous + 1))
    }
}
