//! The engine event loop.
//!
//! One task owns the session and every component. It processes handle
//! commands, connection triggers and timer deadlines one at a time, so no
//! component state is ever shared or locked.

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::{
    config::EngineConfig,
    domain::{
        AuthToken, ConnectionStatus, InboundFrame, Message, MessageId, OutboundFrame, RoomId,
        Session, SyncError, Timestamp, TransportError, UserId,
    },
    infrastructure::{
        connection::{ConnectionEvent, ConnectionManager, manager::sleep_until_opt},
        dto::frame::{decode_frame, encode_frame},
    },
    ui::EngineEvent,
    usecase::{
        InboundOutcome, MarkReadOutcome, MembershipOutcome, MessageStream, PresenceTracker,
        ReadReceiptTracker, ReceiptOutcome, RoomRegistry, TypingIndicatorCoordinator,
    },
};

/// Requests sent by `EngineHandle`
pub(crate) enum Command {
    Connect {
        endpoint: String,
        token: AuthToken,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    IsJoined {
        room_id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    SendMessage(Message),
    MarkRead {
        message_id: MessageId,
        room_id: RoomId,
    },
    NotifyTyping(RoomId),
    Watch(Vec<UserId>),
    Unwatch(Vec<UserId>),
    IsOnline {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    TypingIn {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<String>>,
    },
    Messages {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<Message>>,
    },
    SeedHistory {
        room_id: RoomId,
        messages: Vec<Message>,
        reply: oneshot::Sender<usize>,
    },
    Subscribe(mpsc::UnboundedSender<EngineEvent>),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Runner {
    session: Session,
    connection: ConnectionManager,
    rooms: RoomRegistry,
    stream: MessageStream,
    receipts: ReadReceiptTracker,
    typing: TypingIndicatorCoordinator,
    presence: PresenceTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
    connect_waiters: Vec<oneshot::Sender<Result<(), SyncError>>>,
    status_tx: watch::Sender<ConnectionStatus>,
    malformed_streak: usize,
    max_malformed_frames: usize,
}

impl Runner {
    pub(crate) fn new(
        session: Session,
        connection: ConnectionManager,
        config: &EngineConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let user_id = session.user_id.clone();
        Self {
            rooms: RoomRegistry::new(),
            stream: MessageStream::new(user_id.clone()),
            receipts: ReadReceiptTracker::new(user_id.clone()),
            typing: TypingIndicatorCoordinator::new(
                user_id.clone(),
                session.display_name.clone(),
                config.typing_timings(),
            ),
            presence: PresenceTracker::new(
                user_id,
                config.presence_stale_after,
                config.presence_interval,
            ),
            session,
            connection,
            commands,
            subscribers: Vec::new(),
            connect_waiters: Vec::new(),
            status_tx,
            malformed_streak: 0,
            max_malformed_frames: config.max_malformed_frames,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!("Engine started for '{}'", self.session.user_id);

        let shutdown_reply = loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => break Some(reply),
                    Some(command) => self.on_command(command).await,
                    None => break None,
                },
                trigger = self.connection.wait() => {
                    self.connection.on_trigger(trigger).await;
                }
                _ = sleep_until_opt(deadline) => {
                    self.on_timers(Instant::now()).await;
                }
            }
            self.drain_connection_events().await;
        };

        self.commands.close();
        self.connection.disconnect().await;
        self.drain_connection_events().await;
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::EngineClosed));
        }
        tracing::info!("Engine for '{}' shut down", self.session.user_id);

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn on_command(&mut self, command: Command) {
        let connected = self.connection.is_connected();
        match command {
            Command::Connect {
                endpoint,
                token,
                reply,
            } => {
                if connected {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.connect_waiters.push(reply);
                self.connection.connect(endpoint, token);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                self.drain_connection_events().await;
                let _ = reply.send(());
            }
            Command::JoinRoom(room_id) => {
                let outcome = self.rooms.join_room(room_id, connected);
                self.apply_membership(outcome).await;
            }
            Command::LeaveRoom(room_id) => {
                let outcome = self.rooms.leave_room(&room_id, connected);
                self.apply_membership(outcome).await;
            }
            Command::IsJoined { room_id, reply } => {
                let _ = reply.send(self.rooms.is_joined(&room_id));
            }
            Command::SendMessage(message) => self.submit_message(message).await,
            Command::MarkRead {
                message_id,
                room_id,
            } => self.mark_read(message_id, room_id, connected).await,
            Command::NotifyTyping(room_id) => {
                if let Some(frame) = self.typing.notify_typing(room_id, Instant::now(), connected)
                {
                    let _ = self.transmit(&frame).await;
                }
            }
            Command::Watch(user_ids) => {
                if let Some(frame) = self.presence.watch(user_ids, connected) {
                    let _ = self.transmit(&frame).await;
                }
            }
            Command::Unwatch(user_ids) => {
                if let Some(frame) = self.presence.unwatch(user_ids, connected) {
                    let _ = self.transmit(&frame).await;
                }
            }
            Command::IsOnline { user_id, reply } => {
                let _ = reply.send(self.presence.is_online(&user_id, Instant::now()));
            }
            Command::TypingIn { room_id, reply } => {
                let _ = reply.send(self.typing.typing_names(&room_id));
            }
            Command::Messages { room_id, reply } => {
                let _ = reply.send(self.stream.messages(&room_id));
            }
            Command::SeedHistory {
                room_id,
                messages,
                reply,
            } => {
                let (history, foreign): (Vec<Message>, Vec<Message>) =
                    messages.into_iter().partition(|m| m.room_id == room_id);
                if !foreign.is_empty() {
                    tracing::warn!(
                        "Ignoring {} history messages not belonging to '{}'",
                        foreign.len(),
                        room_id
                    );
                }
                let inserted = self.stream.seed_history(history);
                tracing::debug!("Seeded {} history messages into '{}'", inserted, room_id);
                let _ = reply.send(inserted);
            }
            Command::Subscribe(subscriber) => self.subscribers.push(subscriber),
            // Handled by the loop itself.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connection.disconnect().await;

        for message in self.stream.drop_outbound() {
            tracing::warn!("Message '{}' dropped by disconnect", message.id);
            self.emit(EngineEvent::MessageFailed(message));
        }
        let dropped = self.receipts.clear_pending();
        if dropped > 0 {
            tracing::debug!("Dropped {} unsent read receipts", dropped);
        }
        self.typing.reset_local();
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::Disconnected));
        }
    }

    async fn apply_membership(&mut self, outcome: MembershipOutcome) {
        match outcome {
            MembershipOutcome::Send(frame) => {
                let _ = self.transmit(&frame).await;
            }
            MembershipOutcome::Queued => {
                tracing::debug!(
                    "Membership change recorded while offline ({} queued)",
                    self.rooms.queued_len()
                );
            }
            MembershipOutcome::Unchanged => {}
        }
    }

    async fn submit_message(&mut self, message: Message) {
        let room_id = message.room_id.clone();
        let optimistic = self.stream.submit(message);
        self.emit(EngineEvent::Message(optimistic));

        if let Some(stop) = self.typing.on_message_sent(&room_id)
            && self.connection.is_connected()
        {
            let _ = self.transmit(&stop).await;
        }
        self.flush_outbound().await;
    }

    async fn mark_read(&mut self, message_id: MessageId, room_id: RoomId, connected: bool) {
        let outcome = self.receipts.mark_read(
            self.stream.get(&message_id),
            message_id,
            room_id,
            Timestamp::now(),
            connected,
        );
        match outcome {
            MarkReadOutcome::Send(receipt) => {
                if self
                    .transmit(&OutboundFrame::ReadReceipt(receipt.clone()))
                    .await
                    .is_err()
                {
                    self.receipts.requeue(vec![receipt]);
                }
            }
            MarkReadOutcome::Queued => {
                tracing::debug!(
                    "Read receipt queued while offline ({} pending)",
                    self.receipts.pending_len()
                );
            }
            MarkReadOutcome::OwnMessage | MarkReadOutcome::AlreadyAcknowledged => {}
        }
    }

    /// Transmit queued messages in submission order until the queue is empty
    /// or the link fails.
    async fn flush_outbound(&mut self) {
        while self.connection.is_connected() {
            let Some(message) = self.stream.peek_outbound().cloned() else {
                break;
            };
            if self
                .transmit(&OutboundFrame::Message(message))
                .await
                .is_err()
            {
                break;
            }
            self.stream.mark_transmitted();
        }
    }

    async fn transmit(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let text = match encode_frame(frame, Timestamp::now()) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode '{}' frame: {}", frame.kind(), e);
                return Ok(());
            }
        };
        match self.connection.send(text).await {
            Ok(()) => {
                tracing::debug!("Sent '{}' frame", frame.kind());
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Could not send '{}' frame: {}", frame.kind(), e);
                Err(e)
            }
        }
    }

    async fn drain_connection_events(&mut self) {
        while let Some(event) = self.connection.pop_event() {
            match event {
                ConnectionEvent::StatusChanged(status) => self.on_status(status),
                ConnectionEvent::Resumed => self.on_resumed().await,
                ConnectionEvent::Frame(text) => self.on_frame(&text).await,
                ConnectionEvent::Lost(e) => {
                    tracing::debug!("Link lost ({}); waiting for reconnect", e);
                }
                ConnectionEvent::AuthExpired => {
                    self.emit(EngineEvent::AuthExpired);
                    for waiter in self.connect_waiters.drain(..) {
                        let _ = waiter.send(Err(SyncError::AuthExpired));
                    }
                }
            }
        }
    }

    fn on_status(&mut self, status: ConnectionStatus) {
        let previous = self.session.status;
        self.session.status = status;
        self.status_tx.send_replace(status);
        tracing::info!("Connection status: {} -> {}", previous, status);
        self.emit(EngineEvent::ConnectionStateChanged(status));

        if previous == ConnectionStatus::Connected && status != ConnectionStatus::Connected {
            for room_id in self.typing.clear_remote() {
                self.emit(EngineEvent::TypingChanged {
                    room_id,
                    names: Vec::new(),
                });
            }
            self.typing.reset_local();
            self.presence.pause();
            self.malformed_streak = 0;
        }
    }

    /// Rebuild the server-side session: rooms, presence, then pending
    /// receipts and messages. Stops early if the link drops again; the next
    /// resume starts over.
    async fn on_resumed(&mut self) {
        for frame in self.rooms.on_resumed() {
            if self.transmit(&frame).await.is_err() {
                return;
            }
        }
        for frame in self.presence.on_resumed(Instant::now()) {
            if self.transmit(&frame).await.is_err() {
                return;
            }
        }

        let mut pending = self.receipts.take_pending().into_iter();
        while let Some(receipt) = pending.next() {
            if self
                .transmit(&OutboundFrame::ReadReceipt(receipt.clone()))
                .await
                .is_err()
            {
                let mut unsent = vec![receipt];
                unsent.extend(pending);
                self.receipts.requeue(unsent);
                return;
            }
        }

        self.flush_outbound().await;

        if self.connection.is_connected() {
            for waiter in self.connect_waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => {
                self.malformed_streak = 0;
                frame
            }
            Err(e) => {
                self.malformed_streak += 1;
                tracing::warn!(
                    "Dropping undecodable frame ({}/{}): {}",
                    self.malformed_streak,
                    self.max_malformed_frames,
                    e
                );
                if self.malformed_streak >= self.max_malformed_frames {
                    let streak = self.malformed_streak;
                    self.malformed_streak = 0;
                    self.emit(EngineEvent::Error(SyncError::TooManyMalformedFrames(streak)));
                    self.connection
                        .force_reconnect(TransportError::Receive(format!(
                            "{} malformed frames in a row",
                            streak
                        )))
                        .await;
                }
                return;
            }
        };

        match frame {
            InboundFrame::Message(remote) => match self.stream.receive(remote) {
                InboundOutcome::Delivered(message) => {
                    let message = self.with_early_receipts(message);
                    if self.typing.remote_stop(&message.room_id, &message.sender_id) {
                        self.emit_typing(message.room_id.clone());
                    }
                    self.emit(EngineEvent::Message(message));
                }
                InboundOutcome::Confirmed { local_id, message } => {
                    let message = self.with_early_receipts(message);
                    self.emit(EngineEvent::MessageConfirmed { local_id, message });
                }
                InboundOutcome::Duplicate | InboundOutcome::OutOfOrder(_) => {}
            },
            InboundFrame::ReadReceipt(receipt) => {
                let outcome = self
                    .receipts
                    .receive(self.stream.get_mut(&receipt.message_id), receipt.clone());
                if let ReceiptOutcome::Applied(message) = outcome {
                    self.emit(EngineEvent::ReadReceipt { receipt, message });
                }
            }
            InboundFrame::TypingStart {
                room_id,
                user_id,
                user_name,
            } => {
                if self
                    .typing
                    .remote_start(room_id.clone(), user_id, user_name, Instant::now())
                {
                    self.emit_typing(room_id);
                }
            }
            InboundFrame::TypingStop { room_id, user_id } => {
                if self.typing.remote_stop(&room_id, &user_id) {
                    self.emit_typing(room_id);
                }
            }
            InboundFrame::PresenceHeartbeat {
                user_id,
                online,
                seen_at,
            } => {
                if let Some(change) =
                    self.presence
                        .heartbeat(&user_id, online, seen_at, Instant::now())
                {
                    self.emit(EngineEvent::PresenceChanged {
                        user_id: change.user_id,
                        online: change.online,
                    });
                }
            }
            InboundFrame::Joined { room_id } => {
                tracing::debug!("Server confirmed join of '{}'", room_id);
            }
            InboundFrame::Left { room_id } => {
                tracing::debug!("Server confirmed leave of '{}'", room_id);
            }
            InboundFrame::Ping => {
                let _ = self.transmit(&OutboundFrame::Pong).await;
            }
            InboundFrame::Pong => {}
        }
    }

    async fn on_timers(&mut self, now: Instant) {
        let connected = self.connection.is_connected();

        for stop in self.typing.expire_local(now) {
            if connected {
                let _ = self.transmit(&stop).await;
            }
        }
        for room_id in self.typing.sweep(now) {
            self.emit_typing(room_id);
        }
        for change in self.presence.sweep(now) {
            tracing::debug!("'{}' went stale", change.user_id);
            self.emit(EngineEvent::PresenceChanged {
                user_id: change.user_id,
                online: change.online,
            });
        }
        if let Some(heartbeat) = self.presence.announce_due(now)
            && connected
        {
            let _ = self.transmit(&heartbeat).await;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.presence.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // Receipts that arrived before the message itself.
    fn with_early_receipts(&mut self, message: Message) -> Message {
        match self.stream.get_mut(&message.id) {
            Some(stored) => {
                self.receipts.apply_early(stored);
                stored.clone()
            }
            None => message,
        }
    }

    fn emit_typing(&mut self, room_id: RoomId) {
        let names = self.typing.typing_names(&room_id);
        self.emit(EngineEvent::TypingChanged { room_id, names });
    }

    fn emit(&mut self, event: EngineEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
