//! UseCase: メッセージストリーム
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - MessageStream の submit / receive / seed_history / 送信キュー操作
//!
//! ### なぜこのテストが必要か
//! - 楽観的送信（一時 ID）とサーバー確定メッセージの突き合わせを保証
//! - 同一 ID の重複配信が 1 回に抑制されることを保証（at-least-once 前提）
//! - 同一ルーム・同一送信元のメッセージが sent_at の逆順で配信されないことを保証
//! - 切断中の送信が順序を保ったままキューに保持されることを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：受信メッセージの配信、送信メッセージの確定
//! - 異常系：順序が逆転したメッセージ、明示的切断によるキュー破棄
//! - エッジケース：送信失敗後にサーバーが実は受信していた場合のエコー

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::domain::{
    DeliveryState, Message, MessageId, MessageIdFactory, RemoteMessage, RoomId, Timestamp, UserId,
};

/// What happened to an inbound server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// New message: deliver to subscribers
    Delivered(Message),
    /// Server echo of an optimistic local message, replaced in place
    Confirmed { local_id: MessageId, message: Message },
    /// Server id already seen; suppressed
    Duplicate,
    /// Older than the last message emitted for this room and sender;
    /// kept in the timeline but not emitted live
    OutOfOrder(Message),
}

/// Per-room message timeline with optimistic sends and an outbound queue.
#[derive(Debug)]
pub struct MessageStream {
    local_user: UserId,
    messages: HashMap<MessageId, Message>,
    timelines: HashMap<RoomId, Vec<MessageId>>,
    /// temporary id -> server id, for confirmed local messages
    aliases: HashMap<MessageId, MessageId>,
    /// temporary ids waiting for transmission, in submission order
    outbound: VecDeque<MessageId>,
    last_emitted: HashMap<(RoomId, UserId), Timestamp>,
}

impl MessageStream {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            messages: HashMap::new(),
            timelines: HashMap::new(),
            aliases: HashMap::new(),
            outbound: VecDeque::new(),
            last_emitted: HashMap::new(),
        }
    }

    /// Record an optimistic local message and queue it for transmission.
    ///
    /// Returns the message to deliver to subscribers right away.
    pub fn submit(&mut self, mut message: Message) -> Message {
        message.delivery = DeliveryState::Pending;
        self.note_emitted(&message.room_id, &message.sender_id, message.sent_at);

        self.timelines
            .entry(message.room_id.clone())
            .or_default()
            .push(message.id.clone());
        self.outbound.push_back(message.id.clone());
        self.messages.insert(message.id.clone(), message.clone());

        message
    }

    /// Head of the outbound queue.
    pub fn peek_outbound(&self) -> Option<&Message> {
        self.outbound.front().and_then(|id| self.messages.get(id))
    }

    /// Pop the head of the outbound queue after it was written to the transport.
    pub fn mark_transmitted(&mut self) -> Option<MessageId> {
        let id = self.outbound.pop_front()?;
        if let Some(message) = self.messages.get_mut(&id)
            && message.delivery == DeliveryState::Pending
        {
            message.delivery = DeliveryState::Sent;
        }
        Some(id)
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Drop the outbound queue (explicit disconnect) and return the messages
    /// that will never be transmitted, now marked `Failed`.
    pub fn drop_outbound(&mut self) -> Vec<Message> {
        let mut dropped = Vec::with_capacity(self.outbound.len());
        for id in self.outbound.drain(..) {
            if let Some(message) = self.messages.get_mut(&id) {
                message.delivery = DeliveryState::Failed;
                dropped.push(message.clone());
            }
        }
        dropped
    }

    /// Merge a server message into the timeline.
    pub fn receive(&mut self, remote: RemoteMessage) -> InboundOutcome {
        if let Some(local_id) = self.pending_local_match(&remote) {
            return self.reconcile(local_id, remote);
        }

        if self.messages.contains_key(&remote.id) || self.aliases.contains_key(&remote.id) {
            debug!("Suppressed duplicate delivery of message '{}'", remote.id);
            return InboundOutcome::Duplicate;
        }
        if let Some(client_id) = &remote.client_id
            && self.aliases.contains_key(client_id)
        {
            debug!(
                "Suppressed second confirmation of '{}' (server id '{}')",
                client_id, remote.id
            );
            return InboundOutcome::Duplicate;
        }

        let message = Message {
            id: remote.id,
            room_id: remote.room_id,
            sender_id: remote.sender_id,
            sender_name: remote.sender_name,
            body: remote.body,
            sent_at: remote.sent_at,
            read_by: Default::default(),
            read_at: None,
            delivery: DeliveryState::Confirmed,
        };

        let key = (message.room_id.clone(), message.sender_id.clone());
        if let Some(last) = self.last_emitted.get(&key)
            && message.sent_at < *last
        {
            warn!(
                "Message '{}' from '{}' in '{}' is older than the last delivered one; not emitting",
                message.id, message.sender_id, message.room_id
            );
            self.insert_sorted(&message);
            self.messages.insert(message.id.clone(), message.clone());
            return InboundOutcome::OutOfOrder(message);
        }

        self.note_emitted(&message.room_id, &message.sender_id, message.sent_at);
        self.timelines
            .entry(message.room_id.clone())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message.clone());

        InboundOutcome::Delivered(message)
    }

    /// Merge messages fetched by the history collaborator.
    ///
    /// Nothing is emitted; later live redelivery of the same ids is
    /// suppressed. Returns how many messages were new.
    pub fn seed_history(&mut self, history: Vec<Message>) -> usize {
        let mut inserted = 0;
        for mut message in history {
            if self.messages.contains_key(&message.id) || self.aliases.contains_key(&message.id) {
                continue;
            }
            if message.delivery == DeliveryState::Pending {
                message.delivery = DeliveryState::Confirmed;
            }
            self.note_emitted(&message.room_id, &message.sender_id, message.sent_at);
            self.insert_sorted(&message);
            self.messages.insert(message.id.clone(), message);
            inserted += 1;
        }
        inserted
    }

    /// Look up a message by server id or by the temporary id it was sent with.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let id = self.aliases.get(id).unwrap_or(id);
        self.messages.get(id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let id = self.aliases.get(id).unwrap_or(id);
        self.messages.get_mut(id)
    }

    /// Timeline of a room in delivery order.
    pub fn messages(&self, room_id: &RoomId) -> Vec<Message> {
        self.timelines
            .get(room_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn pending_local_match(&self, remote: &RemoteMessage) -> Option<MessageId> {
        [remote.client_id.as_ref(), Some(&remote.id)]
            .into_iter()
            .flatten()
            .find(|candidate| {
                MessageIdFactory::is_temporary(candidate)
                    && self.messages.get(*candidate).is_some_and(|m| {
                        m.sender_id == self.local_user && m.delivery != DeliveryState::Confirmed
                    })
            })
            .cloned()
    }

    fn reconcile(&mut self, local_id: MessageId, remote: RemoteMessage) -> InboundOutcome {
        let Some(mut message) = self.messages.remove(&local_id) else {
            return InboundOutcome::Duplicate;
        };

        // The first transmission may have failed after the server got it.
        self.outbound.retain(|id| *id != local_id);

        message.id = remote.id.clone();
        message.body = remote.body;
        message.sender_name = remote.sender_name;
        message.delivery = DeliveryState::Confirmed;

        if let Some(slot) = self
            .timelines
            .get_mut(&message.room_id)
            .and_then(|ids| ids.iter_mut().find(|id| **id == local_id))
        {
            *slot = remote.id.clone();
        }
        if local_id != remote.id {
            self.aliases.insert(local_id.clone(), remote.id.clone());
        }
        self.messages.insert(remote.id, message.clone());

        debug!("Confirmed local message '{}' as '{}'", local_id, message.id);
        InboundOutcome::Confirmed { local_id, message }
    }

    fn note_emitted(&mut self, room_id: &RoomId, sender_id: &UserId, sent_at: Timestamp) {
        let last = self
            .last_emitted
            .entry((room_id.clone(), sender_id.clone()))
            .or_insert(sent_at);
        *last = (*last).max(sent_at);
    }

    fn insert_sorted(&mut self, message: &Message) {
        let timeline = self.timelines.entry(message.room_id.clone()).or_default();
        let position = timeline
            .iter()
            .rposition(|id| {
                self.messages
                    .get(id)
                    .is_some_and(|m| m.sent_at <= message.sent_at)
            })
            .map(|p| p + 1)
            .unwrap_or(0);
        timeline.insert(position, message.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageBody;

    fn user(id: &str) -> UserId {
        UserId::try_from(id).unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::try_from(id).unwrap()
    }

    fn local_message(body: &str, sent_at: i64) -> Message {
        Message::outgoing(
            MessageIdFactory::temporary().unwrap(),
            room("room1"),
            user("alice"),
            "Alice",
            MessageBody::try_from(body.to_string()).unwrap(),
            Timestamp::new(sent_at),
        )
    }

    fn remote(id: &str, sender: &str, sent_at: i64) -> RemoteMessage {
        RemoteMessage {
            id: MessageId::try_from(id).unwrap(),
            client_id: None,
            room_id: room("room1"),
            sender_id: user(sender),
            sender_name: sender.to_string(),
            body: MessageBody::try_from(format!("body of {}", id)).unwrap(),
            sent_at: Timestamp::new(sent_at),
        }
    }

    #[test]
    fn test_submit_queues_in_submission_order() {
        // テスト項目: 送信したメッセージは送信順に送信キューへ積まれる
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        let first = local_message("one", 1);
        let second = local_message("two", 2);

        // when (操作):
        let delivered = stream.submit(first.clone());
        stream.submit(second.clone());

        // then (期待する結果):
        assert_eq!(delivered.delivery, DeliveryState::Pending);
        assert_eq!(stream.outbound_len(), 2);
        assert_eq!(stream.peek_outbound().unwrap().id, first.id);
        assert_eq!(stream.mark_transmitted(), Some(first.id.clone()));
        assert_eq!(stream.peek_outbound().unwrap().id, second.id);
        assert_eq!(stream.get(&first.id).unwrap().delivery, DeliveryState::Sent);
    }

    #[test]
    fn test_receive_new_message_is_delivered() {
        // テスト項目: 未知の ID のメッセージは配信される
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));

        // when (操作):
        let outcome = stream.receive(remote("srv-1", "bob", 10));

        // then (期待する結果):
        match outcome {
            InboundOutcome::Delivered(message) => {
                assert_eq!(message.id.as_str(), "srv-1");
                assert_eq!(message.delivery, DeliveryState::Confirmed);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(stream.messages(&room("room1")).len(), 1);
    }

    #[test]
    fn test_receive_same_id_twice_is_suppressed() {
        // テスト項目: 同じサーバー ID のメッセージは 1 回だけ配信される
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        stream.receive(remote("srv-1", "bob", 10));

        // when (操作):
        let outcome = stream.receive(remote("srv-1", "bob", 10));

        // then (期待する結果):
        assert_eq!(outcome, InboundOutcome::Duplicate);
        assert_eq!(stream.messages(&room("room1")).len(), 1);
    }

    #[test]
    fn test_echo_replaces_optimistic_message_in_place() {
        // テスト項目: 一時 ID を持つサーバーのエコーは楽観的メッセージを同じ位置で置き換える
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        let local = stream.submit(local_message("hi", 5));
        stream.mark_transmitted();
        stream.receive(remote("srv-9", "bob", 6));
        let mut echo = remote("srv-1", "alice", 7);
        echo.client_id = Some(local.id.clone());

        // when (操作):
        let outcome = stream.receive(echo);

        // then (期待する結果):
        match outcome {
            InboundOutcome::Confirmed { local_id, message } => {
                assert_eq!(local_id, local.id);
                assert_eq!(message.id.as_str(), "srv-1");
                assert_eq!(message.delivery, DeliveryState::Confirmed);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let ids: Vec<String> = stream
            .messages(&room("room1"))
            .into_iter()
            .map(|m| m.id.into_string())
            .collect();
        assert_eq!(ids, vec!["srv-1".to_string(), "srv-9".to_string()]);
        assert_eq!(stream.get(&local.id).unwrap().id.as_str(), "srv-1");
    }

    #[test]
    fn test_echo_of_queued_message_removes_it_from_queue() {
        // テスト項目: 送信キューに残っているメッセージのエコーを受け取ると再送対象から外れる
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        let local = stream.submit(local_message("hi", 5));
        let mut echo = remote("srv-1", "alice", 5);
        echo.client_id = Some(local.id.clone());

        // when (操作):
        stream.receive(echo);

        // then (期待する結果):
        assert_eq!(stream.outbound_len(), 0);
        assert!(stream.peek_outbound().is_none());
    }

    #[test]
    fn test_second_confirmation_is_duplicate() {
        // テスト項目: 同じ一時 ID の 2 回目の確定は重複として抑制される
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        let local = stream.submit(local_message("hi", 5));
        let mut echo = remote("srv-1", "alice", 5);
        echo.client_id = Some(local.id.clone());
        stream.receive(echo.clone());

        // when (操作):
        let outcome = stream.receive(echo);

        // then (期待する結果):
        assert_eq!(outcome, InboundOutcome::Duplicate);
    }

    #[test]
    fn test_same_origin_older_message_is_not_emitted() {
        // テスト項目: 同一ルーム・同一送信元で sent_at が逆行するメッセージは配信されない
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        stream.receive(remote("srv-2", "bob", 20));

        // when (操作):
        let outcome = stream.receive(remote("srv-1", "bob", 10));

        // then (期待する結果):
        assert!(matches!(outcome, InboundOutcome::OutOfOrder(_)));
        let ids: Vec<String> = stream
            .messages(&room("room1"))
            .into_iter()
            .map(|m| m.id.into_string())
            .collect();
        assert_eq!(ids, vec!["srv-1".to_string(), "srv-2".to_string()]);
    }

    #[test]
    fn test_cross_origin_interleaving_follows_arrival() {
        // テスト項目: 異なる送信元のメッセージは到着順に配信される
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        stream.receive(remote("srv-2", "bob", 20));

        // when (操作):
        let outcome = stream.receive(remote("srv-1", "carol", 10));

        // then (期待する結果):
        assert!(matches!(outcome, InboundOutcome::Delivered(_)));
    }

    #[test]
    fn test_drop_outbound_marks_messages_failed() {
        // テスト項目: 明示的切断で送信キューは破棄され、メッセージは Failed になる
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        let first = stream.submit(local_message("one", 1));
        stream.submit(local_message("two", 2));

        // when (操作):
        let dropped = stream.drop_outbound();

        // then (期待する結果):
        assert_eq!(dropped.len(), 2);
        assert!(dropped.iter().all(|m| m.delivery == DeliveryState::Failed));
        assert_eq!(stream.outbound_len(), 0);
        assert_eq!(stream.get(&first.id).unwrap().delivery, DeliveryState::Failed);
    }

    #[test]
    fn test_seed_history_suppresses_live_redelivery() {
        // テスト項目: 履歴として取り込んだメッセージはライブ再配信時に重複として扱われる
        // given (前提条件):
        let mut stream = MessageStream::new(user("alice"));
        let mut historical = local_message("old", 1);
        historical.id = MessageId::try_from("srv-1").unwrap();

        // when (操作):
        let inserted = stream.seed_history(vec![historical.clone(), historical]);
        let outcome = stream.receive(remote("srv-1", "alice", 1));

        // then (期待する結果):
        assert_eq!(inserted, 1);
        assert_eq!(outcome, InboundOutcome::Duplicate);
        assert_eq!(
            stream.messages(&room("room1"))[0].delivery,
            DeliveryState::Confirmed
        );
    }
}
