//! UseCase: ルーム参加状態の管理
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - RoomRegistry の join_room / leave_room / is_joined / on_resumed
//!
//! ### なぜこのテストが必要か
//! - join / leave の重複呼び出しが冪等であることを保証
//! - 再接続後にサーバーへ参加済みルームが再送されることを保証
//!   （サーバーは再接続前のメンバーシップを保持しない）
//!
//! ### どのような状況を想定しているか
//! - 正常系：接続中の参加・退出
//! - 切断中の参加・退出（キューに積まれ、再接続時に反映）
//! - エッジケース：重複参加、未参加ルームからの退出

use tracing::debug;

use crate::domain::{OutboundFrame, RoomId};

/// Result of a membership change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipOutcome {
    /// Already in the requested state; nothing to do
    Unchanged,
    /// Connected: transmit this frame now
    Send(OutboundFrame),
    /// Disconnected: recorded, reconciled on the next resume
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueuedIntent {
    Join(RoomId),
    Leave(RoomId),
}

/// Rooms the local session has joined, in first-joined order.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Vec<RoomId>,
    queued: Vec<QueuedIntent>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room. Joining a room already joined is a no-op.
    pub fn join_room(&mut self, room_id: RoomId, connected: bool) -> MembershipOutcome {
        if self.is_joined(&room_id) {
            return MembershipOutcome::Unchanged;
        }
        self.rooms.push(room_id.clone());

        if connected {
            MembershipOutcome::Send(OutboundFrame::Join { room_id })
        } else {
            self.record(QueuedIntent::Join(room_id));
            MembershipOutcome::Queued
        }
    }

    /// Leave a room. Leaving a room not joined is a no-op.
    pub fn leave_room(&mut self, room_id: &RoomId, connected: bool) -> MembershipOutcome {
        let Some(position) = self.rooms.iter().position(|r| r == room_id) else {
            return MembershipOutcome::Unchanged;
        };
        self.rooms.remove(position);

        if connected {
            MembershipOutcome::Send(OutboundFrame::Leave {
                room_id: room_id.clone(),
            })
        } else {
            self.record(QueuedIntent::Leave(room_id.clone()));
            MembershipOutcome::Queued
        }
    }

    pub fn is_joined(&self, room_id: &RoomId) -> bool {
        self.rooms.contains(room_id)
    }

    pub fn joined_rooms(&self) -> &[RoomId] {
        &self.rooms
    }

    /// Number of membership intents recorded while disconnected.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Build the join replay for a fresh server session.
    ///
    /// The replay is the net membership: every room currently joined, in
    /// first-joined order. Queued leaves are satisfied by the fresh session
    /// having no membership at all.
    pub fn on_resumed(&mut self) -> Vec<OutboundFrame> {
        for intent in self.queued.drain(..) {
            if let QueuedIntent::Leave(room_id) = intent {
                debug!("Leave of '{}' settled by reconnect", room_id);
            }
        }

        self.rooms
            .iter()
            .map(|room_id| OutboundFrame::Join {
                room_id: room_id.clone(),
            })
            .collect()
    }

    // A join followed by a leave of the same room (or vice versa) while
    // offline cancels out.
    fn record(&mut self, intent: QueuedIntent) {
        let opposite = match &intent {
            QueuedIntent::Join(room_id) => QueuedIntent::Leave(room_id.clone()),
            QueuedIntent::Leave(room_id) => QueuedIntent::Join(room_id.clone()),
        };
        if let Some(position) = self.queued.iter().position(|q| *q == opposite) {
            self.queued.remove(position);
        } else {
            self.queued.push(intent);
        }
    }
}
