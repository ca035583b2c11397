//! UseCase: 入力中インジケーター
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - TypingIndicatorCoordinator のローカル入力のデバウンス・自動停止
//! - リモート入力状態の期限切れと複数人の表示順
//!
//! ### なぜこのテストが必要か
//! - 連続した入力通知が 1 回の typing_start にまとめられることを保証
//! - 停止信号が来なくてもタイムアウト後にリモート表示から消えることを保証
//! - 複数人が入力中のとき、表示順が最初に観測した順で安定することを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：入力開始・停止、メッセージ送信による停止
//! - タイムアウト：t=0 で開始、timeout=5s → t=6s で表示から消える
//! - エッジケース：自分自身の信号、切断時のクリア

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use super::timer::DeadlineMap;
use crate::domain::{OutboundFrame, RoomId, TypingSignal, UserId};

/// Timing knobs for typing indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingTimings {
    /// Minimum spacing between two outbound `typing_start` for one room
    pub debounce: Duration,
    /// Local inactivity after which `typing_stop` is sent
    pub idle: Duration,
    /// Lifetime of a remote `typing_start` without refresh
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct TypingIndicatorCoordinator {
    local_user: UserId,
    local_name: String,
    timings: TypingTimings,
    /// When the last `typing_start` went out, per room the local user types in
    local_started: HashMap<RoomId, Instant>,
    local_idle: DeadlineMap<RoomId>,
    /// Remote typists per room, in first-observed order
    remote: HashMap<RoomId, Vec<TypingSignal>>,
    remote_expiry: DeadlineMap<(RoomId, UserId)>,
}

impl TypingIndicatorCoordinator {
    pub fn new(local_user: UserId, local_name: impl Into<String>, timings: TypingTimings) -> Self {
        Self {
            local_user,
            local_name: local_name.into(),
            timings,
            local_started: HashMap::new(),
            local_idle: DeadlineMap::new(),
            remote: HashMap::new(),
            remote_expiry: DeadlineMap::new(),
        }
    }

    /// The local user typed in `room_id`.
    ///
    /// Returns a `typing_start` only for the first call of a burst, or when the
    /// debounce window elapsed so peers can refresh their expiry.
    pub fn notify_typing(
        &mut self,
        room_id: RoomId,
        now: Instant,
        connected: bool,
    ) -> Option<OutboundFrame> {
        if !connected {
            return None;
        }
        self.local_idle
            .schedule(room_id.clone(), now + self.timings.idle);

        if let Some(started) = self.local_started.get(&room_id)
            && now.duration_since(*started) < self.timings.debounce
        {
            return None;
        }
        self.local_started.insert(room_id.clone(), now);
        Some(OutboundFrame::TypingStart {
            room_id,
            user_id: self.local_user.clone(),
            user_name: self.local_name.clone(),
        })
    }

    /// A message was sent in `room_id`: stop typing there.
    pub fn on_message_sent(&mut self, room_id: &RoomId) -> Option<OutboundFrame> {
        self.local_idle.cancel(room_id);
        self.local_started
            .remove(room_id)
            .map(|_| self.stop_frame(room_id.clone()))
    }

    /// `typing_stop` for every room whose local inactivity timer fired.
    pub fn expire_local(&mut self, now: Instant) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        for room_id in self.local_idle.pop_expired(now) {
            if self.local_started.remove(&room_id).is_some() {
                frames.push(self.stop_frame(room_id));
            }
        }
        frames
    }

    /// Remote `typing_start`; returns whether the room's typist list changed.
    pub fn remote_start(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        user_name: String,
        now: Instant,
    ) -> bool {
        if user_id == self.local_user {
            return false;
        }
        let expires_at = now + self.timings.timeout;
        self.remote_expiry
            .schedule((room_id.clone(), user_id.clone()), expires_at);

        let typists = self.remote.entry(room_id.clone()).or_default();
        match typists.iter_mut().find(|s| s.user_id == user_id) {
            Some(signal) => {
                signal.expires_at = expires_at;
                if signal.user_name != user_name {
                    signal.user_name = user_name;
                    return true;
                }
                false
            }
            None => {
                typists.push(TypingSignal {
                    room_id,
                    user_id,
                    user_name,
                    expires_at,
                });
                true
            }
        }
    }

    /// Remote `typing_stop`; returns whether the room's typist list changed.
    pub fn remote_stop(&mut self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.remote_expiry
            .cancel(&(room_id.clone(), user_id.clone()));
        self.remove_remote(room_id, user_id)
    }

    /// Drop expired remote signals; returns the rooms whose list changed.
    pub fn sweep(&mut self, now: Instant) -> Vec<RoomId> {
        let mut changed: Vec<RoomId> = Vec::new();
        for (room_id, user_id) in self.remote_expiry.pop_expired(now) {
            if self.remove_remote(&room_id, &user_id) && !changed.contains(&room_id) {
                changed.push(room_id);
            }
        }
        changed
    }

    /// Names of remote typists in `room_id`, first-observed first.
    pub fn typing_names(&self, room_id: &RoomId) -> Vec<String> {
        self.remote
            .get(room_id)
            .map(|typists| typists.iter().map(|s| s.user_name.clone()).collect())
            .unwrap_or_default()
    }

    /// Connection lost: forget every remote typist; returns affected rooms.
    pub fn clear_remote(&mut self) -> Vec<RoomId> {
        self.remote_expiry.clear();
        let mut rooms: Vec<RoomId> = self
            .remote
            .drain()
            .filter(|(_, typists)| !typists.is_empty())
            .map(|(room_id, _)| room_id)
            .collect();
        rooms.sort();
        rooms
    }

    /// Connection lost: the server forgets our typing state on its own.
    pub fn reset_local(&mut self) {
        self.local_started.clear();
        self.local_idle.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.local_idle.next(), self.remote_expiry.next()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn remove_remote(&mut self, room_id: &RoomId, user_id: &UserId) -> bool {
        let Some(typists) = self.remote.get_mut(room_id) else {
            return false;
        };
        let before = typists.len();
        typists.retain(|s| &s.user_id != user_id);
        let removed = typists.len() != before;
        if typists.is_empty() {
            self.remote.remove(room_id);
        }
        removed
    }

    fn stop_frame(&self, room_id: RoomId) -> OutboundFrame {
        OutboundFrame::TypingStop {
            room_id,
            user_id: self.local_user.clone(),
        }
    }
}

/// Render the typists of a room as one line, e.g. "Alice and Bob are typing...".
pub fn format_typing(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{} is typing...", one)),
        [first, second] => Some(format!("{} and {} are typing...", first, second)),
        [first, second, third] => Some(format!(
            "{}, {} and {} are typing...",
            first, second, third
        )),
        [first, second, rest @ ..] => Some(format!(
            "{}, {} and {} others are typing...",
            first,
            second,
            rest.len()
        )),
    }
}
