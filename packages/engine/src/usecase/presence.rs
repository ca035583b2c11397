//! UseCase: オンライン状態（プレゼンス）の追跡
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - PresenceTracker の watch / unwatch（参照カウント）
//! - heartbeat による online 化と、古くなった heartbeat による offline 化
//!
//! ### なぜこのテストが必要か
//! - 購読者が 1 人でも残っている限りユーザーの監視が続くことを保証
//! - heartbeat を一度も観測していないユーザーを online と見なさないことを保証
//! - staleness 期間を超えると offline に遷移し、再び heartbeat が届くと online に戻ることを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：監視開始、heartbeat、監視解除
//! - タイムアウト：heartbeat が途絶えたユーザー
//! - エッジケース：重複した watch、未監視ユーザーの heartbeat、明示的な offline 通知

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use tracing::debug;

use super::timer::DeadlineMap;
use crate::domain::{OutboundFrame, PresenceEntry, Timestamp, UserId};

/// An online/offline transition to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: UserId,
    pub online: bool,
}

#[derive(Debug)]
pub struct PresenceTracker {
    local_user: UserId,
    stale_after: Duration,
    announce_every: Duration,
    watchers: HashMap<UserId, usize>,
    entries: HashMap<UserId, PresenceEntry>,
    staleness: DeadlineMap<UserId>,
    next_announce: Option<Instant>,
}

impl PresenceTracker {
    pub fn new(local_user: UserId, stale_after: Duration, announce_every: Duration) -> Self {
        Self {
            local_user,
            stale_after,
            announce_every,
            watchers: HashMap::new(),
            entries: HashMap::new(),
            staleness: DeadlineMap::new(),
            next_announce: None,
        }
    }

    /// Add one subscriber's interest in `user_ids`.
    ///
    /// Returns a `presence_subscribe` for ids that were not watched before,
    /// when connected. While disconnected the whole set is sent on resume.
    pub fn watch(&mut self, user_ids: Vec<UserId>, connected: bool) -> Option<OutboundFrame> {
        let mut newly_watched = Vec::new();
        for user_id in user_ids {
            let count = self.watchers.entry(user_id.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                self.entries
                    .insert(user_id.clone(), PresenceEntry::unknown(user_id.clone()));
                newly_watched.push(user_id);
            }
        }

        (connected && !newly_watched.is_empty()).then_some(OutboundFrame::PresenceSubscribe {
            user_ids: newly_watched,
        })
    }

    /// Release one subscriber's interest in `user_ids`.
    ///
    /// A peer stops being watched only when its last subscriber is gone.
    pub fn unwatch(&mut self, user_ids: Vec<UserId>, connected: bool) -> Option<OutboundFrame> {
        let mut released = Vec::new();
        for user_id in user_ids {
            let Some(count) = self.watchers.get_mut(&user_id) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.watchers.remove(&user_id);
                self.entries.remove(&user_id);
                self.staleness.cancel(&user_id);
                released.push(user_id);
            }
        }

        (connected && !released.is_empty()).then_some(OutboundFrame::PresenceUnsubscribe {
            user_ids: released,
        })
    }

    pub fn is_watched(&self, user_id: &UserId) -> bool {
        self.watchers.contains_key(user_id)
    }

    /// Online only with a heartbeat inside the staleness window; unknown is offline.
    ///
    /// Checks the window against `now` so the answer does not depend on
    /// whether [`PresenceTracker::sweep`] already ran.
    pub fn is_online(&self, user_id: &UserId, now: Instant) -> bool {
        self.entries.get(user_id).is_some_and(|e| e.online)
            && self
                .staleness
                .deadline(user_id)
                .is_some_and(|stale_at| now < stale_at)
    }

    pub fn entry(&self, user_id: &UserId) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    /// Apply a presence heartbeat for a watched peer.
    pub fn heartbeat(
        &mut self,
        user_id: &UserId,
        online: bool,
        seen_at: Timestamp,
        now: Instant,
    ) -> Option<PresenceChange> {
        let Some(entry) = self.entries.get_mut(user_id) else {
            debug!("Ignoring presence of unwatched user '{}'", user_id);
            return None;
        };
        entry.last_seen_at = Some(entry.last_seen_at.map_or(seen_at, |t| t.max(seen_at)));

        if online {
            self.staleness
                .schedule(user_id.clone(), now + self.stale_after);
        } else {
            self.staleness.cancel(user_id);
        }

        if entry.online == online {
            return None;
        }
        entry.online = online;
        Some(PresenceChange {
            user_id: user_id.clone(),
            online,
        })
    }

    /// Mark peers whose last heartbeat is older than the staleness window offline.
    pub fn sweep(&mut self, now: Instant) -> Vec<PresenceChange> {
        self.staleness
            .pop_expired(now)
            .into_iter()
            .filter_map(|user_id| {
                let entry = self.entries.get_mut(&user_id)?;
                if !entry.online {
                    return None;
                }
                entry.online = false;
                Some(PresenceChange {
                    user_id,
                    online: false,
                })
            })
            .collect()
    }

    /// Fresh server session: subscribe to the whole watch set again and
    /// start announcing ourselves.
    pub fn on_resumed(&mut self, now: Instant) -> Vec<OutboundFrame> {
        self.next_announce = Some(now + self.announce_every);

        let mut frames = vec![self.announce_frame()];
        if !self.watchers.is_empty() {
            let mut user_ids: Vec<UserId> = self.watchers.keys().cloned().collect();
            user_ids.sort();
            frames.push(OutboundFrame::PresenceSubscribe { user_ids });
        }
        frames
    }

    /// Connection lost: stop announcing until the next resume.
    pub fn pause(&mut self) {
        self.next_announce = None;
    }

    /// Our own periodic heartbeat, when due.
    pub fn announce_due(&mut self, now: Instant) -> Option<OutboundFrame> {
        let due = self.next_announce.filter(|at| *at <= now)?;
        let mut next = due + self.announce_every;
        if next <= now {
            next = now + self.announce_every;
        }
        self.next_announce = Some(next);
        Some(self.announce_frame())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.staleness.next(), self.next_announce) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn announce_frame(&self) -> OutboundFrame {
        OutboundFrame::PresenceHeartbeat {
            user_id: self.local_user.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(30);
    const ANNOUNCE: Duration = Duration::from_secs(10);

    fn user(id: &str) -> UserId {
        UserId::try_from(id).unwrap()
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(user("alice"), STALE, ANNOUNCE)
    }

    #[test]
    fn test_watch_is_reference_counted() {
        // テスト項目: 複数の購読者が監視するユーザーは、最後の購読者が解除するまで監視が続く
        // given (前提条件):
        let mut presence = tracker();
        let first = presence.watch(vec![user("bob")], true);
        let second = presence.watch(vec![user("bob")], true);

        // when (操作):
        let after_one = presence.unwatch(vec![user("bob")], true);
        let still_watched = presence.is_watched(&user("bob"));
        let after_two = presence.unwatch(vec![user("bob")], true);

        // then (期待する結果):
        assert_eq!(
            first,
            Some(OutboundFrame::PresenceSubscribe {
                user_ids: vec![user("bob")]
            })
        );
        assert_eq!(second, None);
        assert_eq!(after_one, None);
        assert!(still_watched);
        assert_eq!(
            after_two,
            Some(OutboundFrame::PresenceUnsubscribe {
                user_ids: vec![user("bob")]
            })
        );
        assert!(!presence.is_watched(&user("bob")));
    }

    #[test]
    fn test_unknown_peer_is_offline() {
        // テスト項目: heartbeat を一度も観測していないユーザーは offline と見なされる
        // given (前提条件):
        let mut presence = tracker();

        // when (操作):
        presence.watch(vec![user("bob")], true);

        // then (期待する結果):
        assert!(!presence.is_online(&user("bob"), Instant::now()));
        assert!(!presence.is_online(&user("nobody"), Instant::now()));
        assert_eq!(presence.entry(&user("bob")).unwrap().last_seen_at, None);
    }

    #[test]
    fn test_stale_heartbeat_goes_offline_and_recovers() {
        // テスト項目: staleness 期間を超えると offline になり、再度 heartbeat が届くと online に戻る
        // given (前提条件):
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.watch(vec![user("bob")], true);
        let came_online = presence.heartbeat(&user("bob"), true, Timestamp::new(1), t0);

        // when (操作):
        let before = presence.sweep(t0 + Duration::from_secs(29));
        let after = presence.sweep(t0 + Duration::from_secs(31));
        let offline_now = !presence.is_online(&user("bob"), t0 + Duration::from_secs(31));
        let back = presence.heartbeat(
            &user("bob"),
            true,
            Timestamp::new(2),
            t0 + Duration::from_secs(40),
        );

        // then (期待する結果):
        assert_eq!(
            came_online,
            Some(PresenceChange {
                user_id: user("bob"),
                online: true
            })
        );
        assert!(before.is_empty());
        assert_eq!(
            after,
            vec![PresenceChange {
                user_id: user("bob"),
                online: false
            }]
        );
        assert!(offline_now);
        assert_eq!(
            back,
            Some(PresenceChange {
                user_id: user("bob"),
                online: true
            })
        );
        assert!(presence.is_online(&user("bob"), t0 + Duration::from_secs(40)));
    }

    #[test]
    fn test_is_online_expires_before_sweep_runs() {
        // テスト項目: sweep が走る前でも staleness 期間を過ぎた時点で offline と判定される
        // given (前提条件):
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.watch(vec![user("bob")], true);
        presence.heartbeat(&user("bob"), true, Timestamp::new(1), t0);

        // when (操作):
        let inside = presence.is_online(&user("bob"), t0 + STALE - Duration::from_millis(1));
        let at_deadline = presence.is_online(&user("bob"), t0 + STALE);

        // then (期待する結果):
        assert!(inside);
        assert!(!at_deadline);
        assert!(presence.entry(&user("bob")).unwrap().online);
    }

    #[test]
    fn test_heartbeat_refresh_keeps_online_without_change() {
        // テスト項目: online 中の heartbeat は期限を延長し、変更イベントは発生しない
        // given (前提条件):
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.watch(vec![user("bob")], true);
        presence.heartbeat(&user("bob"), true, Timestamp::new(1), t0);

        // when (操作):
        let change = presence.heartbeat(
            &user("bob"),
            true,
            Timestamp::new(2),
            t0 + Duration::from_secs(20),
        );
        let swept = presence.sweep(t0 + Duration::from_secs(40));

        // then (期待する結果):
        assert_eq!(change, None);
        assert!(swept.is_empty());
        assert_eq!(
            presence.entry(&user("bob")).unwrap().last_seen_at,
            Some(Timestamp::new(2))
        );
    }

    #[test]
    fn test_explicit_offline_heartbeat() {
        // テスト項目: online: false の heartbeat で即座に offline になる
        // given (前提条件):
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.watch(vec![user("bob")], true);
        presence.heartbeat(&user("bob"), true, Timestamp::new(1), t0);

        // when (操作):
        let change = presence.heartbeat(&user("bob"), false, Timestamp::new(2), t0);

        // then (期待する結果):
        assert_eq!(
            change,
            Some(PresenceChange {
                user_id: user("bob"),
                online: false
            })
        );
        assert_eq!(presence.next_deadline(), None);
    }

    #[test]
    fn test_unwatched_heartbeat_is_ignored() {
        // テスト項目: 監視していないユーザーの heartbeat は無視される
        // given (前提条件):
        let mut presence = tracker();

        // when (操作):
        let change = presence.heartbeat(&user("eve"), true, Timestamp::new(1), Instant::now());

        // then (期待する結果):
        assert_eq!(change, None);
        assert!(!presence.is_online(&user("eve"), Instant::now()));
    }

    #[test]
    fn test_resume_resubscribes_watch_set_and_announces() {
        // テスト項目: 再接続時に自分の heartbeat と監視中ユーザー全員の購読が送信される
        // given (前提条件):
        let mut presence = tracker();
        presence.watch(vec![user("carol"), user("bob")], false);
        let t0 = Instant::now();

        // when (操作):
        let frames = presence.on_resumed(t0);

        // then (期待する結果):
        assert_eq!(
            frames,
            vec![
                OutboundFrame::PresenceHeartbeat {
                    user_id: user("alice")
                },
                OutboundFrame::PresenceSubscribe {
                    user_ids: vec![user("bob"), user("carol")]
                },
            ]
        );
        assert_eq!(presence.next_deadline(), Some(t0 + ANNOUNCE));
    }

    #[test]
    fn test_announce_due_and_pause() {
        // テスト項目: 自分の heartbeat は一定間隔で送信され、切断中は停止する
        // given (前提条件):
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.on_resumed(t0);

        // when (操作):
        let not_yet = presence.announce_due(t0 + Duration::from_secs(5));
        let due = presence.announce_due(t0 + ANNOUNCE);
        presence.pause();
        let paused = presence.announce_due(t0 + ANNOUNCE * 3);

        // then (期待する結果):
        assert_eq!(not_yet, None);
        assert!(matches!(due, Some(OutboundFrame::PresenceHeartbeat { .. })));
        assert_eq!(paused, None);
    }
}
