//! UseCase: 既読レシートの管理
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - ReadReceiptTracker の mark_read / receive / 早着レシートのバッファリング
//!
//! ### なぜこのテストが必要か
//! - 自分のメッセージへの既読送信が何もしないことを保証
//! - 複数の読者（重複・順不同を含む）が read_by に 1 回ずつ記録されることを保証
//! - read_at が観測した最新の時刻になることを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：既読送信、リモートの既読反映
//! - 切断中の既読送信（キューに積まれ再接続時に送信）
//! - エッジケース：メッセージより先に届いた既読レシート

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::domain::{Message, MessageId, MessageIdFactory, ReadReceipt, RoomId, Timestamp, UserId};

const MAX_EARLY_RECEIPTS: usize = 1024;

/// Result of a local `mark_read`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The local session authored the message; nothing to acknowledge
    OwnMessage,
    /// A receipt for this message was already issued
    AlreadyAcknowledged,
    /// Connected: transmit this receipt now
    Send(ReadReceipt),
    /// Disconnected: held until the next resume
    Queued,
}

/// Result of a remote receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Read state of the message changed
    Applied(Message),
    /// Reader and timestamp were already known
    Unchanged,
    /// Message not in the timeline yet; applied when it arrives
    Buffered,
    /// Receipt authored by the local session
    Ignored,
}

#[derive(Debug)]
pub struct ReadReceiptTracker {
    local_user: UserId,
    acknowledged: HashSet<MessageId>,
    pending: VecDeque<ReadReceipt>,
    early: HashMap<MessageId, Vec<ReadReceipt>>,
    /// Buffered message ids, oldest first
    early_order: VecDeque<MessageId>,
    early_count: usize,
}

impl ReadReceiptTracker {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            acknowledged: HashSet::new(),
            pending: VecDeque::new(),
            early: HashMap::new(),
            early_order: VecDeque::new(),
            early_count: 0,
        }
    }

    /// Acknowledge reading a message.
    ///
    /// `message` is the timeline entry when the stream knows it; messages
    /// rendered from history may be unknown and are acknowledged as given.
    pub fn mark_read(
        &mut self,
        message: Option<&Message>,
        message_id: MessageId,
        room_id: RoomId,
        read_at: Timestamp,
        connected: bool,
    ) -> MarkReadOutcome {
        // Unknown temporary ids can only be optimistic local messages.
        let authored_locally = match message {
            Some(m) => m.sender_id == self.local_user,
            None => MessageIdFactory::is_temporary(&message_id),
        };
        if authored_locally {
            return MarkReadOutcome::OwnMessage;
        }

        let message_id = message.map(|m| m.id.clone()).unwrap_or(message_id);
        if !self.acknowledged.insert(message_id.clone()) {
            return MarkReadOutcome::AlreadyAcknowledged;
        }

        let receipt = ReadReceipt {
            message_id,
            room_id,
            reader_id: self.local_user.clone(),
            read_at,
        };
        if connected {
            MarkReadOutcome::Send(receipt)
        } else {
            self.pending.push_back(receipt);
            MarkReadOutcome::Queued
        }
    }

    /// Receipts held while disconnected, oldest first.
    pub fn take_pending(&mut self) -> Vec<ReadReceipt> {
        self.pending.drain(..).collect()
    }

    /// Put back receipts whose transmission failed, ahead of anything newer.
    pub fn requeue(&mut self, receipts: Vec<ReadReceipt>) {
        for receipt in receipts.into_iter().rev() {
            self.pending.push_front(receipt);
        }
    }

    /// Drop held receipts (explicit disconnect). They may be issued again later.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        for receipt in self.pending.drain(..) {
            self.acknowledged.remove(&receipt.message_id);
        }
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply a remote receipt to the message it acknowledges.
    pub fn receive(&mut self, message: Option<&mut Message>, receipt: ReadReceipt) -> ReceiptOutcome {
        if receipt.reader_id == self.local_user {
            return ReceiptOutcome::Ignored;
        }

        match message {
            Some(message) => {
                if Self::apply(message, &receipt) {
                    ReceiptOutcome::Applied(message.clone())
                } else {
                    ReceiptOutcome::Unchanged
                }
            }
            None => {
                if self.early_count >= MAX_EARLY_RECEIPTS {
                    self.evict_oldest_early();
                }
                debug!("Buffering receipt for unknown message '{}'", receipt.message_id);
                self.early_count += 1;
                let buffered = self.early.entry(receipt.message_id.clone()).or_default();
                if buffered.is_empty() {
                    self.early_order.push_back(receipt.message_id.clone());
                }
                buffered.push(receipt);
                ReceiptOutcome::Buffered
            }
        }
    }

    /// Apply receipts that arrived before `message`; returns whether any changed it.
    pub fn apply_early(&mut self, message: &mut Message) -> bool {
        let Some(receipts) = self.early.remove(&message.id) else {
            return false;
        };
        self.early_count -= receipts.len();
        self.early_order.retain(|id| *id != message.id);

        let mut changed = false;
        for receipt in &receipts {
            changed |= Self::apply(message, receipt);
        }
        changed
    }

    // Messages that never arrive must not pin the buffer.
    fn evict_oldest_early(&mut self) {
        while self.early_count >= MAX_EARLY_RECEIPTS {
            let Some(oldest) = self.early_order.pop_front() else {
                break;
            };
            if let Some(receipts) = self.early.remove(&oldest) {
                warn!(
                    "Early receipt buffer full; dropping {} receipts for '{}'",
                    receipts.len(),
                    oldest
                );
                self.early_count -= receipts.len();
            }
        }
    }

    // readBy is a set, so re-adding a reader is harmless; readAt only moves forward.
    fn apply(message: &mut Message, receipt: &ReadReceipt) -> bool {
        let added = message.read_by.insert(receipt.reader_id.clone());
        let advanced = message.read_at.is_none_or(|at| receipt.read_at > at);
        if advanced {
            message.read_at = Some(receipt.read_at);
        }
        added || advanced
    }
}
