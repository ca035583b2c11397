//! UseCase 層
//!
//! 同期エンジンの状態遷移を実装するレイヤー。
//! 各コンポーネントは I/O を持たず、送信すべきフレームや通知すべき変化を
//! 戻り値として返します。実際の送受信はイベントループ（`runner`）が行います。

pub mod message_stream;
pub mod presence;
pub mod read_receipt;
pub mod room_registry;
pub mod timer;
pub mod typing_indicator;

pub use message_stream::{InboundOutcome, MessageStream};
pub use presence::{PresenceChange, PresenceTracker};
pub use read_receipt::{MarkReadOutcome, ReadReceiptTracker, ReceiptOutcome};
pub use room_registry::{MembershipOutcome, RoomRegistry};
pub use timer::DeadlineMap;
pub use typing_indicator::{TypingIndicatorCoordinator, TypingTimings, format_typing};
