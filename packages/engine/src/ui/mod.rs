//! UI 層
//!
//! エンジンを利用する側（描画レイヤーや CLI）に公開する API。

pub mod event;
pub mod handle;

pub use event::EngineEvent;
pub use handle::EngineHandle;
