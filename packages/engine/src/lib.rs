//! Realtime chat synchronization engine.
//!
//! The engine keeps one authenticated duplex connection per session,
//! replays room membership after reconnects, reconciles optimistic
//! messages with their server echoes and tracks read receipts, typing
//! indicators and presence of watched peers.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chatsync_engine::{
//!     EngineConfig, EngineHandle, WebSocketConnector,
//!     domain::{AuthToken, RoomId, UserId},
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineHandle::spawn(
//!     EngineConfig::default(),
//!     UserId::try_from("alice")?,
//!     "Alice",
//!     Arc::new(WebSocketConnector::new()),
//! );
//! let mut events = engine.subscribe()?;
//! engine
//!     .connect("ws://127.0.0.1:8080/ws", AuthToken::new("token".to_string())?)
//!     .await?;
//! let lobby = RoomId::try_from("lobby")?;
//! engine.join_room(lobby.clone())?;
//! engine.send_message(&lobby, "hello")?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod infrastructure;
mod runner;
pub mod ui;
pub mod usecase;

pub use config::EngineConfig;
pub use infrastructure::transport::WebSocketConnector;
pub use ui::{EngineEvent, EngineHandle};
pub use usecase::format_typing;
