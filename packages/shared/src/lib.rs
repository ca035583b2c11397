//! Shared utilities used by every chatsync package.

pub mod logger;
pub mod time;
