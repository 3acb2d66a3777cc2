//! chatrelay — game server chat to Discord webhook relay.
//!
//! Single Rust binary. Tails a 7 Days to Die style server log, extracts
//! chat lines, renders them through a user template, and delivers them to
//! a webhook in order, with retries and a durable read checkpoint so no
//! message is lost or re-sent across restarts and log rotation.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod formatter;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod status;
pub mod tailer;
