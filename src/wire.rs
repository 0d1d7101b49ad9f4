//! Binary display-list wire format.
//!
//! The producer serializes drawing operations into a flat buffer of
//! 32-bit words; this module turns that buffer back into typed
//! [`Command`]s.
//!
//! # Main Types
//!
//! - [`WordReader`]: cursor over the word buffer with typed reads.
//! - [`Command`]: the closed set of drawing operations.
//! - [`CommandDecoder`]: lazy, restartable decoder.

pub mod command;
pub mod decoder;
pub mod reader;

pub use command::Command;
pub use decoder::{decode_all, CommandDecoder};
pub use reader::WordReader;
