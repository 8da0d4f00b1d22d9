//! Core types for simplemem.

mod dialogue;
mod entry;
mod filter;
mod message;

pub use dialogue::*;
pub use entry::*;
pub use filter::*;
pub use message::*;
