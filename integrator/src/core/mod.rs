//! Pure deterministic logic: chunking, the action protocol, the staged plan,
//! and the transcript. No I/O lives here.

pub mod action;
pub mod chunk;
pub mod plan;
pub mod transcript;
