//! Ferry Library
//!
//! Minimal remote file transfer: a daemon exposing a directory tree over a
//! framed TCP protocol and a client issuing CD, LIST, GET and PUT against it.

pub mod cli;
pub mod locks;
pub mod logger;
pub mod net_async;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
