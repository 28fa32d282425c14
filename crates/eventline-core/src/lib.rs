//! Eventline Core — shared event store abstractions.
//!
//! This crate defines the data model, the error taxonomy and the storage
//! traits that every backend and the subscription engine depend on. It
//! contains no infrastructure code.

pub mod checkpoint;
pub mod clock;
pub mod error;
pub mod event;
pub mod position;
pub mod retry;
pub mod scanner;
pub mod stream_log;
