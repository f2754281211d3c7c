// src/ipc/mod.rs

//! Adapter for the external graph information service: wire model, the
//! sample-channel abstraction, and the connection-owning client.

pub mod channel;
pub mod client;
pub mod proto;

pub use channel::ShmChannel;
pub use client::IpcClient;
