//! RPC enforcement gateway and client.
//!
//! Unary calls travel as length-prefixed JSON frames over TCP. Every call
//! passes the [`interceptor`] before it reaches the shared service layer.

pub mod client;
pub mod frame;
pub mod interceptor;
pub mod server;
pub mod service;

pub use client::RpcClient;
pub use frame::{Code, Metadata, RpcError, RpcRequest, RpcResponse};
pub use server::serve;
