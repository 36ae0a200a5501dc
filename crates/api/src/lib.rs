//! Enforcement gateways: the HTTP API and the RPC service, both fronting the
//! same services and the same access policy.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
pub mod rpc;
