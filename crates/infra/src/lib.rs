//! Infrastructure layer: entity store backends, configuration, and the
//! authorization and account services built on top of them.

pub mod accounts;
pub mod authorization;
pub mod config;
pub mod store;

pub use accounts::AccountService;
pub use authorization::AuthorizationEngine;
pub use config::Settings;
pub use store::{EntityStore, InMemoryEntityStore, PostgresEntityStore, StoreError};
