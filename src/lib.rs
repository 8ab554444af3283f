//! # Mongodactyl
//!
//! Multi-tenant MongoDB connections for Rocket. One default connection per
//! registered client, one tenant connection per database derived from it on
//! first use, and every registered model bound on each of them.

pub mod binder;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod fairing;
pub mod guards;
pub mod handlers;
pub mod memory;
pub mod model;
pub mod models;
pub mod mongo;
pub mod registry;
pub mod schema;

pub use binder::ModelBinder;
pub use cache::TenantCache;
pub use client::{MultiTenantClient, TenantBinding};
pub use config::{ConnectOptions, PluginConfig, PluginOptions};
pub use connection::{Connection, ConnectionFactory, ConnectionRef, DocumentStore};
pub use errors::{CloseFailure, TenancyError};
pub use fairing::{IgniteFailure, TenancyFairing};
pub use guards::DefaultClient;
pub use memory::MemoryConnectionFactory;
pub use model::Model;
pub use mongo::MongoConnectionFactory;
pub use registry::{ClientRegistry, RegisteredClient};
pub use schema::{HookKind, Middleware, ModelDescriptor, Plugin, Schema, SchemaOptions};
