//! # MongoDB connections
//!
//! The default connection owns a `mongodb::Client` and its pool. Tenant
//! connections are `Client::database` views on that same client, so deriving
//! one never opens a socket. Closing a tenant only retires the view; closing
//! the default connection shuts the client down.

use std::fmt;
use std::sync::Arc;

use mongodb::bson::{Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use rocket::futures::StreamExt;
use tracing::{debug, info};

use crate::config::ConnectOptions;
use crate::connection::{
    Connection, ConnectionFactory, ConnectionRef, DocumentStore, Liveness,
};
use crate::errors::TenancyError;

/// Database used when the connection string names none.
pub const DEFAULT_DATABASE: &str = "test";

#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnectionFactory;

impl MongoConnectionFactory {
    pub fn new() -> Self {
        Self
    }

    fn client_options(
        mut client_options: ClientOptions,
        options: &ConnectOptions,
    ) -> ClientOptions {
        client_options.server_selection_timeout = Some(options.server_selection_timeout());
        if let Some(timeout) = options.connect_timeout() {
            client_options.connect_timeout = Some(timeout);
        }
        if let Some(max) = options.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(min) = options.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(app_name) = &options.app_name {
            client_options.app_name = Some(app_name.clone());
        }
        client_options
    }
}

#[rocket::async_trait]
impl ConnectionFactory for MongoConnectionFactory {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<ConnectionRef, TenancyError> {
        let client_options = Self::client_options(ClientOptions::parse(url).await?, options);
        let db_name = client_options
            .default_database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let client = Client::with_options(client_options)?;

        // Fails after the server selection timeout instead of handing out a dead client.
        if let Err(e) = client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
        {
            client.shutdown().immediate(true).await;
            return Err(e.into());
        }

        info!(db = %db_name, "connected to MongoDB");
        Ok(Arc::new(MongoConnection::root(client, &db_name)))
    }
}

pub struct MongoConnection {
    client: Client,
    database: Database,
    liveness: Liveness,
}

impl MongoConnection {
    fn root(client: Client, db_name: &str) -> Self {
        Self {
            database: client.database(db_name),
            client,
            liveness: Liveness::root(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

impl fmt::Debug for MongoConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConnection")
            .field("db", &self.database.name())
            .field("root", &self.liveness.is_root())
            .field("open", &self.liveness.is_open())
            .finish()
    }
}

#[rocket::async_trait]
impl Connection for MongoConnection {
    fn db_name(&self) -> &str {
        self.database.name()
    }

    fn is_open(&self) -> bool {
        self.liveness.is_open()
    }

    fn store(&self, collection: &str) -> Arc<dyn DocumentStore> {
        Arc::new(MongoStore {
            collection: self.database.collection::<Document>(collection),
            liveness: self.liveness.clone(),
        })
    }

    async fn use_db(&self, db: &str) -> Result<ConnectionRef, TenancyError> {
        self.liveness.check()?;
        debug!(db = %db, "deriving tenant connection");

        Ok(Arc::new(MongoConnection {
            client: self.client.clone(),
            database: self.client.database(db),
            liveness: self.liveness.child(),
        }))
    }

    async fn close(&self, force: bool) -> Result<(), TenancyError> {
        if !self.liveness.retire() {
            return Ok(());
        }

        if self.liveness.is_root() {
            info!(db = %self.db_name(), force, "shutting down MongoDB client");
            self.client.clone().shutdown().immediate(force).await;
        } else {
            debug!(db = %self.db_name(), force, "tenant connection closed");
        }
        Ok(())
    }
}

struct MongoStore {
    collection: Collection<Document>,
    liveness: Liveness,
}

#[rocket::async_trait]
impl DocumentStore for MongoStore {
    async fn find(&self, filter: Document) -> Result<Vec<Document>, TenancyError> {
        self.liveness.check()?;
        let mut cursor = self.collection.find(filter).await?;

        let mut docs = Vec::new();
        while let Some(result) = cursor.next().await {
            docs.push(result?);
        }

        Ok(docs)
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, TenancyError> {
        self.liveness.check()?;
        Ok(self.collection.find_one(filter).await?)
    }

    async fn insert_one(&self, doc: Document) -> Result<Bson, TenancyError> {
        self.liveness.check()?;
        Ok(self.collection.insert_one(doc).await?.inserted_id)
    }

    async fn count_documents(&self, filter: Document) -> Result<u64, TenancyError> {
        self.liveness.check()?;
        Ok(self.collection.count_documents(filter).await?)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64, TenancyError> {
        self.liveness.check()?;
        Ok(self.collection.delete_many(filter).await?.deleted_count)
    }
}
