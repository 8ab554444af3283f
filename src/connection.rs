//! # Connection boundary
//!
//! The tenancy layer never talks to a driver directly. It consumes three
//! capabilities: a [`ConnectionFactory`] that opens the default connection,
//! a [`Connection`] that can derive database-scoped children and close, and a
//! [`DocumentStore`] per collection that executes the handful of operations
//! models expose.
//!
//! The MongoDB implementation lives in [`crate::mongo`], the in-process one in
//! [`crate::memory`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mongodb::bson::{Bson, Document};

use crate::config::ConnectOptions;
use crate::errors::TenancyError;
use crate::model::Model;
use crate::schema::Schema;

pub type ConnectionRef = Arc<dyn Connection>;

/// Operations a model can issue against one collection.
#[rocket::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, filter: Document) -> Result<Vec<Document>, TenancyError>;

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, TenancyError>;

    /// Returns the `_id` of the inserted document.
    async fn insert_one(&self, doc: Document) -> Result<Bson, TenancyError>;

    async fn count_documents(&self, filter: Document) -> Result<u64, TenancyError>;

    async fn delete_many(&self, filter: Document) -> Result<u64, TenancyError>;
}

#[rocket::async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Database this handle is scoped to.
    fn db_name(&self) -> &str;

    fn is_open(&self) -> bool;

    fn store(&self, collection: &str) -> Arc<dyn DocumentStore>;

    /// Child handle scoped to `db`, sharing this handle's underlying client.
    async fn use_db(&self, db: &str) -> Result<ConnectionRef, TenancyError>;

    async fn close(&self, force: bool) -> Result<(), TenancyError>;

    /// Registers `schema` on this connection under `alias`, stored in `collection`.
    fn model(&self, alias: &str, schema: Schema, collection: &str) -> Model {
        Model::new(alias, collection, schema, self.store(collection))
    }
}

#[rocket::async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<ConnectionRef, TenancyError>;

    async fn derive(
        &self,
        parent: &ConnectionRef,
        db: &str,
    ) -> Result<ConnectionRef, TenancyError> {
        parent.use_db(db).await
    }
}

/// Open/closed state shared between a connection and the stores it hands out.
/// A child is open only while its root is.
#[derive(Debug, Clone)]
pub(crate) struct Liveness {
    own: Arc<AtomicBool>,
    root: Option<Arc<AtomicBool>>,
}

impl Liveness {
    pub(crate) fn root() -> Self {
        Self {
            own: Arc::new(AtomicBool::new(true)),
            root: None,
        }
    }

    pub(crate) fn child(&self) -> Self {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => self.own.clone(),
        };
        Self {
            own: Arc::new(AtomicBool::new(true)),
            root: Some(root),
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        self.root.is_none()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.own.load(Ordering::Acquire)
            && self
                .root
                .as_ref()
                .is_none_or(|root| root.load(Ordering::Acquire))
    }

    pub(crate) fn check(&self) -> Result<(), TenancyError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TenancyError::NotConnected)
        }
    }

    /// Marks this handle closed, returning whether it was open before.
    pub(crate) fn retire(&self) -> bool {
        self.own.swap(false, Ordering::AcqRel)
    }
}
