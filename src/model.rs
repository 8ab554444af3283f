use std::fmt;
use std::sync::Arc;

use mongodb::bson::{Bson, DateTime, Document, oid::ObjectId};

use crate::connection::DocumentStore;
use crate::errors::TenancyError;
use crate::schema::{HookKind, Schema};

/// A queryable handle bound to one tenant connection.
///
/// Every operation runs the schema's `pre` hooks on its input document, calls
/// the store, then runs the `post` hooks on each resulting document.
#[derive(Clone)]
pub struct Model {
    alias: String,
    collection: String,
    schema: Schema,
    store: Arc<dyn DocumentStore>,
}

impl Model {
    pub fn new(
        alias: impl Into<String>,
        collection: impl Into<String>,
        schema: Schema,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            alias: alias.into(),
            collection: collection.into(),
            schema,
            store,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    pub async fn find(&self, mut filter: Document) -> Result<Vec<Document>, TenancyError> {
        self.schema.run_hooks(HookKind::Pre, "find", &mut filter)?;
        let mut docs = self.store.find(filter).await?;
        for doc in docs.iter_mut() {
            self.schema.run_hooks(HookKind::Post, "find", doc)?;
        }
        Ok(docs)
    }

    pub async fn find_one(&self, mut filter: Document) -> Result<Option<Document>, TenancyError> {
        self.schema.run_hooks(HookKind::Pre, "findOne", &mut filter)?;
        let mut found = self.store.find_one(filter).await?;
        if let Some(doc) = found.as_mut() {
            self.schema.run_hooks(HookKind::Post, "findOne", doc)?;
        }
        Ok(found)
    }

    pub async fn insert_one(&self, mut doc: Document) -> Result<Bson, TenancyError> {
        if !doc.contains_key("_id") {
            doc.insert("_id", ObjectId::new());
        }
        if self.schema.options().timestamps {
            let now = DateTime::now();
            doc.insert("createdAt", now);
            doc.insert("updatedAt", now);
        }

        self.schema.run_hooks(HookKind::Pre, "insertOne", &mut doc)?;
        let id = self.store.insert_one(doc.clone()).await?;
        self.schema.run_hooks(HookKind::Post, "insertOne", &mut doc)?;
        Ok(id)
    }

    pub async fn count_documents(&self, mut filter: Document) -> Result<u64, TenancyError> {
        self.schema
            .run_hooks(HookKind::Pre, "countDocuments", &mut filter)?;
        self.store.count_documents(filter).await
    }

    pub async fn delete_many(&self, mut filter: Document) -> Result<u64, TenancyError> {
        self.schema.run_hooks(HookKind::Pre, "deleteMany", &mut filter)?;
        let deleted = self.store.delete_many(filter.clone()).await?;
        self.schema
            .run_hooks(HookKind::Post, "deleteMany", &mut filter)?;
        Ok(deleted)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("alias", &self.alias)
            .field("collection", &self.collection)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
