use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::connection::Connection;
use crate::errors::TenancyError;
use crate::model::Model;
use crate::schema::{ModelDescriptor, Schema};

/// Turns the static model descriptors into live models on a connection.
///
/// Every [`ModelBinder::bind`] builds each schema from scratch, so models bound
/// to different tenants never share schema state.
#[derive(Debug, Clone)]
pub struct ModelBinder {
    descriptors: Arc<[ModelDescriptor]>,
}

impl ModelBinder {
    /// Fails with [`TenancyError::DuplicateAlias`] before anything is bound.
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Result<Self, TenancyError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.alias.as_str()) {
                return Err(TenancyError::DuplicateAlias(descriptor.alias.clone()));
            }
        }

        Ok(Self {
            descriptors: descriptors.into(),
        })
    }

    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.alias.as_str())
    }

    /// Plugins first, then declared middleware, each in declaration order.
    pub fn build_schema(descriptor: &ModelDescriptor) -> Result<Schema, TenancyError> {
        let mut schema = Schema::new(
            descriptor.schema.clone(),
            descriptor.options.clone().unwrap_or_default(),
        );

        for plugin in &descriptor.plugins {
            schema
                .plugin(plugin)
                .map_err(|reason| TenancyError::Plugin {
                    model: descriptor.alias.clone(),
                    reason,
                })?;
        }

        for middleware in &descriptor.middlewares {
            schema.middleware(middleware.clone());
        }

        Ok(schema)
    }

    /// Binds every model on `connection`. A failing plugin aborts the whole
    /// binding; nothing partial is returned.
    pub fn bind(
        &self,
        connection: &dyn Connection,
    ) -> Result<BTreeMap<String, Model>, TenancyError> {
        let mut models = BTreeMap::new();

        for descriptor in self.descriptors.iter() {
            let schema = Self::build_schema(descriptor)?;
            let collection = schema
                .options()
                .collection
                .clone()
                .unwrap_or_else(|| descriptor.name.clone());

            models.insert(
                descriptor.alias.clone(),
                connection.model(&descriptor.alias, schema, &collection),
            );
        }

        Ok(models)
    }
}
