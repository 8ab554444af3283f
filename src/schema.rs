//! # Schemas and model descriptors
//!
//! A [`ModelDescriptor`] is the static declaration handed over at registration.
//! Every time a tenant is bound, the descriptor is turned into a fresh
//! [`Schema`]: the field definition, its options, the plugins that have been
//! applied to it and the pre/post hooks that run around model operations.
//!
//! Plugins and hooks are plain closures. A plugin receives the schema under
//! construction plus its optional options document and may add fields, change
//! options or register hooks. Hooks receive the document an operation works
//! on (the filter for reads and deletes, the new document for inserts, each
//! returned document for post hooks).

use std::fmt;
use std::sync::Arc;

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::errors::TenancyError;

pub type PluginFn = Arc<dyn Fn(&mut Schema, Option<&Bson>) -> Result<(), String> + Send + Sync>;
pub type HookFn = Arc<dyn Fn(&mut Document) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct Plugin {
    name: String,
    func: PluginFn,
    options: Option<Bson>,
}

impl Plugin {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Schema, Option<&Bson>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            options: None,
        }
    }

    pub fn with_options(mut self, options: impl Into<Bson>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> Option<&Bson> {
        self.options.as_ref()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Pre,
    Post,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Pre => "pre",
            HookKind::Post => "post",
        }
    }
}

#[derive(Clone)]
pub struct Middleware {
    kind: HookKind,
    operation: String,
    func: HookFn,
}

impl Middleware {
    pub fn new<F>(kind: HookKind, operation: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            kind,
            operation: operation.into(),
            func: Arc::new(func),
        }
    }

    pub fn pre<F>(operation: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::new(HookKind::Pre, operation, func)
    }

    pub fn post<F>(operation: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::new(HookKind::Post, operation, func)
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("kind", &self.kind)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde", default)]
pub struct SchemaOptions {
    /// Overrides the collection name taken from the descriptor.
    pub collection: Option<String>,
    /// Stamp `createdAt` and `updatedAt` on inserted documents.
    pub timestamps: bool,
}

#[derive(Clone)]
pub struct Schema {
    definition: Document,
    options: SchemaOptions,
    hooks: Vec<Middleware>,
    plugins: Vec<String>,
}

impl Schema {
    pub fn new(definition: Document, options: SchemaOptions) -> Self {
        Self {
            definition,
            options,
            hooks: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn definition(&self) -> &Document {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut Document {
        &mut self.definition
    }

    /// Adds or replaces a field definition.
    pub fn add(&mut self, field: impl Into<String>, definition: impl Into<Bson>) {
        self.definition.insert(field.into(), definition.into());
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut SchemaOptions {
        &mut self.options
    }

    pub fn pre<F>(&mut self, operation: impl Into<String>, func: F)
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.push(Middleware::pre(operation, func));
    }

    pub fn post<F>(&mut self, operation: impl Into<String>, func: F)
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.push(Middleware::post(operation, func));
    }

    pub fn middleware(&mut self, middleware: Middleware) {
        self.hooks.push(middleware);
    }

    pub fn plugin(&mut self, plugin: &Plugin) -> Result<(), String> {
        (plugin.func)(self, plugin.options())?;
        self.plugins.push(plugin.name.clone());
        Ok(())
    }

    /// Names of the plugins applied so far, in application order.
    pub fn applied_plugins(&self) -> &[String] {
        &self.plugins
    }

    pub fn hooks(&self, kind: HookKind, operation: &str) -> impl Iterator<Item = &Middleware> {
        self.hooks
            .iter()
            .filter(move |hook| hook.kind == kind && hook.operation == operation)
    }

    /// Runs every matching hook in registration order, stopping at the first failure.
    pub fn run_hooks(
        &self,
        kind: HookKind,
        operation: &str,
        doc: &mut Document,
    ) -> Result<(), TenancyError> {
        for hook in self.hooks(kind, operation) {
            (hook.func)(doc).map_err(|reason| TenancyError::Hook {
                kind: kind.as_str(),
                operation: operation.to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("definition", &self.definition)
            .field("options", &self.options)
            .field("hooks", &self.hooks.len())
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// Static declaration of one model: where it lives (`name`), how handlers
/// reach it (`alias`) and what it looks like.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: String,
    pub alias: String,
    pub schema: Document,
    pub options: Option<SchemaOptions>,
    pub plugins: Vec<Plugin>,
    pub middlewares: Vec<Middleware>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, alias: impl Into<String>, schema: Document) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            schema,
            options: None,
            plugins: Vec::new(),
            middlewares: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: SchemaOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn hooks_run_in_registration_order() {
        let mut schema = Schema::new(doc! {}, SchemaOptions::default());
        schema.pre("find", |filter| {
            filter.insert("trail", "a");
            Ok(())
        });
        schema.pre("find", |filter| {
            let prev = filter.get_str("trail").unwrap_or_default().to_string();
            filter.insert("trail", format!("{prev}b"));
            Ok(())
        });
        schema.post("find", |_| Err("never runs for pre".into()));

        let mut filter = doc! {};
        schema.run_hooks(HookKind::Pre, "find", &mut filter).unwrap();
        assert_eq!(filter.get_str("trail").unwrap(), "ab");
    }

    #[test]
    fn failing_hook_reports_operation() {
        let mut schema = Schema::new(doc! {}, SchemaOptions::default());
        schema.pre("insertOne", |_| Err("rejected".into()));

        let err = schema
            .run_hooks(HookKind::Pre, "insertOne", &mut doc! {})
            .unwrap_err();
        assert_eq!(err.to_string(), "pre hook for insertOne failed: rejected");
    }

    #[test]
    fn plugin_receives_its_options() {
        let plugin = Plugin::new("softDelete", |schema, options| {
            let field = options
                .and_then(|o| o.as_document())
                .and_then(|d| d.get_str("field").ok())
                .unwrap_or("deleted")
                .to_string();
            schema.add(field, doc! { "type": "Boolean" });
            Ok(())
        })
        .with_options(doc! { "field": "archived" });

        let mut schema = Schema::new(doc! { "title": "String" }, SchemaOptions::default());
        schema.plugin(&plugin).unwrap();

        assert!(schema.definition().contains_key("archived"));
        assert_eq!(schema.applied_plugins(), ["softDelete".to_string()]);
    }
}
