#![allow(dead_code)]

use std::sync::Arc;

use mongodactyl::{MemoryConnectionFactory, ModelDescriptor, PluginOptions, TenancyFairing};
use mongodb::bson::doc;

pub const URL: &str = "mongodb://localhost:27017";

pub fn users() -> ModelDescriptor {
    ModelDescriptor::new(
        "users",
        "Users",
        doc! { "username": "String", "age": "Number" },
    )
}

pub fn posts() -> ModelDescriptor {
    ModelDescriptor::new("posts", "Post", doc! { "title": "String" })
}

pub fn models() -> Vec<ModelDescriptor> {
    vec![users(), posts()]
}

pub fn fairing(factory: &MemoryConnectionFactory, options: PluginOptions) -> TenancyFairing {
    TenancyFairing::new(options).with_factory(Arc::new(factory.clone()))
}

pub fn named(factory: &MemoryConnectionFactory, name: &str) -> TenancyFairing {
    fairing(factory, PluginOptions::new(URL, models()).with_name(name))
}

pub fn unnamed(factory: &MemoryConnectionFactory) -> TenancyFairing {
    fairing(factory, PluginOptions::new(URL, models()))
}
