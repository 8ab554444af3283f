//! Models registered by the demo server and the `check-connection` command.

use mongodb::bson::doc;

use crate::schema::{ModelDescriptor, Plugin, SchemaOptions};

pub fn user() -> ModelDescriptor {
    ModelDescriptor::new(
        "users",
        "Users",
        doc! {
            "username": { "type": "String", "required": true },
            "age": { "type": "Number", "required": true },
        },
    )
}

pub fn post() -> ModelDescriptor {
    ModelDescriptor::new(
        "posts",
        "Post",
        doc! {
            "title": { "type": "String", "required": true },
            "content": { "type": "String", "required": true },
        },
    )
    .with_options(SchemaOptions {
        timestamps: true,
        ..Default::default()
    })
    .with_plugin(
        Plugin::new("lowercaseTags", |schema, _| {
            schema.add("tags", doc! { "type": ["String"] });
            schema.pre("insertOne", |doc| {
                if let Ok(tags) = doc.get_array_mut("tags") {
                    for tag in tags.iter_mut() {
                        if let Some(text) = tag.as_str() {
                            *tag = text.to_lowercase().into();
                        }
                    }
                }
                Ok(())
            });
            Ok(())
        }),
    )
}

pub fn all() -> Vec<ModelDescriptor> {
    vec![user(), post()]
}
