use {
    crate::{errors::TenancyError, guards::DefaultClient},
    mongodb::bson::{self, Bson, Document, doc},
    rocket::{
        delete, get,
        http::Status,
        post,
        response::status,
        routes,
        serde::json::{Json, Value, json},
    },
};

fn to_json(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

fn custom(e: TenancyError) -> status::Custom<String> {
    status::Custom(e.status(), e.to_string())
}

#[get("/<db>/<alias>")]
pub async fn list_documents(
    client: DefaultClient,
    db: &str,
    alias: &str,
) -> Result<Json<Vec<Value>>, TenancyError> {
    let tenant = client.client().use_database(db).await?;
    let docs = tenant.model(alias)?.find(doc! {}).await?;

    Ok(Json(docs.into_iter().map(to_json).collect()))
}

#[post("/<db>/<alias>", format = "json", data = "<body>")]
pub async fn create_document(
    client: DefaultClient,
    db: &str,
    alias: &str,
    body: Json<Value>,
) -> Result<status::Created<Json<Value>>, status::Custom<String>> {
    let document = match bson::to_document(&body.into_inner()) {
        Ok(doc) => doc,
        Err(e) => {
            return Err(status::Custom(
                Status::BadRequest,
                format!("Invalid document: {}", e),
            ));
        }
    };

    let tenant = client.client().use_database(db).await.map_err(custom)?;
    let id = tenant
        .model(alias)
        .map_err(custom)?
        .insert_one(document)
        .await
        .map_err(custom)?;

    Ok(status::Created::new(format!("/{db}/{alias}"))
        .body(Json(json!({ "_id": id.into_relaxed_extjson() }))))
}

#[delete("/<db>")]
pub async fn close_database(client: DefaultClient, db: &str) -> Result<status::NoContent, TenancyError> {
    client.client().close_database(db, true).await?;
    Ok(status::NoContent)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list_documents, create_document, close_database]
}
