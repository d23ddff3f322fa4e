mod model;
mod typed;

pub use model::Model;
pub use typed::TypedService;

use crate::connection::ConnectionManager;
use crate::document::ID_FIELD;
use crate::error::Result;
use crate::options::{FindOptions, PaginationOptions, UpdateOptions};
use crate::response::{DbResponse, PaginatedResult};
use crate::schema::ModelSchema;
use serde_json::Value;
use std::sync::Arc;

/// CRUD operations for one model, each answering with a `DbResponse`.
///
/// Failures never escape as `Err`: they are logged and returned as
/// `{ success: false, error, message }`. The connection is resolved per call,
/// so a service outlives reconnects and reports `NotConnected` while the
/// manager is down.
pub struct ModelService {
    name: String,
    schema: Arc<ModelSchema>,
    manager: Arc<ConnectionManager>,
}

impl ModelService {
    pub(crate) fn new(name: &str, schema: Arc<ModelSchema>, manager: Arc<ConnectionManager>) -> Self {
        log::debug!("Creating service for model {name}");
        ModelService {
            name: name.to_string(),
            schema,
            manager,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    /// The model bound to the current connection.
    pub fn model(&self) -> Result<Model> {
        let connection = self.manager.connection()?;
        Ok(Model::new(&self.name, self.schema.clone(), connection)
            .with_write_lock(self.manager.write_lock(&self.name)))
    }

    fn respond<T>(&self, op: &str, result: Result<T>, message: impl FnOnce(&T) -> String) -> DbResponse<T> {
        match result {
            Ok(data) => {
                let message = message(&data);
                DbResponse::ok(data, message)
            }
            Err(e) => self.fail(op, e),
        }
    }

    /// Like `respond`, with the envelope `total` taken from the data.
    fn respond_with_total<T>(
        &self,
        op: &str,
        result: Result<T>,
        total: impl FnOnce(&T) -> u64,
        message: impl FnOnce(&T) -> String,
    ) -> DbResponse<T> {
        match result {
            Ok(data) => {
                let total = total(&data);
                let message = message(&data);
                DbResponse::ok_with_total(data, message, total)
            }
            Err(e) => self.fail(op, e),
        }
    }

    fn fail<T>(&self, op: &str, e: crate::ModelDbError) -> DbResponse<T> {
        log::error!("{}.{op} failed: {e}", self.name);
        DbResponse::failure(&e)
    }

    // ── Create ───────────────────────────────────────────────────────

    pub async fn create(&self, data: Value) -> DbResponse<Value> {
        let result = match self.model() {
            Ok(model) => model.create(data).await,
            Err(e) => Err(e),
        };
        self.respond("create", result, |_| "document created".to_string())
    }

    pub async fn create_many(&self, docs: Vec<Value>) -> DbResponse<Vec<Value>> {
        let result = match self.model() {
            Ok(model) => model.insert_many(docs).await,
            Err(e) => Err(e),
        };
        self.respond("create_many", result, |created| {
            format!("{} documents created", created.len())
        })
    }

    // ── Read ─────────────────────────────────────────────────────────

    /// First matching document; `data: null` when nothing matched.
    pub async fn find_one(&self, filter: &Value, projection: Option<&Value>) -> DbResponse<Option<Value>> {
        let result = match self.model() {
            Ok(model) => model.find_one(filter, projection).await,
            Err(e) => Err(e),
        };
        self.respond("find_one", result, |found| {
            found_message(found.is_some(), "no document matched the filter")
        })
    }

    pub async fn find_by_id(&self, id: &str, projection: Option<&Value>) -> DbResponse<Option<Value>> {
        let result = match self.model() {
            Ok(model) => model.find_by_id(id, projection).await,
            Err(e) => Err(e),
        };
        self.respond("find_by_id", result, |found| {
            found_message(found.is_some(), "no document with the given id")
        })
    }

    pub async fn find(
        &self,
        filter: &Value,
        projection: Option<&Value>,
        options: &FindOptions,
    ) -> DbResponse<Vec<Value>> {
        let result = match self.model() {
            Ok(model) => model.find(filter, projection, options).await,
            Err(e) => Err(e),
        };
        self.respond("find", result, |docs| format!("found {} documents", docs.len()))
    }

    /// One page of matches plus the total match count, queried concurrently.
    pub async fn find_with_pagination(
        &self,
        filter: &Value,
        options: &PaginationOptions,
        projection: Option<&Value>,
    ) -> DbResponse<PaginatedResult<Value>> {
        let result = match self.model() {
            Ok(model) => {
                let page = options.page();
                let limit = options.limit();
                let find_options = FindOptions {
                    sort: Some(options.sort()),
                    skip: Some(options.skip()),
                    limit: Some(limit),
                };
                futures::try_join!(
                    model.find(filter, projection, &find_options),
                    model.count_documents(filter),
                )
                .map(|(items, total)| PaginatedResult::new(items, total, page, limit))
            }
            Err(e) => Err(e),
        };

        self.respond_with_total(
            "find_with_pagination",
            result,
            |page| page.total,
            |page| format!("found {} documents, {} in total", page.items.len(), page.total),
        )
    }

    pub async fn count(&self, filter: &Value) -> DbResponse<u64> {
        let result = match self.model() {
            Ok(model) => model.count_documents(filter).await,
            Err(e) => Err(e),
        };
        self.respond_with_total("count", result, |n| *n, |n| format!("counted {n} documents"))
    }

    pub async fn exists(&self, filter: &Value) -> DbResponse<bool> {
        let result = match self.model() {
            Ok(model) => model.exists(filter).await,
            Err(e) => Err(e),
        };
        self.respond("exists", result, |exists| {
            found_message(*exists, "no document matched the filter")
        })
    }

    pub async fn aggregate(&self, pipeline: &[Value]) -> DbResponse<Vec<Value>> {
        let result = match self.model() {
            Ok(model) => model.aggregate(pipeline).await,
            Err(e) => Err(e),
        };
        self.respond("aggregate", result, |rows| {
            format!("aggregation returned {} rows", rows.len())
        })
    }

    // ── Update ───────────────────────────────────────────────────────

    /// Update the first match. `data` is the updated document, or the prior
    /// one with `return_original`; `null` when nothing matched.
    pub async fn update_one(
        &self,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> DbResponse<Option<Value>> {
        let result = match self.model() {
            Ok(model) => model.find_one_and_update(filter, update, options).await,
            Err(e) => Err(e),
        };
        self.respond("update_one", result, |doc| updated_message(doc.is_some()))
    }

    pub async fn update_by_id(
        &self,
        id: &str,
        update: &Value,
        options: UpdateOptions,
    ) -> DbResponse<Option<Value>> {
        let result = match self.model() {
            Ok(model) => {
                model
                    .find_one_and_update(&id_filter(id), update, options)
                    .await
            }
            Err(e) => Err(e),
        };
        self.respond("update_by_id", result, |doc| updated_message(doc.is_some()))
    }

    /// Update every match; `data` is the number of documents modified.
    pub async fn update_many(&self, filter: &Value, update: &Value, options: UpdateOptions) -> DbResponse<u64> {
        let result = match self.model() {
            Ok(model) => model.update_many(filter, update, options).await,
            Err(e) => Err(e),
        };
        self.respond("update_many", result, |n| format!("{n} documents updated"))
    }

    // ── Delete ───────────────────────────────────────────────────────

    /// `data` is true when a document was removed, false when nothing matched.
    pub async fn delete_one(&self, filter: &Value) -> DbResponse<bool> {
        let result = match self.model() {
            Ok(model) => model.delete_one(filter).await,
            Err(e) => Err(e),
        };
        self.respond("delete_one", result, |deleted| deleted_message(*deleted))
    }

    pub async fn delete_by_id(&self, id: &str) -> DbResponse<bool> {
        let result = match self.model() {
            Ok(model) => model.delete_by_id(id).await,
            Err(e) => Err(e),
        };
        self.respond("delete_by_id", result, |deleted| deleted_message(*deleted))
    }

    pub async fn delete_many(&self, filter: &Value) -> DbResponse<u64> {
        let result = match self.model() {
            Ok(model) => model.delete_many(filter).await,
            Err(e) => Err(e),
        };
        self.respond("delete_many", result, |n| format!("{n} documents deleted"))
    }
}

fn id_filter(id: &str) -> Value {
    let mut filter = serde_json::Map::new();
    filter.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(filter)
}

fn found_message(found: bool, missing: &str) -> String {
    if found {
        "document found".to_string()
    } else {
        missing.to_string()
    }
}

fn updated_message(updated: bool) -> String {
    if updated {
        "document updated".to_string()
    } else {
        "no document matched the filter".to_string()
    }
}

fn deleted_message(deleted: bool) -> String {
    if deleted {
        "document deleted".to_string()
    } else {
        "no document matched the filter".to_string()
    }
}
