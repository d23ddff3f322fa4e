use crate::document::{
    generate_id, timestamp_now, DocumentData, StoredDocument, CREATED_AT_FIELD, ID_FIELD,
    UPDATED_AT_FIELD,
};
use crate::driver::Connection;
use crate::error::{ModelDbError, Result};
use crate::options::{FindOptions, UpdateOptions};
use crate::query::{project, run_pipeline, values_equal, Filter, Update};
use crate::schema::ModelSchema;
use crate::validation::validate_and_prepare;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A registered model bound to a live connection.
///
/// Operations here return plain `Result`s; `ModelService` wraps them into
/// response envelopes. Writes that read the collection first (unique checks,
/// update operators, deletes by filter) run under the collection's write lock.
#[derive(Clone)]
pub struct Model {
    name: String,
    schema: Arc<ModelSchema>,
    connection: Arc<dyn Connection>,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn new(name: &str, schema: Arc<ModelSchema>, connection: Arc<dyn Connection>) -> Self {
        Model {
            name: name.to_string(),
            schema,
            connection,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Share a write lock with every other `Model` of the same collection.
    pub fn with_write_lock(mut self, write_lock: Arc<Mutex<()>>) -> Self {
        self.write_lock = write_lock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    // ── Create ───────────────────────────────────────────────────────

    pub async fn create(&self, data: Value) -> Result<Value> {
        let mut created = self.insert_many(vec![data]).await?;
        created
            .pop()
            .ok_or_else(|| ModelDbError::Other("insert returned no document".into()))
    }

    /// Validate and insert all documents, or none of them.
    pub async fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let prepared = docs
            .into_iter()
            .map(|data| self.prepare_new(data))
            .collect::<Result<Vec<_>>>()?;
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let _write = self.write_lock.lock().await;
        let existing = self.scan_if_unique().await?;
        self.ensure_unique(&prepared, &existing)?;
        self.connection.insert(&self.name, &prepared).await?;

        Ok(prepared.into_iter().map(StoredDocument::into_value).collect())
    }

    fn prepare_new(&self, data: Value) -> Result<StoredDocument> {
        let Value::Object(mut data) = data else {
            return Err(ModelDbError::Validation(format!(
                "{} documents must be JSON objects",
                self.name
            )));
        };

        let id = match data.remove(ID_FIELD) {
            None | Some(Value::Null) => generate_id(self.schema.auto_id()),
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(other) => {
                return Err(ModelDbError::Validation(format!(
                    "'{ID_FIELD}' must be a non-empty string, got {other}"
                )))
            }
        };

        if self.schema.timestamps {
            let now = timestamp_now();
            if !data.get(CREATED_AT_FIELD).is_some_and(Value::is_string) {
                data.insert(CREATED_AT_FIELD.to_string(), Value::String(now.clone()));
            }
            data.insert(UPDATED_AT_FIELD.to_string(), Value::String(now));
        }

        self.validate(&mut data)?;

        let mut stored = DocumentData::new();
        stored.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        stored.extend(data);
        Ok(StoredDocument::new(id, stored))
    }

    fn validate(&self, data: &mut DocumentData) -> Result<()> {
        let warnings = validate_and_prepare(&self.schema, data)?;
        for warning in warnings {
            log::warn!("{}: {warning}", self.name);
        }
        Ok(())
    }

    // ── Read ─────────────────────────────────────────────────────────

    pub async fn find(
        &self,
        filter: &Value,
        projection: Option<&Value>,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let mut docs = self.matching(filter).await?;

        if let Some(sort) = options.sort.as_ref().filter(|s| !s.is_empty()) {
            sort.apply(&mut docs, StoredDocument::get);
        }

        let skip = to_usize(options.skip.unwrap_or(0));
        let limit = options.limit.filter(|l| *l > 0).map_or(usize::MAX, to_usize);

        docs.into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| project(doc.data, projection).map(Value::Object))
            .collect()
    }

    pub async fn find_one(&self, filter: &Value, projection: Option<&Value>) -> Result<Option<Value>> {
        let filter = Filter::parse(filter)?;
        let found = self
            .connection
            .scan(&self.name)
            .await?
            .into_iter()
            .find(|doc| filter.matches(&doc.data));
        found
            .map(|doc| project(doc.data, projection).map(Value::Object))
            .transpose()
    }

    pub async fn find_by_id(&self, id: &str, projection: Option<&Value>) -> Result<Option<Value>> {
        self.connection
            .get(&self.name, id)
            .await?
            .map(|doc| project(doc.data, projection).map(Value::Object))
            .transpose()
    }

    pub async fn count_documents(&self, filter: &Value) -> Result<u64> {
        Ok(self.matching(filter).await?.len() as u64)
    }

    pub async fn exists(&self, filter: &Value) -> Result<bool> {
        let filter = Filter::parse(filter)?;
        let docs = self.connection.scan(&self.name).await?;
        Ok(docs.iter().any(|doc| filter.matches(&doc.data)))
    }

    pub async fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Value>> {
        let rows = self
            .connection
            .scan(&self.name)
            .await?
            .into_iter()
            .map(StoredDocument::into_value)
            .collect();
        run_pipeline(rows, pipeline)
    }

    // ── Update ───────────────────────────────────────────────────────

    /// Update the first matching document. Returns the updated document, or
    /// the original with `return_original`; `None` when nothing matched and
    /// no upsert happened.
    pub async fn find_one_and_update(
        &self,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<Option<Value>> {
        let compiled_filter = Filter::parse(filter)?;
        let update = Update::parse(update)?;
        let _write = self.write_lock.lock().await;
        let all = self.connection.scan(&self.name).await?;

        let Some(original) = all.iter().find(|doc| compiled_filter.matches(&doc.data)) else {
            if !options.upsert {
                return Ok(None);
            }
            let inserted = self.upsert(&compiled_filter, &update, &all).await?;
            return Ok((!options.return_original).then(|| inserted.into_value()));
        };

        let updated = self.apply_update(original, &update)?;
        self.ensure_unique(std::slice::from_ref(&updated), &all)?;
        if !self.connection.replace(&self.name, &updated).await? {
            return Ok(None);
        }

        Ok(Some(if options.return_original {
            original.clone().into_value()
        } else {
            updated.into_value()
        }))
    }

    /// Update every matching document. Returns how many documents changed,
    /// counting an upserted one.
    pub async fn update_many(&self, filter: &Value, update: &Value, options: UpdateOptions) -> Result<u64> {
        let compiled_filter = Filter::parse(filter)?;
        let update = Update::parse(update)?;
        let _write = self.write_lock.lock().await;
        let all = self.connection.scan(&self.name).await?;

        let matched: Vec<&StoredDocument> = all
            .iter()
            .filter(|doc| compiled_filter.matches(&doc.data))
            .collect();

        if matched.is_empty() {
            if options.upsert {
                self.upsert(&compiled_filter, &update, &all).await?;
                return Ok(1);
            }
            return Ok(0);
        }

        let mut updated = Vec::with_capacity(matched.len());
        for doc in matched {
            let candidate = self.apply_update(doc, &update)?;
            if candidate.data != doc.data {
                updated.push(candidate);
            }
        }

        self.ensure_unique(&updated, &all)?;
        let mut written = 0;
        for doc in &updated {
            if self.connection.replace(&self.name, doc).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn upsert(
        &self,
        filter: &Filter,
        update: &Update,
        existing: &[StoredDocument],
    ) -> Result<StoredDocument> {
        let mut seed = filter.equality_seed();
        update.apply(&mut seed)?;
        let doc = self.prepare_new(Value::Object(seed))?;
        self.ensure_unique(std::slice::from_ref(&doc), existing)?;
        self.connection
            .insert(&self.name, std::slice::from_ref(&doc))
            .await?;
        Ok(doc)
    }

    fn apply_update(&self, doc: &StoredDocument, update: &Update) -> Result<StoredDocument> {
        if let Some(path) = update
            .paths()
            .find(|p| *p == ID_FIELD || p.starts_with("_id."))
        {
            return Err(ModelDbError::Query(format!(
                "Performing an update on '{path}' would modify the immutable field '{ID_FIELD}'"
            )));
        }

        let mut data = doc.data.clone();
        update.apply(&mut data)?;

        if self.schema.timestamps {
            match doc.data.get(CREATED_AT_FIELD) {
                Some(created) => {
                    data.insert(CREATED_AT_FIELD.to_string(), created.clone());
                }
                None => {
                    data.remove(CREATED_AT_FIELD);
                }
            }
            data.insert(UPDATED_AT_FIELD.to_string(), Value::String(timestamp_now()));
        }

        self.validate(&mut data)?;
        Ok(StoredDocument::new(doc.id.clone(), data))
    }

    // ── Delete ───────────────────────────────────────────────────────

    /// Delete the first matching document. False when nothing matched.
    pub async fn delete_one(&self, filter: &Value) -> Result<bool> {
        let filter = Filter::parse(filter)?;
        let _write = self.write_lock.lock().await;
        let docs = self.connection.scan(&self.name).await?;
        match docs.into_iter().find(|doc| filter.matches(&doc.data)) {
            Some(doc) => Ok(self.connection.remove(&self.name, &[doc.id]).await? > 0),
            None => Ok(false),
        }
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.connection.remove(&self.name, &[id.to_string()]).await? > 0)
    }

    pub async fn delete_many(&self, filter: &Value) -> Result<u64> {
        let _write = self.write_lock.lock().await;
        let ids: Vec<String> = self
            .matching(filter)
            .await?
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.connection.remove(&self.name, &ids).await
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn matching(&self, filter: &Value) -> Result<Vec<StoredDocument>> {
        let filter = Filter::parse(filter)?;
        let mut docs = self.connection.scan(&self.name).await?;
        docs.retain(|doc| filter.matches(&doc.data));
        Ok(docs)
    }

    async fn scan_if_unique(&self) -> Result<Vec<StoredDocument>> {
        if self.schema.unique_fields().is_empty() {
            return Ok(Vec::new());
        }
        self.connection.scan(&self.name).await
    }

    /// Reject candidates whose unique field values collide with each other or
    /// with an existing document other than themselves.
    fn ensure_unique(&self, candidates: &[StoredDocument], existing: &[StoredDocument]) -> Result<()> {
        let unique_fields = self.schema.unique_fields();
        if unique_fields.is_empty() {
            return Ok(());
        }

        let candidate_ids: HashSet<&str> = candidates.iter().map(|d| d.id.as_str()).collect();
        for field in unique_fields {
            let mut taken: Vec<&Value> = existing
                .iter()
                .filter(|doc| !candidate_ids.contains(doc.id.as_str()))
                .filter_map(|doc| doc.data.get(field))
                .filter(|v| !v.is_null())
                .collect();

            for doc in candidates {
                let Some(value) = doc.data.get(field).filter(|v| !v.is_null()) else {
                    continue;
                };
                if taken.iter().any(|t| values_equal(t, value)) {
                    return Err(ModelDbError::DuplicateKey {
                        model: self.name.clone(),
                        field: field.to_string(),
                        value: match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                    });
                }
                taken.push(value);
            }
        }
        Ok(())
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteConnection;
    use crate::query::Sort;
    use crate::schema::FieldDefinition;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user_schema() -> ModelSchema {
        ModelSchema::new()
            .field("username", FieldDefinition::string().required().unique().trim())
            .field("email", FieldDefinition::string().required().unique().lowercase())
            .field(
                "role",
                FieldDefinition::string()
                    .one_of(&["admin", "user"])
                    .default_value(json!("user")),
            )
            .field("logins", FieldDefinition::new(crate::schema::FieldType::Number))
    }

    fn model() -> Model {
        let conn = SqliteConnection::open_in_memory().unwrap();
        Model::new("User", Arc::new(user_schema()), Arc::new(conn))
    }

    #[tokio::test]
    async fn test_create_fills_id_timestamps_and_defaults() {
        let model = model();
        let created = model
            .create(json!({ "username": " ann ", "email": "Ann@X.com" }))
            .await
            .unwrap();

        assert_eq!(created["username"], "ann");
        assert_eq!(created["email"], "ann@x.com");
        assert_eq!(created["role"], "user");
        assert_eq!(created["_id"].as_str().unwrap().len(), 26);
        assert_eq!(created["createdAt"], created["updatedAt"]);

        let id = created["_id"].as_str().unwrap();
        let found = model.find_by_id(id, None).await.unwrap().unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_and_duplicates() {
        let model = model();
        let err = model.create(json!({ "username": "ann" })).await.unwrap_err();
        assert!(matches!(err, ModelDbError::Validation(_)));

        model
            .create(json!({ "username": "ann", "email": "a@x.com" }))
            .await
            .unwrap();
        let err = model
            .create(json!({ "username": "ann", "email": "b@x.com" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDbError::DuplicateKey { ref field, .. } if field == "username"));

        // Batch collisions are caught before anything is written
        let err = model
            .insert_many(vec![
                json!({ "username": "bob", "email": "bob@x.com" }),
                json!({ "username": "cat", "email": "BOB@x.com" }),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDbError::DuplicateKey { ref field, .. } if field == "email"));
        assert_eq!(model.count_documents(&json!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_with_options_and_projection() {
        let model = model();
        for name in ["cc", "aa", "bb"] {
            model
                .create(json!({ "username": name, "email": format!("{name}@x.com") }))
                .await
                .unwrap();
        }

        let options = FindOptions::default().sorted_by(Sort::asc("username")).skip(1).limit(1);
        let rows = model
            .find(&json!({}), Some(&json!({ "username": 1, "_id": 0 })), &options)
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "username": "bb" })]);

        let none = model.find_one(&json!({ "username": "zz" }), None).await.unwrap();
        assert!(none.is_none());
        assert!(model.exists(&json!({ "username": { "$in": ["aa"] } })).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_one_and_update() {
        let model = model();
        let created = model
            .create(json!({ "username": "ann", "email": "a@x.com", "logins": 1 }))
            .await
            .unwrap();

        let updated = model
            .find_one_and_update(
                &json!({ "username": "ann" }),
                &json!({ "$inc": { "logins": 2 }, "$set": { "createdAt": "1999-01-01T00:00:00.000Z" } }),
                UpdateOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["logins"], 3);
        assert_eq!(updated["createdAt"], created["createdAt"]);

        let original = model
            .find_one_and_update(
                &json!({ "username": "ann" }),
                &json!({ "role": "admin" }),
                UpdateOptions {
                    return_original: true,
                    ..UpdateOptions::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original["role"], "user");

        let missing = model
            .find_one_and_update(&json!({ "username": "nobody" }), &json!({ "role": "admin" }), UpdateOptions::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_id_change_and_invalid_values() {
        let model = model();
        model
            .create(json!({ "username": "ann", "email": "a@x.com" }))
            .await
            .unwrap();

        let err = model
            .find_one_and_update(&json!({}), &json!({ "$set": { "_id": "other" } }), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDbError::Query(_)));

        let err = model
            .find_one_and_update(&json!({}), &json!({ "role": "root" }), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDbError::Validation(_)));
    }

    #[tokio::test]
    async fn test_upsert_seeds_from_filter() {
        let model = model();
        let doc = model
            .find_one_and_update(
                &json!({ "username": "dan" }),
                &json!({ "$set": { "email": "dan@x.com" } }),
                UpdateOptions::upsert(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["username"], "dan");
        assert_eq!(doc["role"], "user");

        let written = model
            .update_many(
                &json!({ "username": "eve" }),
                &json!({ "email": "eve@x.com" }),
                UpdateOptions::upsert(),
            )
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(model.count_documents(&json!({})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_many_and_deletes() {
        let model = model();
        for name in ["aa", "bb", "cc"] {
            model
                .create(json!({ "username": name, "email": format!("{name}@x.com") }))
                .await
                .unwrap();
        }

        let written = model
            .update_many(
                &json!({ "username": { "$ne": "cc" } }),
                &json!({ "$set": { "role": "admin" } }),
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(model.count_documents(&json!({ "role": "admin" })).await.unwrap(), 2);

        // Setting a unique field to the same value on several documents collides
        let err = model
            .update_many(&json!({}), &json!({ "email": "same@x.com" }), UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDbError::DuplicateKey { .. }));

        assert!(model.delete_one(&json!({ "username": "aa" })).await.unwrap());
        assert!(!model.delete_one(&json!({ "username": "aa" })).await.unwrap());
        assert!(!model.delete_by_id("missing").await.unwrap());
        assert_eq!(model.delete_many(&json!({ "role": "admin" })).await.unwrap(), 1);
        assert_eq!(model.count_documents(&json!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_aggregate() {
        let model = model();
        for (name, role) in [("aa", "admin"), ("bb", "user"), ("cc", "user")] {
            model
                .create(json!({ "username": name, "email": format!("{name}@x.com"), "role": role }))
                .await
                .unwrap();
        }

        let mut rows = model
            .aggregate(&[json!({ "$group": { "_id": "$role", "n": { "$sum": 1 } } })])
            .await
            .unwrap();
        Sort::asc("_id").apply(&mut rows, crate::document::get_value_path);
        assert_eq!(
            rows,
            vec![json!({ "_id": "admin", "n": 1 }), json!({ "_id": "user", "n": 2 })]
        );
    }

    #[tokio::test]
    async fn test_update_many_counts_only_changed_documents() {
        let schema = ModelSchema::new()
            .with_timestamps(false)
            .field("name", FieldDefinition::string())
            .field("tier", FieldDefinition::string());
        let conn = SqliteConnection::open_in_memory().unwrap();
        let model = Model::new("Account", Arc::new(schema), Arc::new(conn));
        model
            .insert_many(vec![
                json!({ "name": "a", "tier": "gold" }),
                json!({ "name": "b", "tier": "gold" }),
                json!({ "name": "c", "tier": "basic" }),
            ])
            .await
            .unwrap();

        let modified = model
            .update_many(&json!({}), &json!({ "$set": { "tier": "gold" } }), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(modified, 1);

        let modified = model
            .update_many(&json!({}), &json!({ "$set": { "tier": "gold" } }), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(modified, 0);
        assert_eq!(model.count_documents(&json!({ "tier": "gold" })).await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_models_sharing_a_write_lock_keep_increments() {
        let conn: Arc<dyn Connection> = Arc::new(SqliteConnection::open_in_memory().unwrap());
        let lock = Arc::new(Mutex::new(()));
        let model = Model::new("User", Arc::new(user_schema()), conn.clone());
        let created = model
            .create(json!({ "username": "counter", "email": "c@x.com", "logins": 0 }))
            .await
            .unwrap();
        let id = created["_id"].as_str().unwrap().to_string();

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                // A fresh Model per call, as the service builds them
                let model = Model::new("User", Arc::new(user_schema()), conn.clone())
                    .with_write_lock(lock.clone());
                let id = id.clone();
                tokio::spawn(async move {
                    model
                        .find_one_and_update(
                            &json!({ "_id": id }),
                            &json!({ "$inc": { "logins": 1 } }),
                            UpdateOptions::default(),
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_some());
        }

        let stored = model.find_by_id(&id, None).await.unwrap().unwrap();
        assert_eq!(stored["logins"], 40);
    }
}
