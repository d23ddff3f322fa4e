use super::ModelService;
use crate::document::Document;
use crate::error::ModelDbError;
use crate::options::{FindOptions, PaginationOptions, UpdateOptions};
use crate::response::{DbResponse, PaginatedResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Serde-typed view over a cached `ModelService`.
///
/// Documents come back as `Document<T>`; a stored document that no longer
/// deserializes into `T` turns the envelope into a failure.
pub struct TypedService<T> {
    inner: Arc<ModelService>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedService<T> {
    fn clone(&self) -> Self {
        TypedService {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> TypedService<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(inner: Arc<ModelService>) -> Self {
        TypedService {
            inner,
            _marker: PhantomData,
        }
    }

    /// The untyped service underneath.
    pub fn inner(&self) -> &Arc<ModelService> {
        &self.inner
    }

    pub async fn create(&self, data: &T) -> DbResponse<Document<T>> {
        match serde_json::to_value(data) {
            Ok(value) => convert(self.inner.create(value).await, decode),
            Err(e) => DbResponse::failure(&ModelDbError::Json(e)),
        }
    }

    pub async fn create_many(&self, docs: &[T]) -> DbResponse<Vec<Document<T>>> {
        match docs.iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>() {
            Ok(values) => convert(self.inner.create_many(values).await, decode_all),
            Err(e) => DbResponse::failure(&ModelDbError::Json(e)),
        }
    }

    pub async fn find_one(&self, filter: &Value) -> DbResponse<Option<Document<T>>> {
        convert(self.inner.find_one(filter, None).await, decode_optional)
    }

    pub async fn find_by_id(&self, id: &str) -> DbResponse<Option<Document<T>>> {
        convert(self.inner.find_by_id(id, None).await, decode_optional)
    }

    pub async fn find(&self, filter: &Value, options: &FindOptions) -> DbResponse<Vec<Document<T>>> {
        convert(self.inner.find(filter, None, options).await, decode_all)
    }

    pub async fn find_with_pagination(
        &self,
        filter: &Value,
        options: &PaginationOptions,
    ) -> DbResponse<PaginatedResult<Document<T>>> {
        convert(
            self.inner.find_with_pagination(filter, options, None).await,
            |page: PaginatedResult<Value>| {
                let PaginatedResult {
                    items,
                    total,
                    page,
                    limit,
                    ..
                } = page;
                Ok(PaginatedResult::new(decode_all(items)?, total, page, limit))
            },
        )
    }

    pub async fn update_one(
        &self,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> DbResponse<Option<Document<T>>> {
        convert(self.inner.update_one(filter, update, options).await, decode_optional)
    }

    pub async fn update_by_id(
        &self,
        id: &str,
        update: &Value,
        options: UpdateOptions,
    ) -> DbResponse<Option<Document<T>>> {
        convert(self.inner.update_by_id(id, update, options).await, decode_optional)
    }

    pub async fn delete_by_id(&self, id: &str) -> DbResponse<bool> {
        self.inner.delete_by_id(id).await
    }

    pub async fn count(&self, filter: &Value) -> DbResponse<u64> {
        self.inner.count(filter).await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> serde_json::Result<Document<T>> {
    serde_json::from_value(value)
}

fn decode_optional<T: DeserializeOwned>(value: Option<Value>) -> serde_json::Result<Option<Document<T>>> {
    value.map(decode).transpose()
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> serde_json::Result<Vec<Document<T>>> {
    values.into_iter().map(decode).collect()
}

/// Map the payload of a successful envelope, turning decode errors into a
/// failed envelope. Failed envelopes pass through unchanged.
fn convert<A, B>(
    response: DbResponse<A>,
    f: impl FnOnce(A) -> serde_json::Result<B>,
) -> DbResponse<B> {
    let DbResponse {
        success,
        data,
        error,
        message,
        total,
    } = response;

    match data.map(f).transpose() {
        Ok(data) => DbResponse {
            success,
            data,
            error,
            message,
            total,
        },
        Err(e) => {
            let err = ModelDbError::Json(e);
            log::error!("Failed to decode stored document: {err}");
            DbResponse::failure(&err)
        }
    }
}
