use crate::error::ModelDbError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Uniform result envelope returned by every service operation.
///
/// Serializes as `{ success, data?, error?, message?, total? }`. Callers must
/// check `success` before trusting `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// The failure half of an envelope, for callers that prefer `?`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct DbFailure {
    pub kind: String,
    pub message: String,
}

impl<T> DbResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        DbResponse {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.into()),
            total: None,
        }
    }

    pub fn ok_with_total(data: T, message: impl Into<String>, total: u64) -> Self {
        DbResponse {
            total: Some(total),
            ..Self::ok(data, message)
        }
    }

    /// Failed envelope from a library error; the error's kind becomes `error`.
    pub fn failure(err: &ModelDbError) -> Self {
        DbResponse {
            success: false,
            data: None,
            error: Some(err.kind().to_string()),
            message: Some(err.to_string()),
            total: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// `Ok(data)` on success, otherwise the error and message as a `DbFailure`.
    pub fn into_result(self) -> Result<Option<T>, DbFailure> {
        if self.success {
            Ok(self.data)
        } else {
            Err(DbFailure {
                kind: self.error.unwrap_or_else(|| "Error".to_string()),
                message: self.message.unwrap_or_default(),
            })
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DbResponse<U> {
        DbResponse {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            message: self.message,
            total: self.total,
        }
    }
}

/// One page of results plus navigation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let pages = total.div_ceil(limit.max(1));
        PaginatedResult {
            items,
            total,
            page,
            limit,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResult<U> {
        PaginatedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            pages: self.pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_success_shape_omits_absent_members() {
        let response = DbResponse::ok(json!({ "a": 1 }), "document created");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "success": true, "data": { "a": 1 }, "message": "document created" })
        );
    }

    #[test]
    fn test_null_data_is_kept() {
        let response: DbResponse<Option<i32>> = DbResponse::ok(None, "nothing");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "success": true, "data": null, "message": "nothing" })
        );
    }

    #[test]
    fn test_failure_shape() {
        let response: DbResponse<()> = DbResponse::failure(&ModelDbError::Validation("bad".into()));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "success": false, "error": "ValidationError", "message": "Validation error: bad" })
        );

        let failure = response.into_result().unwrap_err();
        assert_eq!(failure.kind, "ValidationError");
    }

    #[test]
    fn test_total_and_map() {
        let response = DbResponse::ok_with_total(3u64, "counted", 3).map(|n| n * 2);
        assert_eq!(response.total, Some(3));
        assert_eq!(response.into_result().unwrap(), Some(6));
    }

    #[test]
    fn test_pagination_metadata() {
        let page = PaginatedResult::new(vec![1, 2], 12, 2, 5);
        assert_eq!(page.pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);

        let last = PaginatedResult::<i32>::new(vec![], 12, 4, 5);
        assert!(!last.has_next);

        let empty = PaginatedResult::<i32>::new(vec![], 0, 1, 10);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }

    #[test]
    fn test_pagination_serializes_camel_case() {
        let value = serde_json::to_value(PaginatedResult::new(vec![1], 1, 1, 10)).unwrap();
        assert_eq!(value["hasNext"], json!(false));
        assert_eq!(value["hasPrev"], json!(false));
    }
}
