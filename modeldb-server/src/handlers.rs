use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use modeldb::schemas::UserService;
use modeldb::{
    DbResponse, FindOptions, ModelDbError, ModelService, PaginationOptions, Sort, UpdateOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::AppState;

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/status", web::get().to(status))
            .route("/models", web::get().to(list_models))
            .route("/users/by-email/{email}", web::get().to(user_by_email))
            .route("/{model}", web::get().to(list_documents))
            .route("/{model}", web::post().to(create_document))
            .route("/{model}/query", web::post().to(query_documents))
            .route("/{model}/count", web::post().to(count_documents))
            .route("/{model}/aggregate", web::post().to(aggregate_documents))
            .route("/{model}/{id}", web::get().to(get_document))
            .route("/{model}/{id}", web::put().to(update_document))
            .route("/{model}/{id}", web::delete().to(delete_document)),
    );
}

// ── Helpers ─────────────────────────────────────────────────────────

fn service(state: &AppState, model: &str) -> Result<Arc<ModelService>, HttpResponse> {
    state.factory.get_service(model).map_err(|e| {
        let status = match &e {
            ModelDbError::SchemaNotRegistered(_) => StatusCode::NOT_FOUND,
            ModelDbError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(DbResponse::<()>::failure(&e))
    })
}

fn status_for_error(kind: Option<&str>) -> StatusCode {
    match kind {
        Some("ValidationError") | Some("QueryError") | Some("SchemaError") => {
            StatusCode::BAD_REQUEST
        }
        Some("DuplicateKey") => StatusCode::CONFLICT,
        Some("NotConnected") | Some("ConnectionError") => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Envelope as the body; failures map to a 4xx/5xx status by error kind.
fn envelope<T: Serialize>(response: DbResponse<T>, success_status: StatusCode) -> HttpResponse {
    let status = if response.success {
        success_status
    } else {
        status_for_error(response.error.as_deref())
    };
    HttpResponse::build(status).json(response)
}

/// Like `envelope`, but a successful lookup with no document is a 404.
fn lookup_envelope<T: Serialize>(response: DbResponse<Option<T>>) -> HttpResponse {
    if response.success && matches!(response.data, Some(None)) {
        return HttpResponse::NotFound().json(response);
    }
    envelope(response, StatusCode::OK)
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(DbResponse::<()>::failure(&ModelDbError::Query(message)))
}

fn parse_json_param(name: &str, raw: Option<&str>) -> Result<Option<Value>, HttpResponse> {
    raw.map(|s| {
        serde_json::from_str(s).map_err(|e| bad_request(format!("Invalid '{name}' parameter: {e}")))
    })
    .transpose()
}

fn empty_filter() -> Value {
    Value::Object(serde_json::Map::new())
}

// ── Status ──────────────────────────────────────────────────────────

async fn status(state: web::Data<AppState>) -> HttpResponse {
    let manager = state.factory.manager();
    HttpResponse::Ok().json(serde_json::json!({
        "status": manager.status(),
        "connected": manager.is_connected(),
        "lastError": manager.last_error(),
        "models": state.factory.model_names(),
    }))
}

async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    let models: Vec<Value> = state
        .factory
        .model_names()
        .into_iter()
        .filter_map(|name| {
            let schema = state.factory.schema(&name)?;
            let mut fields: Vec<&String> = schema.fields.keys().collect();
            fields.sort();
            Some(serde_json::json!({
                "name": name,
                "fields": fields,
                "timestamps": schema.timestamps,
                "strict": schema.strict,
            }))
        })
        .collect();
    HttpResponse::Ok().json(models)
}

// ── Generic CRUD handlers ───────────────────────────────────────────

#[derive(Deserialize)]
struct ListQuery {
    page: Option<u64>,
    limit: Option<u64>,
    /// JSON sort document, e.g. `{"createdAt":-1}`
    sort: Option<String>,
    /// JSON filter document
    filter: Option<String>,
}

async fn list_documents(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let service = match service(&state, &path) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let filter = match parse_json_param("filter", query.filter.as_deref()) {
        Ok(f) => f.unwrap_or_else(empty_filter),
        Err(resp) => return resp,
    };
    let sort = match parse_json_param("sort", query.sort.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let sort = match sort.map(|s| Sort::parse(&s)).transpose() {
        Ok(s) => s,
        Err(e) => return bad_request(e.to_string()),
    };

    let options = PaginationOptions {
        page: query.page,
        limit: query.limit,
        sort,
    };
    envelope(
        service.find_with_pagination(&filter, &options, None).await,
        StatusCode::OK,
    )
}

async fn create_document(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Value>,
) -> HttpResponse {
    let service = match service(&state, &path) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match body.into_inner() {
        Value::Array(docs) => envelope(service.create_many(docs).await, StatusCode::CREATED),
        doc => envelope(service.create(doc).await, StatusCode::CREATED),
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct QueryBody {
    filter: Option<Value>,
    projection: Option<Value>,
    sort: Option<Sort>,
    skip: Option<u64>,
    limit: Option<u64>,
}

async fn query_documents(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<QueryBody>,
) -> HttpResponse {
    let service = match service(&state, &path) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let QueryBody {
        filter,
        projection,
        sort,
        skip,
        limit,
    } = body.into_inner();

    let options = FindOptions { sort, skip, limit };
    let filter = filter.unwrap_or_else(empty_filter);
    envelope(
        service.find(&filter, projection.as_ref(), &options).await,
        StatusCode::OK,
    )
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CountBody {
    filter: Option<Value>,
}

async fn count_documents(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CountBody>,
) -> HttpResponse {
    let service = match service(&state, &path) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let filter = body.into_inner().filter.unwrap_or_else(empty_filter);
    envelope(service.count(&filter).await, StatusCode::OK)
}

async fn aggregate_documents(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Vec<Value>>,
) -> HttpResponse {
    let service = match service(&state, &path) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    envelope(service.aggregate(&body).await, StatusCode::OK)
}

async fn get_document(state: web::Data<AppState>, path: web::Path<(String, String)>) -> HttpResponse {
    let (model, id) = path.into_inner();
    let service = match service(&state, &model) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    lookup_envelope(service.find_by_id(&id, None).await)
}

async fn update_document(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<Value>,
) -> HttpResponse {
    let (model, id) = path.into_inner();
    let service = match service(&state, &model) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    lookup_envelope(
        service
            .update_by_id(&id, &body, UpdateOptions::default())
            .await,
    )
}

async fn delete_document(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (model, id) = path.into_inner();
    let service = match service(&state, &model) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let response = service.delete_by_id(&id).await;
    if response.success && response.data == Some(false) {
        return HttpResponse::NotFound().json(response);
    }
    envelope(response, StatusCode::OK)
}

// ── Users ───────────────────────────────────────────────────────────

async fn user_by_email(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let users = match UserService::new(&state.factory) {
        Ok(users) => users,
        Err(e) => {
            return HttpResponse::build(StatusCode::NOT_FOUND)
                .json(DbResponse::<()>::failure(&e))
        }
    };
    lookup_envelope(users.find_by_email(&path).await)
}
