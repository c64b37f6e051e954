// Warp error handling and propagation
//
// Handlers return `Result<impl Reply, ApiError>` rather than rejecting: a
// rejection tells warp to try the remaining filters, while a failed catalog or
// ingestion call is final for the request. `ApiError` renders itself as a JSON
// `{"error": <kind>, "message": <text>}` body with a status code matching the
// error class, and `into_response` turns the handler result into a response:
//
//   .then(my_handler_func)
//   .map(into_response)
//

use serde::Serialize;
use warp::hyper::{Body, Response, StatusCode};
use warp::Reply;

use crate::catalog::{CatalogError, TableError};

#[derive(Debug)]
pub enum ApiError {
    Catalog(CatalogError),
    Table(TableError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}

impl From<TableError> for ApiError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Catalog(e) => ApiError::Catalog(e),
            e => ApiError::Table(e),
        }
    }
}

fn catalog_status(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::UnknownTable { .. } | CatalogError::DatabaseNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        CatalogError::DuplicateTable { .. }
        | CatalogError::DuplicateIndex { .. }
        | CatalogError::DatabaseAlreadyExists { .. } => StatusCode::CONFLICT,
        CatalogError::InvalidSchema { .. }
        | CatalogError::InvalidIndex { .. }
        | CatalogError::NoOpenDatabase => StatusCode::BAD_REQUEST,
        CatalogError::NoSessionAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CatalogError::Aborted { .. }
        | CatalogError::Corrupt { .. }
        | CatalogError::SqlxError(_)
        | CatalogError::SerdeJsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn catalog_kind(err: &CatalogError) -> &'static str {
    match err {
        CatalogError::DuplicateTable { .. } => "duplicate_table",
        CatalogError::UnknownTable { .. } => "unknown_table",
        CatalogError::InvalidSchema { .. } => "invalid_schema",
        CatalogError::DuplicateIndex { .. } => "duplicate_index",
        CatalogError::InvalidIndex { .. } => "invalid_index",
        CatalogError::DatabaseAlreadyExists { .. } => "database_already_exists",
        CatalogError::DatabaseNotFound { .. } => "database_not_found",
        CatalogError::NoOpenDatabase => "no_open_database",
        CatalogError::NoSessionAvailable { .. } => "no_session_available",
        CatalogError::Aborted { .. }
        | CatalogError::Corrupt { .. }
        | CatalogError::SqlxError(_)
        | CatalogError::SerdeJsonError(_) => "internal_error",
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Catalog(e) => catalog_status(e),
            ApiError::Table(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Catalog(e) => catalog_kind(e),
            ApiError::Table(TableError::RollbackFailed { .. }) => "rollback_failed",
            ApiError::Table(TableError::Catalog(e)) => catalog_kind(e),
        }
    }

    fn status_code_body(self: ApiError) -> (StatusCode, ErrorBody) {
        let status = self.status_code();
        let error = self.kind();
        let message = match self {
            // Don't leak SQL details to clients
            ApiError::Catalog(CatalogError::SqlxError(_)) => "Internal error".to_string(),
            ApiError::Catalog(e) => e.to_string(),
            ApiError::Table(e) => e.to_string(),
        };
        (status, ErrorBody { error, message })
    }
}

impl Reply for ApiError {
    fn into_response(self) -> Response<Body> {
        let (status, body) = self.status_code_body();
        warp::reply::with_status(warp::reply::json(&body), status).into_response()
    }
}

pub fn into_response<S: Reply, E: Reply>(reply_res: Result<S, E>) -> Response<Body> {
    match reply_res {
        Ok(resp) => resp.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::schema::SchemaError;

    #[rstest]
    #[case::unknown_table(CatalogError::UnknownTable { name: "t".to_string() }, StatusCode::NOT_FOUND)]
    #[case::missing_database(CatalogError::DatabaseNotFound { name: "db".to_string() }, StatusCode::NOT_FOUND)]
    #[case::duplicate_index(CatalogError::DuplicateIndex { name: "i".to_string() }, StatusCode::CONFLICT)]
    #[case::invalid_schema(
        CatalogError::InvalidSchema { name: "t".to_string(), source: SchemaError::NoColumns },
        StatusCode::BAD_REQUEST
    )]
    #[case::no_session(CatalogError::NoSessionAvailable { timeout_ms: 10 }, StatusCode::SERVICE_UNAVAILABLE)]
    #[case::sql(CatalogError::SqlxError(sqlx::Error::PoolTimedOut), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_codes(#[case] err: CatalogError, #[case] status: StatusCode) {
        assert_eq!(ApiError::from(err).into_response().status(), status);
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let response = ApiError::from(CatalogError::UnknownTable {
            name: "t".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "application/json");

        let body = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({
                "error": "unknown_table",
                "message": "Table \"t\" doesn't exist"
            })
        );
    }

    #[tokio::test]
    async fn test_sql_details_stay_hidden() {
        let response =
            ApiError::from(CatalogError::SqlxError(sqlx::Error::PoolTimedOut)).into_response();
        let body = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({"error": "internal_error", "message": "Internal error"})
        );
    }

    #[test]
    fn test_table_error_unwraps_catalog_error() {
        let err = TableError::Catalog(CatalogError::DuplicateTable {
            name: "t".to_string(),
        });
        assert_eq!(ApiError::from(err).status_code(), StatusCode::CONFLICT);
    }
}
