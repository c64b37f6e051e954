use std::convert::Infallible;
use std::future::Future;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;

use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use warp::hyper::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Reply};

use super::http_utils::{into_response, ApiError};
use crate::config::context::HTTP_REQUESTS;
use crate::config::schema::HttpFrontend;
use crate::context::ShardlineContext;
use crate::data_types::{Batch, Row, Value};
use crate::ingest::BatchResult;
use crate::schema::{IndexSpecification, TableSchema};

#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("Error parsing the listen address: {0}")]
    InvalidAddress(#[from] AddrParseError),

    #[error("Error binding the HTTP server: {0}")]
    Bind(#[from] warp::Error),
}

#[derive(Debug, Deserialize)]
struct CreateDatabaseBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateTableBody {
    schema: TableSchema,
    #[serde(default)]
    index: Option<IndexSpecification>,
}

#[derive(Debug, Deserialize)]
struct InsertBody {
    rows: Vec<Vec<serde_json::Value>>,
}

fn with_context(
    context: Arc<ShardlineContext>,
) -> impl Filter<Extract = (Arc<ShardlineContext>,), Error = Infallible> + Clone {
    warp::any().map(move || context.clone())
}

fn no_content() -> Response {
    reply::with_status(reply::reply(), StatusCode::NO_CONTENT).into_response()
}

/// Convert JSON rows into typed rows, taking each value's column type as a hint.
fn rows_from_json(schema: &TableSchema, rows: &[Vec<serde_json::Value>]) -> Batch {
    rows.iter()
        .map(|row| {
            Row::new(
                row.iter()
                    .enumerate()
                    .map(|(position, value)| {
                        Value::from_json(value, schema.columns.get(position).map(|c| c.r#type))
                    })
                    .collect(),
            )
        })
        .collect()
}

async fn list_databases(context: Arc<ShardlineContext>) -> Result<Response, ApiError> {
    let databases = context.table_manager().list_databases().await?;
    Ok(reply::json(&databases).into_response())
}

async fn create_database(
    context: Arc<ShardlineContext>,
    body: CreateDatabaseBody,
) -> Result<Response, ApiError> {
    let mut session = context.session().await?;
    context
        .table_manager()
        .create_database(&mut session, &body.name)
        .await?;

    Ok(reply::with_status(reply::json(&json!({ "name": body.name })), StatusCode::CREATED)
        .into_response())
}

async fn drop_database(
    database: String,
    context: Arc<ShardlineContext>,
) -> Result<Response, ApiError> {
    let mut session = context.session().await?;
    context
        .table_manager()
        .drop_database(&mut session, &database)
        .await?;
    Ok(no_content())
}

async fn list_tables(
    database: String,
    context: Arc<ShardlineContext>,
) -> Result<Response, ApiError> {
    let session = context.session_for(&database).await?;
    let tables = context.table_manager().list_tables(&session)?;
    Ok(reply::json(&tables).into_response())
}

async fn create_table(
    database: String,
    context: Arc<ShardlineContext>,
    body: CreateTableBody,
) -> Result<Response, ApiError> {
    let session = context.session_for(&database).await?;
    let name = body.schema.name.clone();
    context
        .table_manager()
        .create_table(&session, body.schema, body.index)
        .await?;

    let description = context.table_manager().describe_table(&session, &name)?;
    Ok(reply::with_status(reply::json(&description), StatusCode::CREATED).into_response())
}

async fn describe_table(
    database: String,
    table: String,
    context: Arc<ShardlineContext>,
) -> Result<Response, ApiError> {
    let session = context.session_for(&database).await?;
    let description = context.table_manager().describe_table(&session, &table)?;
    Ok(reply::json(&description).into_response())
}

async fn drop_table(
    database: String,
    table: String,
    context: Arc<ShardlineContext>,
) -> Result<Response, ApiError> {
    let session = context.session_for(&database).await?;
    context.table_manager().drop_table(&session, &table).await?;
    Ok(no_content())
}

async fn insert_rows(
    database: String,
    table: String,
    context: Arc<ShardlineContext>,
    body: InsertBody,
) -> Result<Response, ApiError> {
    let session = context.session_for(&database).await?;
    let schema = context.table_manager().get_table(&session, &table)?;
    let batch = rows_from_json(&schema, &body.rows);

    let result = context
        .pipeline()
        .insert_batch(&session, &table, batch)
        .await?;

    let status = match &result {
        BatchResult::Success { .. } => StatusCode::OK,
        BatchResult::PartialCommit { .. } => StatusCode::MULTI_STATUS,
        BatchResult::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
    };
    Ok(reply::with_status(reply::json(&result), status).into_response())
}

// GET, POST /databases
pub fn databases(
    context: Arc<ShardlineContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let list = warp::path!("databases")
        .and(warp::get())
        .and(with_context(context.clone()))
        .then(list_databases)
        .map(into_response);

    let create = warp::path!("databases")
        .and(warp::post())
        .and(with_context(context.clone()))
        .and(warp::body::json())
        .then(create_database)
        .map(into_response);

    let drop = warp::path!("databases" / String)
        .and(warp::delete())
        .and(with_context(context))
        .then(drop_database)
        .map(into_response);

    list.or(create).or(drop)
}

// /databases/[db]/tables[/table[/rows]]
pub fn tables(
    context: Arc<ShardlineContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let list = warp::path!("databases" / String / "tables")
        .and(warp::get())
        .and(with_context(context.clone()))
        .then(list_tables)
        .map(into_response);

    let create = warp::path!("databases" / String / "tables")
        .and(warp::post())
        .and(with_context(context.clone()))
        .and(warp::body::json())
        .then(create_table)
        .map(into_response);

    let describe = warp::path!("databases" / String / "tables" / String)
        .and(warp::get())
        .and(with_context(context.clone()))
        .then(describe_table)
        .map(into_response);

    let drop = warp::path!("databases" / String / "tables" / String)
        .and(warp::delete())
        .and(with_context(context.clone()))
        .then(drop_table)
        .map(into_response);

    let insert = warp::path!("databases" / String / "tables" / String / "rows")
        .and(warp::post())
        .and(with_context(context))
        .and(warp::body::json())
        .then(insert_rows)
        .map(into_response);

    list.or(create).or(describe).or(drop).or(insert)
}

pub fn filters(
    context: Arc<ShardlineContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["Content-Type"])
        .allow_methods(vec!["GET", "POST", "DELETE"]);

    let log = warp::log::custom(|info| {
        debug!(
            "{} {} -> {} in {:?}",
            info.method(),
            info.path(),
            info.status(),
            info.elapsed()
        );
        counter!(
            HTTP_REQUESTS,
            "method" => info.method().as_str().to_string(),
            "status" => info.status().as_u16().to_string()
        )
        .increment(1);
    });

    databases(context.clone())
        .or(tables(context))
        .with(cors)
        .with(log)
}

pub async fn run_server(
    context: Arc<ShardlineContext>,
    config: HttpFrontend,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FrontendError> {
    let filters = filters(context);

    let socket_addr: SocketAddr =
        format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    let (addr, server) =
        warp::serve(filters).try_bind_with_graceful_shutdown(socket_addr, shutdown)?;

    info!("Listening for HTTP requests on {addr}");
    server.await;
    info!("HTTP frontend stopped");
    Ok(())
}
