mod dispatch;
mod error;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::chain::ChainService;
use crate::db::UserOpStore;
use crate::mempool::Mempool;
use crate::validator::Validator;
use error::RpcError;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub mempool: Arc<Mempool>,
    pub validator: Arc<Validator>,
    pub store: Arc<dyn UserOpStore>,
    pub chain: Arc<dyn ChainService>,
    pub entry_point: String,
    pub chain_id: u64,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/health", get(health))
        .route("/mempool", get(list_mempool))
        .route("/userOp/{hash}", get(get_user_op))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn list_mempool(State(state): State<AppState>) -> impl IntoResponse {
    let ops = state.mempool.get_all().await;
    let hashes: Vec<_> = ops.iter().map(|r| r.user_op_hash.clone()).collect();
    Json(json!({ "count": hashes.len(), "userOpHashes": hashes }))
}

async fn get_user_op(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    match state.mempool.get(&hash.to_ascii_lowercase()).await {
        Some(record) => (StatusCode::OK, Json(json!({
            "userOpHash": record.user_op_hash,
            "status": record.status.as_db_str(),
            "userOperation": record.user_op,
        }))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))),
    }
}

async fn handle_rpc(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    match body {
        Value::Array(requests) => {
            if requests.is_empty() {
                return Json(RpcError::InvalidRequest.to_json(Value::Null));
            }
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(handle_single(&state, request).await);
            }
            Json(Value::Array(responses))
        }
        single => Json(handle_single(&state, single).await),
    }
}

async fn handle_single(state: &AppState, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    let Some(obj) = request.as_object() else {
        return RpcError::InvalidRequest.to_json(id);
    };

    let jsonrpc_ok = obj.get("jsonrpc").and_then(|v| v.as_str()) == Some("2.0");
    let Some(method) = obj.get("method").and_then(|v| v.as_str()) else {
        return RpcError::InvalidRequest.to_json(id);
    };
    if !jsonrpc_ok {
        return RpcError::InvalidRequest.to_json(id);
    }

    let params = obj.get("params").cloned().unwrap_or(Value::Array(vec![]));

    match dispatch::dispatch_method(state, method, &params).await {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }),
        Err(err) => err.to_json(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::test_state;

    fn request(id: i64, method: &str) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": [] })
    }

    #[tokio::test]
    async fn batch_response_length_and_ids_match_request() {
        let state = test_state();
        let body = Value::Array(vec![
            request(1, "eth_chainId"),
            request(2, "net_version"),
            request(3, "web3_clientVersion"),
        ]);

        let Json(response) = handle_rpc(State(state), Json(body)).await;
        let responses = response.as_array().expect("batch response is an array");
        assert_eq!(responses.len(), 3);
        for (i, resp) in responses.iter().enumerate() {
            assert_eq!(resp["id"], json!(i as i64 + 1));
        }
    }

    #[tokio::test]
    async fn empty_batch_is_invalid_request() {
        let state = test_state();
        let Json(response) = handle_rpc(State(state), Json(Value::Array(vec![]))).await;
        assert_eq!(response["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn malformed_single_request_is_invalid_request() {
        let state = test_state();
        let body = json!({ "jsonrpc": "1.0", "method": "eth_chainId" });
        let Json(response) = handle_rpc(State(state), Json(body)).await;
        assert_eq!(response["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn single_request_returns_result_envelope() {
        let state = test_state();
        let Json(response) = handle_rpc(State(state), Json(request(7, "eth_chainId"))).await;
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["result"], json!("0x539"));
    }
}
