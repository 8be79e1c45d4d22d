use serde_json::{Value, json};

use super::error::RpcError;
use super::AppState;
use crate::mempool::MempoolError;
use crate::types::{UserOperation, format_user_operation};
use crate::validator::ValidationError;

/// Dispatches a single, already-envelope-validated JSON-RPC request to
/// the matching bundler method. `req` must have `method` and (optionally)
/// `params`; `id` is handled by the caller.
pub async fn dispatch_method(state: &AppState, method: &str, params: &Value) -> Result<Value, RpcError> {
    match method {
        "eth_sendUserOperation" => send_user_operation(state, params).await,
        "eth_estimateUserOperationGas" => estimate_user_operation_gas(state, params).await,
        "eth_getUserOperationReceipt" => get_user_operation_receipt(state, params).await,
        "eth_getUserOperationByHash" => get_user_operation_by_hash(state, params).await,
        "eth_supportedEntryPoints" => Ok(json!([state.entry_point])),
        "eth_chainId" => Ok(json!(format!("0x{:x}", state.chain_id))),
        "net_version" => Ok(json!(state.chain_id.to_string())),
        "web3_clientVersion" => Ok(json!("userop-bundler/0.1.0")),
        other => Err(RpcError::MethodNotFound(other.to_string())),
    }
}

fn params_array(params: &Value) -> Result<&Vec<Value>, RpcError> {
    params
        .as_array()
        .ok_or_else(|| RpcError::InvalidParams("params must be an array".to_string()))
}

fn check_entry_point(state: &AppState, got: &str) -> Result<(), RpcError> {
    if got.to_ascii_lowercase() != state.entry_point.to_ascii_lowercase() {
        return Err(RpcError::unsupported_entry_point(got, &state.entry_point));
    }
    Ok(())
}

fn parse_user_op_param(value: &Value) -> Result<UserOperation, RpcError> {
    serde_json::from_value(value.clone())
        .map_err(|e| RpcError::InvalidParams(format!("invalid UserOperation: {e}")))
}

/// Maps the admission pipeline's typed errors onto the RPC error taxonomy:
/// format errors are caller mistakes (`-32602`), nonce/simulation rejections
/// are bundler policy (`-32500` with a stable `data.reason`), and chain
/// errors are environment-transient (`-32603`).
fn map_validation_error(err: ValidationError) -> RpcError {
    match &err {
        ValidationError::InvalidField(field) => {
            RpcError::InvalidParams(format!("invalid {field}"))
        }
        ValidationError::NonceTooLow => RpcError::Bundler {
            message: err.to_string(),
            reason: "nonce-too-low",
        },
        ValidationError::Simulation(reason) => RpcError::Bundler {
            message: format!("simulation failed: {reason}"),
            reason: "simulation-failed",
        },
        ValidationError::Chain(chain_err) => RpcError::Internal(chain_err.to_string()),
    }
}

fn map_mempool_error(err: MempoolError) -> RpcError {
    let reason = match &err {
        MempoolError::DuplicateInMempool => "duplicate-in-mempool",
        MempoolError::NonceReused => "nonce-reused",
        MempoolError::DuplicateHash => "duplicate-hash",
    };
    RpcError::Bundler {
        message: err.to_string(),
        reason,
    }
}

async fn send_user_operation(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let arr = params_array(params)?;
    if arr.len() != 2 {
        return Err(RpcError::InvalidParams(
            "expected [userOp, entryPoint]".to_string(),
        ));
    }
    let entry_point = arr[1]
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams("entryPoint must be a string".to_string()))?;
    check_entry_point(state, entry_point)?;

    let uo = parse_user_op_param(&arr[0])?;
    let uo = format_user_operation(&uo).map_err(|e| RpcError::InvalidParams(e.to_string()))?;

    let hash = state
        .validator
        .validate(&uo)
        .await
        .map_err(map_validation_error)?;

    state
        .mempool
        .add(uo, hash.clone())
        .await
        .map_err(map_mempool_error)?;

    Ok(json!(hash))
}

async fn estimate_user_operation_gas(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let arr = params_array(params)?;
    if arr.len() != 2 {
        return Err(RpcError::InvalidParams(
            "expected [userOp, entryPoint]".to_string(),
        ));
    }
    let entry_point = arr[1]
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams("entryPoint must be a string".to_string()))?;
    check_entry_point(state, entry_point)?;

    let uo = parse_user_op_param(&arr[0])?;
    let estimate = state
        .validator
        .estimate_gas(&uo)
        .map_err(|e| RpcError::InvalidParams(e.to_string()))?;

    Ok(json!({
        "preVerificationGas": estimate.pre_verification_gas,
        "verificationGasLimit": estimate.verification_gas_limit,
        "callGasLimit": estimate.call_gas_limit,
    }))
}

fn parse_hash_param(params: &Value) -> Result<String, RpcError> {
    let arr = params_array(params)?;
    let hash = arr
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::InvalidParams("expected [userOpHash]".to_string()))?;
    Ok(hash.to_ascii_lowercase())
}

async fn get_user_operation_receipt(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let hash = parse_hash_param(params)?;
    let record = state
        .store
        .get_user_op_by_hash(&hash)
        .await
        .map_err(|e| RpcError::Internal(e.to_string()))?;

    let Some(record) = record else {
        return Ok(Value::Null);
    };

    let success = record.status == crate::types::UoStatus::Confirmed;
    let block_number = record.block_number.unwrap_or_else(|| "0x0".to_string());
    let tx_hash = record.tx_hash.unwrap_or_else(|| "0x0".to_string());
    let gas_used = record.gas_used.unwrap_or_else(|| "0x0".to_string());
    let gas_cost = record.gas_cost.unwrap_or_else(|| "0x0".to_string());

    Ok(json!({
        "userOpHash": record.user_op_hash,
        "entryPoint": state.entry_point,
        "sender": record.user_op.sender,
        "nonce": record.user_op.nonce,
        "paymaster": Value::Null,
        "actualGasCost": gas_cost,
        "actualGasUsed": gas_used,
        "success": success,
        "reason": record.error_message,
        "logs": [],
        "receipt": {
            "transactionHash": tx_hash,
            "blockNumber": block_number,
            "from": Value::Null,
            "to": state.entry_point,
            "cumulativeGasUsed": gas_used,
            "gasUsed": gas_used,
            "logs": [],
            "logsBloom": "0x0",
            "status": if success { "0x1" } else { "0x0" },
            "effectiveGasPrice": "0x0",
        }
    }))
}

async fn get_user_operation_by_hash(state: &AppState, params: &Value) -> Result<Value, RpcError> {
    let hash = parse_hash_param(params)?;
    let record = state
        .store
        .get_user_op_by_hash(&hash)
        .await
        .map_err(|e| RpcError::Internal(e.to_string()))?;

    let Some(record) = record else {
        return Ok(Value::Null);
    };

    Ok(json!({
        "userOperation": record.user_op,
        "entryPoint": state.entry_point,
        "blockNumber": record.block_number,
        "blockHash": Value::Null,
        "transactionHash": record.tx_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::test_support::{TEST_ENTRY_POINT, sample_uo, test_state};

    #[tokio::test]
    async fn send_user_operation_admits_to_mempool() {
        let state = test_state();
        let params = json!([sample_uo("0x1"), TEST_ENTRY_POINT]);
        let hash = dispatch_method(&state, "eth_sendUserOperation", &params)
            .await
            .unwrap();
        assert!(hash.as_str().unwrap().starts_with("0x"));
        assert_eq!(state.mempool.pending_count().await, 1);
    }

    #[tokio::test]
    async fn send_user_operation_rejects_unsupported_entry_point() {
        let state = test_state();
        let params = json!([sample_uo("0x1"), "0x000000000000000000000000000000000000ff"]);
        let err = dispatch_method(&state, "eth_sendUserOperation", &params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32500);
    }

    #[tokio::test]
    async fn send_user_operation_rejects_duplicate_nonce() {
        let state = test_state();
        let params = json!([sample_uo("0x1"), TEST_ENTRY_POINT]);
        dispatch_method(&state, "eth_sendUserOperation", &params).await.unwrap();
        let err = dispatch_method(&state, "eth_sendUserOperation", &params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32500);
        assert_eq!(err.to_json(Value::Null)["error"]["data"]["reason"], json!("duplicate-in-mempool"));
    }

    #[tokio::test]
    async fn send_user_operation_rejects_malformed_sender_as_invalid_params() {
        let state = test_state();
        let mut uo = serde_json::to_value(sample_uo("0x1")).unwrap();
        uo["sender"] = json!("not-an-address");
        let params = json!([uo, TEST_ENTRY_POINT]);
        let err = dispatch_method(&state, "eth_sendUserOperation", &params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn estimate_gas_returns_three_fields() {
        let state = test_state();
        let params = json!([sample_uo("0x1"), TEST_ENTRY_POINT]);
        let result = dispatch_method(&state, "eth_estimateUserOperationGas", &params)
            .await
            .unwrap();
        assert!(result.get("preVerificationGas").is_some());
        assert!(result.get("verificationGasLimit").is_some());
        assert!(result.get("callGasLimit").is_some());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let state = test_state();
        let err = dispatch_method(&state, "eth_unknownMethod", &json!([]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32601);
    }

    #[tokio::test]
    async fn get_user_operation_receipt_is_null_for_unknown_hash() {
        let state = test_state();
        let result = dispatch_method(&state, "eth_getUserOperationReceipt", &json!(["0xdeadbeef"]))
            .await
            .unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn supported_entry_points_lists_configured_entry_point() {
        let state = test_state();
        let result = dispatch_method(&state, "eth_supportedEntryPoints", &json!([]))
            .await
            .unwrap();
        assert_eq!(result, json!([TEST_ENTRY_POINT]));
    }
}
