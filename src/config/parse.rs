use anyhow::{Context, Result};

use crate::executor::ReceiptTimeoutAction;

pub(super) fn parse_hex_32(label: &str, s: &str) -> Result<[u8; 32]> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("invalid hex for {label}"))?;
    if bytes.len() != 32 {
        anyhow::bail!("{label} must be 32 bytes (got {})", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub(super) fn parse_receipt_timeout_action(s: &str) -> Result<ReceiptTimeoutAction> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "pending" => Ok(ReceiptTimeoutAction::Pending),
        "fail" => Ok(ReceiptTimeoutAction::Fail),
        other => anyhow::bail!("unsupported RECEIPT_TIMEOUT_ACTION: {other} (expected: pending|fail)"),
    }
}

pub(super) fn non_empty(label: &str, s: &str) -> Result<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{label} must be set");
    }
    Ok(trimmed.to_string())
}
