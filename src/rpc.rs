/// JSON-RPC 2.0 Wire Types
///
/// Request and response shapes shared by the dispatcher, the finalization
/// tracker and the healthcheck probe, plus the hex-quantity helpers Ethereum
/// nodes use for block numbers.
///
/// The request `id` is an opaque JSON scalar (number, string or null) and is
/// carried as a `serde_json::Value` so replies echo it bit-exact. The response
/// `result` is kept as undecoded raw JSON so cached payloads round-trip
/// byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::ProxyError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Last-resort reply when even the error response fails to marshal.
pub const INTERNAL_ERROR_BODY: &str =
    r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"internal error"}}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A successful JSON-RPC response with the result left undecoded.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub result: Box<RawValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub error: JsonRpcErrorData,
}

/// Loose parse used to decide whether an upstream reply carries an `error`
/// member (in which case post-processing hooks are skipped).
#[derive(Debug, Deserialize)]
pub struct ErrorProbe {
    #[serde(default)]
    pub error: Option<JsonRpcErrorData>,
}

/// Serialize `{jsonrpc, id, result}` with `result` spliced in verbatim from
/// previously captured raw bytes.
pub fn result_response_bytes(id: &Value, raw_result: &[u8]) -> Result<Vec<u8>, ProxyError> {
    #[derive(Serialize)]
    struct Reply<'a> {
        jsonrpc: &'a str,
        id: &'a Value,
        result: &'a RawValue,
    }

    let text = std::str::from_utf8(raw_result)
        .map_err(|_| ProxyError::UnexpectedResponse("cached result is not valid UTF-8"))?;
    let result = RawValue::from_string(text.to_owned())?;
    let reply = Reply {
        jsonrpc: JSONRPC_VERSION,
        id,
        result: &result,
    };
    Ok(serde_json::to_vec(&reply)?)
}

/// Strip a leading `0x`/`0X` from a hex quantity.
pub fn de0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

/// Decode an Ethereum hex quantity (e.g. `"0x4b7"`) to a u64.
pub fn hex_to_u64(s: &str) -> Result<u64, ProxyError> {
    u64::from_str_radix(de0x(s), 16).map_err(|_| ProxyError::InvalidHex(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_de0x() {
        assert_eq!(de0x("0x1a"), "1a");
        assert_eq!(de0x("0X1A"), "1A");
        assert_eq!(de0x("1a"), "1a");
    }

    #[test]
    fn test_hex_to_u64() {
        assert_eq!(hex_to_u64("0x0").unwrap(), 0);
        assert_eq!(hex_to_u64("0x4b7").unwrap(), 1207);
        assert_eq!(hex_to_u64("ff").unwrap(), 255);
        assert!(hex_to_u64("latest").is_err());
        assert!(hex_to_u64("").is_err());
        assert!(hex_to_u64("0xzz").is_err());
    }

    #[test]
    fn test_request_id_is_opaque() {
        // Numeric, string and null ids all survive a round trip untouched.
        for raw in [
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#,
            r#"{"jsonrpc":"2.0","id":"abc-123","method":"eth_chainId","params":[]}"#,
            r#"{"jsonrpc":"2.0","id":null,"method":"eth_chainId","params":[]}"#,
        ] {
            let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
            let out = serde_json::to_string(&req).unwrap();
            let a: Value = serde_json::from_str(raw).unwrap();
            let b: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(a["id"], b["id"]);
        }
    }

    #[test]
    fn test_request_defaults() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"method":"eth_blockNumber"}"#).unwrap();
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.id, Value::Null);
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_result_response_bytes_preserves_raw_result() {
        let raw = br#"{"number":"0x1","transactions":[]}"#;
        let out = result_response_bytes(&json!(2), raw).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 2);
        // The result member is the cached bytes verbatim.
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(r#""result":{"number":"0x1","transactions":[]}"#));
    }

    #[test]
    fn test_result_response_bytes_rejects_garbage() {
        assert!(result_response_bytes(&json!(1), b"{not json").is_err());
    }

    #[test]
    fn test_error_probe() {
        let ok: ErrorProbe =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#).unwrap();
        assert!(ok.error.is_none());

        let err: ErrorProbe = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#,
        )
        .unwrap();
        assert_eq!(err.error.unwrap().code, -32000);
    }
}
