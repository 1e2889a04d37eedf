/// Audit Sink
///
/// Every inbound JSON-RPC sub-request is appended to a write-only audit log as
/// one JSON line. Audit failures are reported to the caller, which logs them;
/// they never fail the request itself.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::rpc::JsonRpcRequest;

/// Per-request metadata carried alongside the parsed body for auditing and
/// log correlation.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: Uuid,
    pub remote_addr: String,
    pub user_agent: String,
}

/// Capability contract for the audit sink.
pub trait Auditor: Send + Sync {
    fn record_request(&self, meta: &RequestMeta, req: &JsonRpcRequest) -> Result<(), ProxyError>;
}

/// Appends JSON lines to a log file.
pub struct LogAuditor {
    out: Mutex<BufWriter<File>>,
}

impl LogAuditor {
    pub fn open(log_file: &str) -> Result<Self, ProxyError> {
        if let Some(parent) = std::path::Path::new(log_file)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(log_file)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Auditor for LogAuditor {
    fn record_request(&self, meta: &RequestMeta, req: &JsonRpcRequest) -> Result<(), ProxyError> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let record = json!({
            "ts": ts,
            "request_id": meta.request_id.to_string(),
            "remote_addr": meta.remote_addr,
            "user_agent": meta.user_agent,
            "rpc_method": req.method,
            "rpc_params": serde_json::to_string(&req.params)?,
        });

        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        serde_json::to_writer(&mut *out, &record)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn meta() -> RequestMeta {
        RequestMeta {
            request_id: Uuid::new_v4(),
            remote_addr: "10.0.0.1:55123".into(),
            user_agent: "test-agent/1.0".into(),
        }
    }

    #[test]
    fn test_record_request_writes_one_json_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let auditor = LogAuditor::open(path.to_str().unwrap()).unwrap();

        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: json!(7),
            method: "eth_getBlockByNumber".into(),
            params: vec![json!("0x1"), json!(false)],
        };
        auditor.record_request(&meta(), &req).unwrap();
        auditor.record_request(&meta(), &req).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["rpc_method"], "eth_getBlockByNumber");
        assert_eq!(record["rpc_params"], "[\"0x1\",false]");
        assert_eq!(record["remote_addr"], "10.0.0.1:55123");
        assert_eq!(record["user_agent"], "test-agent/1.0");
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/audit.log");
        LogAuditor::open(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
    }
}
