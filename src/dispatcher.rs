/// JSON-RPC Dispatcher
///
/// Parses inbound bodies (single object or batch array), audits each
/// sub-request, and runs the per-method before/after hooks around the
/// upstream POST. Before-hooks can short-circuit with a cached reply;
/// after-hooks populate the cache when the response describes finalized
/// state. Every sub-request yields exactly one well-formed JSON-RPC reply.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::audit::{Auditor, RequestMeta};
use crate::backend::Backend;
use crate::cache::Cacher;
use crate::error::ProxyError;
use crate::interceptor::{BatchBuffer, BufferedResponse};
use crate::metrics;
use crate::rpc::{
    result_response_bytes, ErrorProbe, JsonRpcErrorData, JsonRpcErrorResponse, JsonRpcRequest,
    JsonRpcResponse, INTERNAL_ERROR_BODY, JSONRPC_VERSION,
};
use crate::tracker::FinalizationTracker;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(1);
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Methods with registered before/after hooks.
enum MethodHandler {
    GetBlockByNumber,
    GetTransactionReceipt,
}

fn handler_for(method: &str) -> Option<MethodHandler> {
    match method {
        "eth_getBlockByNumber" => Some(MethodHandler::GetBlockByNumber),
        "eth_getTransactionReceipt" => Some(MethodHandler::GetTransactionReceipt),
        _ => None,
    }
}

fn block_cache_key(block_tag: &str, include_bodies: bool) -> String {
    format!("block:{}:{}", block_tag, include_bodies)
}

fn txreceipt_cache_key(tx_hash: &str) -> String {
    format!("txreceipt:{}", tx_hash)
}

/// Final HTTP reply assembled by the dispatcher.
#[derive(Debug)]
pub struct DispatchReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl DispatchReply {
    fn bad_request() -> Self {
        Self {
            status: 400,
            body: Vec::new(),
        }
    }
}

pub struct EthDispatcher {
    cacher: Arc<dyn Cacher>,
    auditor: Arc<dyn Auditor>,
    tracker: Arc<FinalizationTracker>,
    client: reqwest::Client,
}

impl EthDispatcher {
    pub fn new(
        cacher: Arc<dyn Cacher>,
        auditor: Arc<dyn Auditor>,
        tracker: Arc<FinalizationTracker>,
    ) -> Self {
        Self {
            cacher,
            auditor,
            tracker,
            client: reqwest::Client::builder()
                .timeout(UPSTREAM_TIMEOUT)
                .build()
                .expect("failed to build upstream HTTP client"),
        }
    }

    /// Process one inbound HTTP body against the chosen backend. The first
    /// non-whitespace byte decides the framing: `[` for a batch, `{` for a
    /// single request; anything else is a 400.
    pub async fn handle(
        &self,
        meta: &RequestMeta,
        backend: &Backend,
        body: &[u8],
    ) -> DispatchReply {
        match body.iter().copied().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') => match serde_json::from_slice::<Vec<JsonRpcRequest>>(body) {
                Ok(requests) => {
                    let mut batch = BatchBuffer::new();
                    for request in &requests {
                        batch.push(self.handle_rpc(meta, backend, request).await);
                    }
                    debug!(count = requests.len(), "processed batch request");
                    DispatchReply {
                        status: 200,
                        body: batch.flush(),
                    }
                }
                Err(e) => {
                    warn!(err = %e, "received malformed batch request");
                    DispatchReply::bad_request()
                }
            },
            Some(b'{') => match serde_json::from_slice::<JsonRpcRequest>(body) {
                Ok(request) => {
                    let res = self.handle_rpc(meta, backend, &request).await;
                    DispatchReply {
                        status: res.status(),
                        body: res.into_body(),
                    }
                }
                Err(e) => {
                    warn!(err = %e, "received malformed request");
                    DispatchReply::bad_request()
                }
            },
            _ => DispatchReply::bad_request(),
        }
    }

    /// One sub-request: audit, before-hook, upstream POST, after-hook.
    async fn handle_rpc(
        &self,
        meta: &RequestMeta,
        backend: &Backend,
        request: &JsonRpcRequest,
    ) -> BufferedResponse {
        let mut res = BufferedResponse::new();
        metrics::RPC_REQUESTS
            .with_label_values(&[metrics::method_label(&request.method)])
            .inc();

        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(e) => {
                error!(err = %e, "failed to re-serialize request");
                fail_with_internal_error(&mut res, &request.id, &e.to_string());
                return res;
            }
        };

        if let Err(e) = self.auditor.record_request(meta, request) {
            error!(err = %e, "failed to record audit log for request");
        }

        let handler = handler_for(&request.method);
        if let Some(handler) = &handler {
            if self.run_before(handler, &mut res, request).await {
                debug!(method = %request.method, "request handled in before filter");
                return res;
            }
        }

        let timer = metrics::UPSTREAM_RPC_DURATION.start_timer();
        let upstream = self
            .client
            .post(&backend.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        let upstream_res = match upstream {
            Ok(r) if r.status() == reqwest::StatusCode::OK => r,
            Ok(r) => {
                warn!(status = %r.status(), backend = %backend.name, "upstream returned non-200 response");
                metrics::UPSTREAM_ERRORS.inc();
                fail_request(&mut res, &request.id, -32602, "bad request");
                return res;
            }
            Err(e) => {
                warn!(err = %e, backend = %backend.name, "upstream request failed");
                metrics::UPSTREAM_ERRORS.inc();
                fail_request(&mut res, &request.id, -32602, "bad request");
                return res;
            }
        };

        let upstream_body = match upstream_res.bytes().await {
            Ok(b) => b,
            Err(e) => {
                error!(err = %e, "failed to read upstream body");
                metrics::UPSTREAM_ERRORS.inc();
                fail_with_internal_error(&mut res, &request.id, &e.to_string());
                return res;
            }
        };
        timer.observe_duration();

        res.write(&upstream_body);

        let is_err = serde_json::from_slice::<ErrorProbe>(&upstream_body)
            .map(|probe| probe.error.is_some())
            .unwrap_or(false);
        if is_err {
            debug!(method = %request.method, "skipping post-processors for error response");
        } else if let Some(handler) = &handler {
            if let Err(e) = self.run_after(handler, &upstream_body).await {
                error!(err = %e, method = %request.method, "request post-processing failed");
            }
        } else {
            debug!(method = %request.method, "no post-processor found");
        }

        res
    }

    /// Returns true when the reply was written and the upstream call must be
    /// skipped.
    async fn run_before(
        &self,
        handler: &MethodHandler,
        res: &mut BufferedResponse,
        request: &JsonRpcRequest,
    ) -> bool {
        match handler {
            MethodHandler::GetBlockByNumber => self.before_get_block_by_number(res, request).await,
            MethodHandler::GetTransactionReceipt => {
                self.before_get_transaction_receipt(res, request).await
            }
        }
    }

    async fn run_after(&self, handler: &MethodHandler, body: &[u8]) -> Result<(), ProxyError> {
        match handler {
            MethodHandler::GetBlockByNumber => self.after_get_block_by_number(body).await,
            MethodHandler::GetTransactionReceipt => self.after_get_transaction_receipt(body).await,
        }
    }

    async fn before_get_block_by_number(
        &self,
        res: &mut BufferedResponse,
        request: &JsonRpcRequest,
    ) -> bool {
        let Some(block_tag) = request.params.first().and_then(Value::as_str) else {
            debug!("invalid or missing block number param, bailing");
            return false;
        };
        let include_bodies = match request.params.get(1) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                debug!("invalid include bodies param, bailing");
                return false;
            }
        };

        let cache_key = block_cache_key(block_tag, include_bodies);
        self.serve_cached(res, request, &cache_key, "block").await
    }

    async fn before_get_transaction_receipt(
        &self,
        res: &mut BufferedResponse,
        request: &JsonRpcRequest,
    ) -> bool {
        let Some(tx_hash) = request.params.first().and_then(Value::as_str) else {
            debug!("invalid or missing tx hash param, bailing");
            return false;
        };

        let cache_key = txreceipt_cache_key(tx_hash);
        self.serve_cached(res, request, &cache_key, "txreceipt").await
    }

    /// Shared cache-hit path for before-hooks: on a warm key, write a reply
    /// echoing the request id with the cached raw result. Lookup errors are
    /// logged and treated as misses.
    async fn serve_cached(
        &self,
        res: &mut BufferedResponse,
        request: &JsonRpcRequest,
        cache_key: &str,
        cache: &str,
    ) -> bool {
        match self.cacher.get(cache_key).await {
            Ok(Some(cached)) => match result_response_bytes(&request.id, &cached) {
                Ok(reply) => {
                    metrics::CACHE_HITS.with_label_values(&[cache]).inc();
                    res.write(&reply);
                    debug!(%cache_key, "serving cached response");
                    true
                }
                Err(e) => {
                    error!(err = %e, %cache_key, "failed to write cached response");
                    false
                }
            },
            Ok(None) => {
                metrics::CACHE_MISSES.with_label_values(&[cache]).inc();
                debug!(%cache_key, "cache miss");
                false
            }
            Err(e) => {
                error!(err = %e, %cache_key, "cache lookup failed");
                false
            }
        }
    }

    async fn after_get_block_by_number(&self, body: &[u8]) -> Result<(), ProxyError> {
        let parsed: JsonRpcResponse = serde_json::from_slice(body)?;
        let result: Map<String, Value> = serde_json::from_str(parsed.result.get())
            .map_err(|_| ProxyError::UnexpectedResponse("failed to parse RPC result object"))?;

        let block_number = result
            .get("number")
            .and_then(Value::as_str)
            .ok_or(ProxyError::UnexpectedResponse("no block number in RPC result"))?;
        let transactions = result
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or(ProxyError::UnexpectedResponse("no transactions in RPC result"))?;

        // The caller's include-bodies flag is recovered from the shape of the
        // transactions array: hashes mean headers only, objects mean full
        // bodies.
        let include_bodies = match transactions.first() {
            None => false,
            Some(Value::String(_)) => false,
            Some(_) => true,
        };

        if !self.tracker.is_finalized_hex(block_number) {
            debug!(%block_number, "not caching un-finalized block");
            return Ok(());
        }

        let cache_key = block_cache_key(block_number, include_bodies);
        self.cacher
            .set_ex(&cache_key, parsed.result.get().as_bytes(), CACHE_TTL)
            .await?;
        debug!(%cache_key, size = parsed.result.get().len(), "stored block in cache");
        Ok(())
    }

    async fn after_get_transaction_receipt(&self, body: &[u8]) -> Result<(), ProxyError> {
        let parsed: JsonRpcResponse = serde_json::from_slice(body)?;
        let raw_result = parsed.result.get();
        if raw_result == "null" {
            // Transaction not yet mined.
            return Ok(());
        }

        let result: Map<String, Value> = serde_json::from_str(raw_result)
            .map_err(|_| ProxyError::UnexpectedResponse("failed to parse RPC result object"))?;

        let tx_hash = result
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or(ProxyError::UnexpectedResponse("no tx hash in RPC result"))?;
        let block_number = match result.get("blockNumber") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                debug!("skipping pending transaction");
                return Ok(());
            }
            Some(_) => {
                return Err(ProxyError::UnexpectedResponse(
                    "no block number in RPC result",
                ))
            }
        };

        if !self.tracker.is_finalized_hex(&block_number) {
            debug!(%block_number, "not caching un-finalized tx receipt");
            return Ok(());
        }

        let cache_key = txreceipt_cache_key(tx_hash);
        self.cacher
            .set_ex(&cache_key, raw_result.as_bytes(), CACHE_TTL)
            .await?;
        debug!(%cache_key, size = raw_result.len(), "stored tx receipt in cache");
        Ok(())
    }
}

fn fail_request(res: &mut BufferedResponse, id: &Value, code: i64, message: &str) {
    let reply = JsonRpcErrorResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: id.clone(),
        error: JsonRpcErrorData {
            code,
            message: message.to_string(),
        },
    };
    let out =
        serde_json::to_vec(&reply).unwrap_or_else(|_| INTERNAL_ERROR_BODY.as_bytes().to_vec());
    res.set_status(200);
    res.write(&out);
}

fn fail_with_internal_error(res: &mut BufferedResponse, id: &Value, message: &str) {
    fail_request(res, id, -32600, message);
}
