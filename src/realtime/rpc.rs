//! Wire codec for `RPCRequest`/`RPCResponse`, reflection-free JSON framing.
//! `RPCResponse` is built field-by-field in a fixed order, `h`, `b`, `c`,
//! `e`, `n`, `l`, `p`, `s`, rather than via `serde_json::to_string` on a
//! struct, so a hand-written incremental parser on the other end could
//! skip straight to the body bytes using `h` without tokenizing the rest of
//! the frame.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::client::write_queue::{ErrorObject, LazySuccess, ResponseEntry};
use crate::RtError;

/// Client → server frame: `{"a", "b"?, "c"?, "d"?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RPCRequest {
    pub a: String,
    #[serde(default)]
    pub b: Option<Value>,
    #[serde(default)]
    pub c: Option<u64>,
    #[serde(default)]
    pub d: Option<Uuid>,
}

pub fn decode_request(text: &str) -> Result<RPCRequest, RtError> {
    serde_json::from_str(text).map_err(|err| RtError::Validation(format!("malformed rpc request: {err}")))
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).expect("&str always serializes")
}

fn encode_error_object(err: &ErrorObject) -> String {
    let mut out = String::with_capacity(32);
    out.push('{');
    out.push_str("\"message\":");
    out.push_str(&json_string(&err.message));
    if let Some(code) = &err.code {
        out.push_str(",\"code\":");
        out.push_str(&json_string(code));
    }
    out.push('}');
    out
}

fn encode_lazy_success(ls: &LazySuccess) -> String {
    let mut out = String::with_capacity(24);
    out.push('{');
    out.push_str("\"c\":");
    out.push_str(&ls.callback_id.to_string());
    if let Some(latency) = &ls.latency_ms {
        out.push_str(",\"l\":");
        out.push_str(&json_string(latency));
    }
    out.push('}');
    out
}

/// Encode one resolved response frame, threading in any lazy-success
/// responses coalesced since the last non-lazy frame (the `s` field).
/// Field order is fixed: `h, b, c, e, n, l, p, s`.
pub fn encode_response(resp: &ResponseEntry, lazy: &[LazySuccess]) -> String {
    let body_json = resp.body.as_ref().map(|b| serde_json::to_string(b).expect("body always serializes"));
    let body_len = body_json.as_ref().map(|s| s.len()).unwrap_or(0);

    let mut out = String::with_capacity(128);
    out.push('{');
    out.push_str("\"h\":");
    out.push_str(&body_len.to_string());

    if let Some(body) = &body_json {
        out.push_str(",\"b\":");
        out.push_str(body);
    }
    if let Some(callback_id) = resp.callback_id {
        out.push_str(",\"c\":");
        out.push_str(&callback_id.to_string());
    }
    if let Some(err) = &resp.error {
        out.push_str(",\"e\":");
        out.push_str(&encode_error_object(err));
    }
    if let Some(name) = &resp.event_name {
        out.push_str(",\"n\":");
        out.push_str(&json_string(name));
    }
    if let Some(latency) = &resp.latency_ms {
        out.push_str(",\"l\":");
        out.push_str(&json_string(latency));
    }
    if let Some(processed_by) = &resp.processed_by {
        out.push_str(",\"p\":");
        out.push_str(&json_string(processed_by));
    }
    if !lazy.is_empty() {
        out.push_str(",\"s\":[");
        for (i, ls) in lazy.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&encode_lazy_success(ls));
        }
        out.push(']');
    }
    out.push('}');
    out
}

/// Room-broadcast framing: same codec, no lazy-success buffer to thread
/// through since a broadcast frame isn't a drained RPC response.
pub fn encode_broadcast(frame: &ResponseEntry) -> String {
    encode_response(frame, &[])
}

/// Build the one-shot `connectionRejected` event (`BadWsBootstrapBlob`,
/// `Retry`) sent immediately before the socket closes.
pub fn rejection_response(reason: &str) -> ResponseEntry {
    ResponseEntry {
        callback_id: None,
        body: Some(serde_json::json!({ "reason": reason })),
        error: None,
        event_name: Some("connectionRejected".into()),
        latency_ms: None,
        processed_by: None,
        close_after: true,
    }
}

/// Shape a caught `RtError` into the response for its originating callback.
/// Non-fatal errors are echoed as `{e: {message, code}}` on the same
/// callback; fatal errors additionally set a close-after-flush flag.
pub fn error_response(callback_id: Option<u64>, err: &RtError, processed_by: Option<String>) -> ResponseEntry {
    ResponseEntry {
        callback_id,
        body: None,
        error: Some(ErrorObject { message: err.client_message(), code: Some(err.code().to_string()) }),
        event_name: None,
        latency_ms: None,
        processed_by,
        close_after: err.is_fatal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_order_is_h_b_c_e_n_l_p_s() {
        let resp = ResponseEntry {
            callback_id: Some(7),
            body: Some(serde_json::json!({"x": 1})),
            error: Some(ErrorObject { message: "bad".into(), code: Some("validation".into()) }),
            event_name: Some("otUpdateApplied".into()),
            latency_ms: Some("3".into()),
            processed_by: Some("instance-1".into()),
            close_after: false,
        };
        let lazy = vec![LazySuccess { callback_id: 1, latency_ms: None }];
        let wire = encode_response(&resp, &lazy);

        let h_pos = wire.find("\"h\":").unwrap();
        let b_pos = wire.find("\"b\":").unwrap();
        let c_pos = wire.find("\"c\":").unwrap();
        let e_pos = wire.find("\"e\":").unwrap();
        let n_pos = wire.find("\"n\":").unwrap();
        let l_pos = wire.find("\"l\":").unwrap();
        let p_pos = wire.find("\"p\":").unwrap();
        let s_pos = wire.find("\"s\":").unwrap();
        assert!(h_pos < b_pos && b_pos < c_pos && c_pos < e_pos && e_pos < n_pos && n_pos < l_pos && l_pos < p_pos && p_pos < s_pos);

        let parsed: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed["h"], serde_json::json!({"x": 1}).to_string().len());
    }

    #[test]
    fn minimal_response_omits_absent_fields() {
        let resp = ResponseEntry {
            callback_id: Some(1),
            body: None,
            error: None,
            event_name: None,
            latency_ms: None,
            processed_by: None,
            close_after: false,
        };
        let wire = encode_response(&resp, &[]);
        assert_eq!(wire, r#"{"h":0,"c":1}"#);
    }

    #[test]
    fn decodes_apply_update_request() {
        let text = r#"{"a":"applyUpdate","b":{"k":1},"c":9,"d":"00000000-0000-0000-0000-000000000001"}"#;
        let req = decode_request(text).unwrap();
        assert_eq!(req.a, "applyUpdate");
        assert_eq!(req.c, Some(9));
        assert!(req.d.is_some());
    }

    #[test]
    fn rejection_response_closes_after() {
        let resp = rejection_response("BadWsBootstrapBlob");
        assert!(resp.close_after);
        assert_eq!(resp.event_name.as_deref(), Some("connectionRejected"));
        let wire = encode_response(&resp, &[]);
        assert!(wire.contains("BadWsBootstrapBlob"));
    }
}
