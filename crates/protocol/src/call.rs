use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VALIDATION_CODE: &str = "VALIDATION";

/// Outbound direct value set, `{k, v}` on every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSet {
    pub k: String,
    pub v: Value,
}

impl OutboundSet {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            k: key.into(),
            v: value,
        }
    }
}

/// Body of `POST /call/<qualified>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub args: Vec<Value>,
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Violation {
    /// Full parameter path as reported by the server, e.g. `register.form.name`.
    #[serde(default)]
    pub param: String,
    /// Field path relative to the argument, e.g. `form.name`.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub constraint: String,
}

impl Violation {
    /// The control name this violation decorates.
    pub fn field(&self) -> &str {
        if !self.path.is_empty() {
            return &self.path;
        }
        self.param.rsplit('.').next().unwrap_or(&self.param)
    }
}

/// Normalized outcome of an RPC call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallResult {
    pub ok: bool,
    pub status: u16,
    pub code: Option<String>,
    pub error: Option<String>,
    pub violations: Vec<Violation>,
    pub payload: Value,
}

impl CallResult {
    /// Build from an HTTP status and a decoded body. Non-2xx is a failure
    /// regardless of what the body claims.
    pub fn from_response(status: u16, body: Value) -> Self {
        let status_ok = (200..300).contains(&status);
        let Value::Object(obj) = &body else {
            return Self {
                ok: status_ok,
                status,
                error: (!status_ok).then(|| format!("HTTP {status}")),
                payload: body,
                ..Self::default()
            };
        };

        let claimed_ok = obj.get("ok").and_then(Value::as_bool);
        let code = obj.get("code").and_then(Value::as_str).map(str::to_string);
        let error = obj
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| (!status_ok).then(|| format!("HTTP {status}")));
        let violations = obj
            .get("violations")
            .and_then(|v| serde_json::from_value::<Vec<Violation>>(v.clone()).ok())
            .unwrap_or_default();
        let payload = match claimed_ok {
            Some(_) => obj.get("result").cloned().unwrap_or(Value::Null),
            None => body.clone(),
        };

        Self {
            ok: status_ok && claimed_ok.unwrap_or(true),
            status,
            code,
            error,
            violations,
            payload,
        }
    }

    /// Network-level failure: nothing came back.
    pub fn network_failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: 0,
            code: Some("NETWORK".to_string()),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_validation(&self) -> bool {
        self.code.as_deref() == Some(VALIDATION_CODE) && !self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn success_envelope_exposes_result_as_payload() {
        let result = CallResult::from_response(200, json!({"ok": true, "result": [1, 2]}));
        assert!(result.ok);
        assert_eq!(result.payload, json!([1, 2]));
    }

    #[test]
    fn arbitrary_payload_is_success() {
        let result = CallResult::from_response(200, json!({"total": 3}));
        assert!(result.ok);
        assert_eq!(result.payload, json!({"total": 3}));
    }

    #[test]
    fn non_2xx_fails_even_when_body_claims_ok() {
        let result = CallResult::from_response(500, json!({"ok": true}));
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn validation_envelope() {
        let result = CallResult::from_response(
            200,
            json!({
                "ok": false,
                "code": "VALIDATION",
                "error": "must not be blank",
                "violations": [
                    {"param": "register.form.name", "path": "form.name", "message": "must not be blank", "constraint": "NotBlank"}
                ]
            }),
        );
        assert!(!result.ok);
        assert!(result.is_validation());
        assert_eq!(result.violations[0].field(), "form.name");
    }

    #[test]
    fn violation_field_falls_back_to_param_tail() {
        let violation = Violation {
            param: "signup.email".into(),
            ..Violation::default()
        };
        assert_eq!(violation.field(), "email");
    }
}
