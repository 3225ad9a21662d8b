use crate::error::ServiceError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::labels::LabelNormalizer;
use crate::model::CallerIdentity;
use crate::scope::{resolve_scope, ResourceKind};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ServiceError> for HandlerErr {
    fn from(e: ServiceError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: None,
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        ServiceError::from(e).into()
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

/// Everything a handler needs for one request.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub caller: CallerIdentity,
    pub normalize: LabelNormalizer,
}

impl Ctx<'_> {
    pub fn label(&self, raw: &str) -> String {
        (self.normalize)(raw).canonical
    }

    /// Admins and grade leaders: full scope over owned records.
    pub fn is_manager(&self) -> bool {
        resolve_scope(&self.caller, ResourceKind::Exam).is_full()
    }

    pub fn require_manager(&self, action: &str) -> Result<(), HandlerErr> {
        if self.is_manager() {
            return Ok(());
        }
        warn!(caller = %self.caller.id, role = %self.caller.role, action, "role check failed");
        Err(ServiceError::forbidden(format!(
            "only admins and grade leaders may {}",
            action
        ))
        .into())
    }
}

/// Resolves the workspace and caller, runs `f`, and wraps the outcome in the
/// response envelope.
pub fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Ctx<'_>, &serde_json::Value) -> HandlerResult,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(caller) = req.caller.as_ref() else {
        return err(&req.id, "bad_params", "missing caller", None);
    };
    let normalize = state.normalize;
    let mut caller = caller.clone();
    caller.class_names = caller
        .class_names
        .iter()
        .map(|c| normalize(c).canonical)
        .collect();

    let ctx = Ctx {
        conn,
        caller,
        normalize,
    };
    match f(&ctx, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn to_result<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "serialize_failed",
        message: e.to_string(),
        details: None,
    })
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match optional_str(params, key)? {
        Some(v) => Ok(v),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

/// Trimmed string; absent, null and blank all read as `None`.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn optional_str_list(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Vec<String>>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an array", key))),
    }
}

/// `YYYY-MM-DD`, returned in canonical form.
pub fn parse_date(key: &str, raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            HandlerErr::bad_params(format!("{} must be a date (YYYY-MM-DD)", key))
                .with_details(json!({ "value": raw }))
        })
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = required_str(params, key)?;
    parse_date(key, &raw)
}

pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match optional_str(params, key)? {
        Some(raw) => parse_date(key, &raw).map(Some),
        None => Ok(None),
    }
}

/// Maps a UNIQUE violation to `bad_params` with the given message.
pub fn unique_violation(e: rusqlite::Error, message: &str) -> HandlerErr {
    match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::bad_params(message)
        }
        other => HandlerErr {
            code: "db_insert_failed",
            message: other.to_string(),
            details: None,
        },
    }
}
