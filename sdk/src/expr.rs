//! Expression evaluation for configuration values
//!
//! String values may embed `${env("NAME")}` and `${secret("path", "field")}`.
//! Every occurrence is replaced by its value. `env()` is always available;
//! `secret()` needs a control-plane client bound with
//! [`ExprContext::bind_control_plane`], which is only possible once the
//! control-plane address and token have been decoded.

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::{Arc, OnceLock};

use crate::control_plane::ControlPlane;
use crate::errors::{InstallerError, Result};

static CALL_PATTERN: OnceLock<Regex> = OnceLock::new();
static STRING_ARG_PATTERN: OnceLock<Regex> = OnceLock::new();

fn call_pattern() -> &'static Regex {
    CALL_PATTERN.get_or_init(|| {
        // Quoted arguments may contain `)`
        Regex::new(r#"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(((?:[^)"]|"(?:[^"\\]|\\.)*")*)\)\s*\}"#)
            .expect("Invalid expression pattern")
    })
}

fn string_arg_pattern() -> &'static Regex {
    STRING_ARG_PATTERN
        .get_or_init(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("Invalid argument pattern"))
}

/// Evaluation context for configuration expressions
#[derive(Clone, Default)]
pub struct ExprContext {
    control_plane: Option<Arc<dyn ControlPlane>>,
}

impl std::fmt::Debug for ExprContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprContext")
            .field("secret_bound", &self.is_bound())
            .finish()
    }
}

impl ExprContext {
    /// Create a context where only `env()` is available
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `secret()` available by binding a control-plane client
    pub fn bind_control_plane(&mut self, control_plane: Arc<dyn ControlPlane>) {
        self.control_plane = Some(control_plane);
    }

    pub fn is_bound(&self) -> bool {
        self.control_plane.is_some()
    }

    /// Replace every expression in `input` with its value
    pub async fn evaluate_str(&self, input: &str) -> Result<String> {
        let opened = input.matches("${").count();
        let calls: Vec<_> = call_pattern().captures_iter(input).collect();
        if opened != calls.len() {
            return Err(InstallerError::InvalidExpression(input.to_string()));
        }
        if calls.is_empty() {
            return Ok(input.to_string());
        }

        let mut output = String::with_capacity(input.len());
        let mut last = 0;
        for caps in calls {
            let (Some(whole), Some(name), Some(args)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let args = parse_args(args.as_str())
                .ok_or_else(|| InstallerError::InvalidExpression(whole.as_str().to_string()))?;

            output.push_str(&input[last..whole.start()]);
            output.push_str(&self.call(name.as_str(), &args, whole.as_str()).await?);
            last = whole.end();
        }
        output.push_str(&input[last..]);
        Ok(output)
    }

    /// Evaluate every string inside a TOML value tree
    pub fn evaluate_value(&self, value: toml::Value) -> BoxFuture<'_, Result<toml::Value>> {
        async move {
            Ok(match value {
                toml::Value::String(s) => toml::Value::String(self.evaluate_str(&s).await?),
                toml::Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.evaluate_value(item).await?);
                    }
                    toml::Value::Array(out)
                }
                toml::Value::Table(table) => {
                    let mut out = toml::Table::new();
                    for (key, item) in table {
                        out.insert(key, self.evaluate_value(item).await?);
                    }
                    toml::Value::Table(out)
                }
                other => other,
            })
        }
        .boxed()
    }

    /// Evaluate a value tree and deserialize it into `T`
    pub async fn decode<T: DeserializeOwned>(&self, value: toml::Value) -> Result<T> {
        let evaluated = self.evaluate_value(value).await?;
        evaluated
            .try_into()
            .map_err(|e: toml::de::Error| InstallerError::InvalidConfig(e.message().to_string()))
    }

    async fn call(&self, name: &str, args: &[String], source: &str) -> Result<String> {
        match (name, args) {
            ("env", [var]) => lookup_env(var),
            ("secret", [path, field]) => {
                let control_plane = self
                    .control_plane
                    .as_ref()
                    .ok_or_else(|| InstallerError::ExpressionUnbound("secret".to_string()))?;
                lookup_secret(control_plane.as_ref(), path, field).await
            }
            ("env", _) | ("secret", _) => Err(InstallerError::InvalidExpression(format!(
                "wrong number of arguments in {}",
                source
            ))),
            _ => Err(InstallerError::InvalidExpression(format!(
                "unknown function '{}' in {}",
                name, source
            ))),
        }
    }
}

fn lookup_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(InstallerError::EnvVarMissing(name.to_string())),
    }
}

async fn lookup_secret(control_plane: &dyn ControlPlane, path: &str, field: &str) -> Result<String> {
    let data = control_plane.read_path(path).await?;

    // Versioned key/value stores nest the payload one level down.
    let value = data.get(field).or_else(|| {
        data.get("data")
            .and_then(JsonValue::as_object)
            .and_then(|inner| inner.get(field))
    });

    match value {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Null) | None => Err(InstallerError::SecretFieldMissing {
            path: path.to_string(),
            field: field.to_string(),
        }),
        Some(other) => Ok(other.to_string()),
    }
}

/// Parse a comma separated list of double-quoted strings
fn parse_args(raw: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut rest = String::new();
    let mut last = 0;
    for caps in string_arg_pattern().captures_iter(raw) {
        let whole = caps.get(0)?;
        rest.push_str(&raw[last..whole.start()]);
        last = whole.end();
        args.push(unescape(caps.get(1)?.as_str()));
    }
    rest.push_str(&raw[last..]);

    let separators = rest.chars().filter(|c| *c == ',').count();
    let only_separators = rest.chars().all(|c| c == ',' || c.is_whitespace());
    let expected = args.len().saturating_sub(1);
    (only_separators && separators == expected).then_some(args)
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\\\", "\\")
}
