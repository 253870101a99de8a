//! Error normalization
//!
//! Collaborators report failures as HTTP statuses, transport errors or free
//! text from a remote shell. The pipeline branches on error kinds, so every
//! adapter funnels its raw signals through the functions here.
//!
//! | Signal                                   | Error                |
//! |------------------------------------------|----------------------|
//! | 403                                      | `Unauthorized`       |
//! | 404                                      | `NotFound`           |
//! | 503                                      | `ServiceUnavailable` |
//! | 400 + "path is already in use"           | `MountPathInUse`     |
//! | 400 + "missing client token"             | `Unauthorized`       |
//! | "HTTP response to HTTPS client"          | `TlsMismatch`        |
//! | connect / DNS / refused                  | `InvalidAddress`     |
//! | "Text file busy"                         | `FileBusy`           |
//! | "Permission denied"                      | `PermissionDenied`   |
//! | "No such file or directory"              | `NotFound`           |
//!
//! Anything else passes through with the collaborator's message unchanged.

use sdk::errors::InstallerError;
use serde_json::Value;

const PATH_IN_USE: &str = "path is already in use";
const MISSING_TOKEN: &str = "missing client token";

// Go clients and servers phrase the scheme mismatch differently.
const TLS_MISMATCH_MARKERS: [&str; 3] = [
    "HTTP response to HTTPS client",
    "Client sent an HTTP request to an HTTPS server",
    "InvalidContentType",
];

const FILE_BUSY: &str = "Text file busy";
const PERMISSION_DENIED: &str = "Permission denied";
const NO_SUCH_FILE: &str = "No such file or directory";

/// Normalize a non-success control-plane response
///
/// `path` names the request target and is used for `MountPathInUse`.
pub fn from_status(status: u16, body: &str, path: &str) -> InstallerError {
    let message = response_message(body);

    if let Some(tls) = tls_mismatch(&message) {
        return tls;
    }

    match status {
        403 => InstallerError::Unauthorized(message),
        404 => InstallerError::NotFound(if message.is_empty() {
            path.to_string()
        } else {
            message
        }),
        503 => InstallerError::ServiceUnavailable(message),
        400 if message.contains(PATH_IN_USE) => InstallerError::MountPathInUse {
            path: path.to_string(),
            existing: String::from("unknown"),
        },
        400 if message.contains(MISSING_TOKEN) => InstallerError::Unauthorized(message),
        _ => InstallerError::ControlPlane {
            status: Some(status),
            message,
        },
    }
}

/// Normalize a transport failure from the HTTP client
pub fn from_transport(err: &reqwest::Error) -> InstallerError {
    let message = error_chain(err);

    if let Some(tls) = tls_mismatch(&message) {
        return tls;
    }

    if err.is_connect() || err.is_builder() || is_resolution_failure(&message) {
        return InstallerError::InvalidAddress(message);
    }

    InstallerError::ControlPlane {
        status: err.status().map(|s| s.as_u16()),
        message,
    }
}

/// Normalize stderr output of a failed remote command
pub fn from_remote(stderr: &str) -> InstallerError {
    let message = stderr.trim().to_string();

    if message.contains(FILE_BUSY) {
        InstallerError::FileBusy(message)
    } else if message.contains(PERMISSION_DENIED) {
        InstallerError::PermissionDenied(message)
    } else if message.contains(NO_SUCH_FILE) {
        InstallerError::NotFound(message)
    } else {
        InstallerError::Remote(message)
    }
}

fn tls_mismatch(message: &str) -> Option<InstallerError> {
    TLS_MISMATCH_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
        .then(|| InstallerError::TlsMismatch(message.to_string()))
}

fn is_resolution_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("connection refused")
}

/// Extract `{"errors": [...]}` messages, falling back to the raw body
fn response_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => match json.get("errors").and_then(Value::as_array) {
            Some(errors) => errors
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            None => body.trim().to_string(),
        },
        Err(_) => body.trim().to_string(),
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = inner.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(msg: &str) -> String {
        serde_json::json!({ "errors": [msg] }).to_string()
    }

    #[test]
    fn test_status_table() {
        assert!(matches!(
            from_status(403, &errors("permission denied"), "sys/mounts/pki"),
            InstallerError::Unauthorized(m) if m == "permission denied"
        ));
        assert!(matches!(
            from_status(404, "", "sys/plugins/catalog/secret/x"),
            InstallerError::NotFound(m) if m == "sys/plugins/catalog/secret/x"
        ));
        assert!(matches!(
            from_status(503, &errors("Vault is sealed"), "sys/mounts"),
            InstallerError::ServiceUnavailable(_)
        ));
        assert_eq!(
            from_status(
                400,
                &errors("path is already in use at pki/"),
                "pki"
            ),
            InstallerError::MountPathInUse {
                path: "pki".into(),
                existing: "unknown".into()
            }
        );
        assert!(matches!(
            from_status(400, &errors("missing client token"), "sys/mounts"),
            InstallerError::Unauthorized(_)
        ));
    }

    #[test]
    fn test_unrecognized_status_passes_through() {
        assert_eq!(
            from_status(500, &errors("internal error"), "x"),
            InstallerError::ControlPlane {
                status: Some(500),
                message: "internal error".into()
            }
        );
        assert_eq!(
            from_status(400, "plain text body\n", "x"),
            InstallerError::ControlPlane {
                status: Some(400),
                message: "plain text body".into()
            }
        );
    }

    #[test]
    fn test_tls_mismatch_in_body() {
        assert!(matches!(
            from_status(400, "Client sent an HTTP request to an HTTPS server.", "x"),
            InstallerError::TlsMismatch(_)
        ));
    }

    #[test]
    fn test_remote_signals() {
        assert!(matches!(
            from_remote("cat: /etc/vault/plugins/x: Text file busy\n"),
            InstallerError::FileBusy(_)
        ));
        assert!(matches!(
            from_remote("bash: /opt/x: Permission denied"),
            InstallerError::PermissionDenied(_)
        ));
        assert!(matches!(
            from_remote("cat: /nope/x: No such file or directory"),
            InstallerError::NotFound(_)
        ));
        assert_eq!(
            from_remote(" disk quota exceeded "),
            InstallerError::Remote("disk quota exceeded".into())
        );
    }
}
