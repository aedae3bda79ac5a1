//! Server information as shown on the status panel.

use serde_json::Value;

use crate::config::DisplayConfig;

/// One snapshot of the managed server, built per query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub executable: String,
    /// Address label from configuration; the API does not report it.
    pub ip: String,
    /// Type label from configuration.
    pub kind: String,
}

impl ServerInfo {
    /// Extract the panel fields from a `GET /api/v2/servers/{id}` body.
    ///
    /// Returns `None` when the body has no `data` object.
    pub fn from_response(body: &Value, display: &DisplayConfig) -> Option<Self> {
        let data = body.get("data")?.as_object()?;
        let text = |key: &str, default: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        Some(Self {
            name: text("server_name", "Unknown Server"),
            executable: text("executable", "Unknown"),
            ip: display.server_url.clone(),
            kind: display.server_type.clone(),
        })
    }

    pub fn version(&self) -> String {
        version_from_executable(&self.executable)
    }
}

/// `paper-1.20.1.jar` → `1.20.1`; no hyphen → `Unknown`.
pub fn version_from_executable(executable: &str) -> String {
    match executable.rsplit_once('-') {
        Some((_, tail)) => tail.strip_suffix(".jar").unwrap_or(tail).to_string(),
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn display() -> DisplayConfig {
        DisplayConfig {
            server_url: "play.example.net".into(),
            server_type: "Paper".into(),
        }
    }

    #[test]
    fn version_after_last_hyphen() {
        assert_eq!(version_from_executable("server-1.20.1.jar"), "1.20.1");
        assert_eq!(version_from_executable("paper-mc-1.21"), "1.21");
    }

    #[test]
    fn version_unknown_without_hyphen() {
        assert_eq!(version_from_executable("server.jar"), "Unknown");
        assert_eq!(version_from_executable(""), "Unknown");
    }

    #[test]
    fn version_only_strips_trailing_jar() {
        assert_eq!(version_from_executable("x-1.jar.jar"), "1.jar");
    }

    #[test]
    fn from_response_reads_data_fields() {
        let body = json!({
            "status": "ok",
            "data": { "server_name": "Survival", "executable": "paper-1.20.4.jar" }
        });
        let info = ServerInfo::from_response(&body, &display()).expect("has data");
        assert_eq!(info.name, "Survival");
        assert_eq!(info.version(), "1.20.4");
        assert_eq!(info.ip, "play.example.net");
        assert_eq!(info.kind, "Paper");
    }

    #[test]
    fn from_response_defaults_missing_fields() {
        let info = ServerInfo::from_response(&json!({ "data": {} }), &display()).unwrap();
        assert_eq!(info.name, "Unknown Server");
        assert_eq!(info.executable, "Unknown");
        assert_eq!(info.version(), "Unknown");
    }

    #[test]
    fn from_response_requires_data_object() {
        assert!(ServerInfo::from_response(&json!({ "status": "ok" }), &display()).is_none());
        assert!(ServerInfo::from_response(&json!({ "data": null }), &display()).is_none());
    }
}
