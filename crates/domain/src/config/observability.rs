use serde::{Deserialize, Serialize};

/// Output shape of the process log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    #[default]
    Json,
    /// Human-readable single-line output.
    Compact,
}

/// Logging and trace export for the `serve` command.
///
/// Routing decisions, upstream calls and stream relays are emitted as
/// `tracing` spans; with `otlp_endpoint` set they are also exported over
/// OTLP/gRPC under `service_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Fraction of traces exported, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: d_log_filter(),
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_log_filter() -> String {
    "info,mg_gateway=debug,mg_providers=debug".into()
}

fn d_service_name() -> String {
    "modelgate".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_log_json_without_export() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.log_filter.contains("mg_providers=debug"));
        assert!(cfg.otlp_endpoint.is_none());
        assert_eq!(cfg.service_name, "modelgate");
    }

    #[test]
    fn compact_logs_and_export_parse() {
        let cfg: ObservabilityConfig = toml::from_str(
            r#"
            log_format = "compact"
            otlp_endpoint = "http://localhost:4317"
            sample_rate = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_format, LogFormat::Compact);
        assert_eq!(cfg.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
        assert!((cfg.sample_rate - 0.1).abs() < f64::EPSILON);
    }
}
