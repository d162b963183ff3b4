use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub data_dir: String,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub push_api_url: String,
    pub push_api_key: String,
    pub audit_bus_url: String,
    pub grant_expires_secs: u64,
    pub transaction_ttl_secs: i64,
    pub sweep_interval_ms: u64,
}

pub fn load_config(config_file: &str) -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("listen_addr", "0.0.0.0:8087")?
        .set_default("data_dir", "data/importer")?
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/importer.log")?
        .set_default("s3_bucket", "invoices")?
        .set_default("s3_region", "us-east-1")?
        .set_default("s3_endpoint", "http://localhost:9000")?
        .set_default("s3_access_key", "minioadmin")?
        .set_default("s3_secret_key", "minioadmin")?
        .set_default("push_api_url", "http://localhost:8000/api")?
        .set_default("push_api_key", "")?
        .set_default("audit_bus_url", "http://localhost:4010/audit")?
        .set_default("grant_expires_secs", 300)?
        .set_default("transaction_ttl_secs", 120)?
        .set_default("sweep_interval_ms", 1000)?
        // Add configuration from a file
        .add_source(File::with_name(config_file).required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    s.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_without_file() {
        let config = load_config("config/does_not_exist.yaml").unwrap();

        assert_eq!(config.grant_expires_secs, 300);
        assert_eq!(config.transaction_ttl_secs, 120);
        assert_eq!(config.log_level, "info");
    }
}
