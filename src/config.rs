use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines `.env`, environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub app_version: String,
    pub debug: bool,
    pub allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageConfig,
}

/// Connection settings for the S3-compatible store. Read once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub use_ssl: bool,
    /// Upper bound for a single store operation; `None` disables the timeout.
    pub operation_timeout: Option<Duration>,
}

impl StorageConfig {
    /// Endpoint with a scheme. The TLS flag only applies when the configured
    /// endpoint has no scheme of its own.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else if self.use_ssl {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        }
    }
}

// Keeps the secret key out of startup logs.
impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("use_ssl", &self.use_ssl)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "HTTP API with S3-compatible object storage")]
pub struct Args {
    /// Host to bind to (overrides APP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides APP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// S3 endpoint URL (overrides S3_ENDPOINT_URL)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Bucket to provision and use (overrides S3_BUCKET_NAME)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse `.env`, environment variables and CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // A missing .env file is the normal case outside local development.
        let _ = dotenvy::dotenv();

        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values resolved through `lookup`, falling back to defaults.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let allowed_origins = var("ALLOWED_ORIGINS", "*")
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let operation_timeout = match lookup("S3_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(
                value
                    .parse::<u64>()
                    .with_context(|| format!("parsing S3_TIMEOUT_SECS value `{}`", value))?,
            )),
            None => None,
        };

        let storage = StorageConfig {
            endpoint: args
                .s3_endpoint
                .unwrap_or_else(|| var("S3_ENDPOINT_URL", "http://minio:9000")),
            access_key_id: var("S3_ACCESS_KEY_ID", "minioadmin"),
            secret_access_key: var("S3_SECRET_ACCESS_KEY", "minioadmin"),
            region: var("S3_REGION", "us-east-1"),
            bucket: args
                .s3_bucket
                .unwrap_or_else(|| var("S3_BUCKET_NAME", "default-bucket")),
            use_ssl: parse_var(&lookup, "S3_USE_SSL", false, parse_bool)?,
            operation_timeout,
        };

        Ok(Self {
            app_name: var("APP_NAME", "Storage API"),
            app_version: var("APP_VERSION", env!("CARGO_PKG_VERSION")),
            debug: parse_var(&lookup, "DEBUG", false, parse_bool)?,
            allowed_origins,
            host: args.host.unwrap_or_else(|| var("APP_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => parse_var(&lookup, "APP_PORT", 8000, u16::from_str)?,
            },
            database_url: args
                .database_url
                .unwrap_or_else(|| var("DATABASE_URL", "sqlite://./data/app.db")),
            storage,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T, P, E>(lookup: &F, name: &str, default: T, parse: P) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => parse(value.trim())
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected a boolean (true/false, 1/0, yes/no)")]
pub struct InvalidBool;

fn parse_bool(value: &str) -> Result<bool, InvalidBool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(InvalidBool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_match_local_minio_setup() {
        let cfg = AppConfig::from_sources(Args::default(), lookup_from(&[])).unwrap();

        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.allowed_origins, vec!["*".to_string()]);
        assert_eq!(cfg.storage.endpoint, "http://minio:9000");
        assert_eq!(cfg.storage.bucket, "default-bucket");
        assert_eq!(cfg.storage.region, "us-east-1");
        assert!(!cfg.storage.use_ssl);
        assert_eq!(cfg.storage.operation_timeout, None);
        assert!(!cfg.debug);
    }

    #[test]
    fn cli_args_override_environment() {
        let args = Args {
            port: Some(9100),
            s3_bucket: Some("from-cli".into()),
            ..Args::default()
        };
        let lookup = lookup_from(&[
            ("APP_PORT", "7000"),
            ("S3_BUCKET_NAME", "from-env"),
            ("S3_REGION", "eu-west-1"),
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
            ("S3_TIMEOUT_SECS", "15"),
            ("DEBUG", "yes"),
        ]);

        let cfg = AppConfig::from_sources(args, lookup).unwrap();

        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.storage.bucket, "from-cli");
        assert_eq!(cfg.storage.region, "eu-west-1");
        assert_eq!(cfg.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(cfg.storage.operation_timeout, Some(Duration::from_secs(15)));
        assert!(cfg.debug);
    }

    #[test]
    fn invalid_values_are_reported_with_variable_name() {
        let err = AppConfig::from_sources(Args::default(), lookup_from(&[("APP_PORT", "http")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("APP_PORT"));

        let err =
            AppConfig::from_sources(Args::default(), lookup_from(&[("S3_USE_SSL", "maybe")]))
                .unwrap_err();
        assert!(format!("{err:#}").contains("S3_USE_SSL"));
    }

    #[test]
    fn endpoint_scheme_follows_tls_flag_only_when_missing() {
        let mut storage = AppConfig::from_sources(Args::default(), lookup_from(&[]))
            .unwrap()
            .storage;

        storage.endpoint = "minio:9000/".into();
        assert_eq!(storage.endpoint_url(), "http://minio:9000");

        storage.use_ssl = true;
        assert_eq!(storage.endpoint_url(), "https://minio:9000");

        storage.endpoint = "http://localhost:9000".into();
        assert_eq!(storage.endpoint_url(), "http://localhost:9000");
    }

    #[test]
    fn debug_output_redacts_secret_key() {
        let storage = AppConfig::from_sources(
            Args::default(),
            lookup_from(&[("S3_SECRET_ACCESS_KEY", "super-secret")]),
        )
        .unwrap()
        .storage;

        let rendered = format!("{storage:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
