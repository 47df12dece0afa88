use std::env;
use std::path::PathBuf;

const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "gif", "webp", "tif", "tiff", "bmp", "txt", "csv", "xml", "json",
    "html", "htm", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "msg", "rtf", "zip", "7z", "rar",
    "gz", "wav", "mp3", "mp4", "avi", "bin",
];

const DEFAULT_INLINE_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "text/plain",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_dsn: String,
    pub root_path: PathBuf,
    pub max_upload_bytes: u64,
    pub upload_buffer_size: usize,
    pub first_chunk_size: usize,
    pub allowed_extensions: Vec<String>,
    pub inline_content_types: Vec<String>,
    pub default_buckets: Vec<String>,
    pub api_listen: String,
    pub log_level: String,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        let required = RequiredConfig::from_env()?;
        let upload = UploadConfig::from_env();
        let runtime = RuntimeConfig::from_env();
        let config = Self {
            postgres_dsn: required.postgres_dsn,
            root_path: required.root_path,
            max_upload_bytes: upload.max_upload_bytes,
            upload_buffer_size: upload.upload_buffer_size,
            first_chunk_size: upload.first_chunk_size,
            allowed_extensions: upload.allowed_extensions,
            inline_content_types: upload.inline_content_types,
            default_buckets: upload.default_buckets,
            api_listen: runtime.api_listen,
            log_level: runtime.log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.upload_buffer_size == 0 {
            return Err("DS_UPLOAD_BUFFER_SIZE must be greater than zero".into());
        }
        if self.first_chunk_size == 0 {
            return Err("DS_FIRST_CHUNK_SIZE must be greater than zero".into());
        }
        if self.max_upload_bytes < self.first_chunk_size as u64 {
            return Err("DS_MAX_UPLOAD_BYTES must be at least DS_FIRST_CHUNK_SIZE".into());
        }
        Ok(())
    }

    pub fn extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }

    pub fn content_type_inline(&self, content_type: &str) -> bool {
        self.inline_content_types
            .iter()
            .any(|inline| inline.eq_ignore_ascii_case(content_type))
    }
}

struct RequiredConfig {
    postgres_dsn: String,
    root_path: PathBuf,
}

impl RequiredConfig {
    fn from_env() -> Result<Self, String> {
        let root_raw = required_env("DS_ROOT_PATH", "DS_ROOT_PATH is required")?;
        if root_raw.trim().is_empty() {
            return Err("DS_ROOT_PATH must not be empty".into());
        }
        Ok(Self {
            postgres_dsn: required_env("DS_POSTGRES_DSN", "DS_POSTGRES_DSN is required")?,
            root_path: PathBuf::from(root_raw.trim()),
        })
    }
}

struct UploadConfig {
    max_upload_bytes: u64,
    upload_buffer_size: usize,
    first_chunk_size: usize,
    allowed_extensions: Vec<String>,
    inline_content_types: Vec<String>,
    default_buckets: Vec<String>,
}

impl UploadConfig {
    fn from_env() -> Self {
        Self {
            max_upload_bytes: parse_env("DS_MAX_UPLOAD_BYTES").unwrap_or(1024 * 1024 * 1024),
            upload_buffer_size: parse_env("DS_UPLOAD_BUFFER_SIZE").unwrap_or(64 * 1024),
            first_chunk_size: parse_env("DS_FIRST_CHUNK_SIZE").unwrap_or(64 * 1024),
            allowed_extensions: csv_or_defaults("DS_ALLOWED_EXTENSIONS", DEFAULT_ALLOWED_EXTENSIONS),
            inline_content_types: csv_or_defaults(
                "DS_INLINE_CONTENT_TYPES",
                DEFAULT_INLINE_CONTENT_TYPES,
            ),
            default_buckets: split_csv("DS_DEFAULT_BUCKETS"),
        }
    }
}

struct RuntimeConfig {
    api_listen: String,
    log_level: String,
}

impl RuntimeConfig {
    fn from_env() -> Self {
        Self {
            api_listen: normalize_listen_addr(env_or_default("DS_API_LISTEN", ":8080")),
            log_level: env_or_default("DS_LOG_LEVEL", "info"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source_dsn: String,
    pub content_dsn: String,
    pub log_dsn: String,
    pub target_url: String,
    pub year: i32,
    pub documents_table: String,
    pub content_table: String,
    pub target_bucket: String,
    pub batch_size: i64,
    pub max_parallelism: usize,
    pub max_retries: i32,
    pub worker_token: Option<i32>,
}

impl MigrationConfig {
    pub fn load() -> Result<Self, String> {
        let year: i32 = required_env("DS_MIGRATION_YEAR", "DS_MIGRATION_YEAR is required")?
            .trim()
            .parse()
            .map_err(|_| "DS_MIGRATION_YEAR must be a four-digit year".to_string())?;
        if !(1900..=2100).contains(&year) {
            return Err("DS_MIGRATION_YEAR must be between 1900 and 2100".into());
        }
        let config = Self {
            source_dsn: required_env(
                "DS_MIGRATION_SOURCE_DSN",
                "DS_MIGRATION_SOURCE_DSN is required",
            )?,
            content_dsn: required_env(
                "DS_MIGRATION_CONTENT_DSN",
                "DS_MIGRATION_CONTENT_DSN is required",
            )?,
            log_dsn: required_env("DS_MIGRATION_LOG_DSN", "DS_MIGRATION_LOG_DSN is required")?,
            target_url: required_env(
                "DS_MIGRATION_TARGET_URL",
                "DS_MIGRATION_TARGET_URL is required",
            )?,
            year,
            documents_table: env_or_default(
                "DS_MIGRATION_DOCUMENTS_TABLE",
                &format!("documents_{year}"),
            ),
            content_table: env_or_default("DS_MIGRATION_CONTENT_TABLE", "documents_content"),
            target_bucket: required_env(
                "DS_MIGRATION_TARGET_BUCKET",
                "DS_MIGRATION_TARGET_BUCKET is required",
            )?,
            batch_size: parse_env("DS_MIGRATION_BATCH_SIZE").unwrap_or(100),
            max_parallelism: parse_env("DS_MIGRATION_PARALLELISM").unwrap_or(4),
            max_retries: parse_env("DS_MIGRATION_MAX_RETRIES").unwrap_or(3),
            worker_token: parse_env("DS_MIGRATION_WORKER_TOKEN"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.batch_size < 1 {
            return Err("DS_MIGRATION_BATCH_SIZE must be at least 1".into());
        }
        if self.max_parallelism == 0 {
            return Err("DS_MIGRATION_PARALLELISM must be at least 1".into());
        }
        if self.max_retries < 0 {
            return Err("DS_MIGRATION_MAX_RETRIES must not be negative".into());
        }
        validate_table_name("DS_MIGRATION_DOCUMENTS_TABLE", &self.documents_table)?;
        validate_table_name("DS_MIGRATION_CONTENT_TABLE", &self.content_table)?;
        Ok(())
    }
}

// Table names are interpolated into query strings at construction time,
// so they must stay plain SQL identifiers.
fn validate_table_name(env_name: &str, table: &str) -> Result<(), String> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !table.starts_with(|ch: char| ch.is_ascii_digit());
    if !valid {
        return Err(format!("{env_name} must be a plain SQL identifier"));
    }
    Ok(())
}

fn required_env(key: &str, missing_message: &str) -> Result<String, String> {
    env::var(key).map_err(|_| missing_message.to_string())
}

fn env_or_default(key: &str, default_value: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_value.to_string())
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn split_csv(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

fn csv_or_defaults(key: &str, defaults: &[&str]) -> Vec<String> {
    let listed = split_csv(key);
    if listed.is_empty() {
        return defaults.iter().map(|entry| entry.to_string()).collect();
    }
    listed
}

fn normalize_listen_addr(value: String) -> String {
    if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::{
        csv_or_defaults, normalize_listen_addr, validate_table_name, Config, MigrationConfig,
    };
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        entries: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
            }
        }

        fn set(&mut self, key: &str, value: &str) {
            let prev = env::var(key).ok();
            self.entries.push((key.to_string(), prev));
            env::set_var(key, value);
        }

        fn clear(&mut self, key: &str) {
            let prev = env::var(key).ok();
            self.entries.push((key.to_string(), prev));
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.entries.drain(..).rev() {
                if let Some(val) = value {
                    env::set_var(&key, val);
                } else {
                    env::remove_var(&key);
                }
            }
        }
    }

    fn set_engine_required(guard: &mut EnvGuard) {
        guard.set("DS_POSTGRES_DSN", "postgres://ds:ds@localhost/ds");
        guard.set("DS_ROOT_PATH", "/tmp/ds-root");
    }

    fn set_migration_required(guard: &mut EnvGuard) {
        guard.set("DS_MIGRATION_SOURCE_DSN", "postgres://legacy/docs");
        guard.set("DS_MIGRATION_CONTENT_DSN", "postgres://legacy/content");
        guard.set("DS_MIGRATION_LOG_DSN", "postgres://ds/migration");
        guard.set("DS_MIGRATION_TARGET_URL", "http://localhost:8080");
        guard.set("DS_MIGRATION_YEAR", "2017");
        guard.set("DS_MIGRATION_TARGET_BUCKET", "legacy-documents");
        guard.clear("DS_MIGRATION_DOCUMENTS_TABLE");
        guard.clear("DS_MIGRATION_CONTENT_TABLE");
        guard.clear("DS_MIGRATION_WORKER_TOKEN");
        guard.clear("DS_MIGRATION_BATCH_SIZE");
        guard.clear("DS_MIGRATION_PARALLELISM");
        guard.clear("DS_MIGRATION_MAX_RETRIES");
    }

    #[test]
    fn load_uses_defaults_for_optional_settings() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        set_engine_required(&mut guard);
        guard.clear("DS_MAX_UPLOAD_BYTES");
        guard.clear("DS_UPLOAD_BUFFER_SIZE");
        guard.clear("DS_FIRST_CHUNK_SIZE");
        guard.clear("DS_ALLOWED_EXTENSIONS");
        guard.clear("DS_INLINE_CONTENT_TYPES");
        guard.clear("DS_DEFAULT_BUCKETS");
        guard.clear("DS_API_LISTEN");
        guard.clear("DS_LOG_LEVEL");

        let config = Config::load().expect("config");
        assert_eq!(config.max_upload_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.upload_buffer_size, 64 * 1024);
        assert_eq!(config.first_chunk_size, 64 * 1024);
        assert!(config.extension_allowed("pdf"));
        assert!(config.extension_allowed("PDF"));
        assert!(!config.extension_allowed("exe"));
        assert!(config.content_type_inline("application/pdf"));
        assert!(!config.content_type_inline("text/html"));
        assert!(config.default_buckets.is_empty());
        assert_eq!(config.api_listen, "0.0.0.0:8080");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn load_reports_missing_required_settings() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        guard.clear("DS_POSTGRES_DSN");
        guard.set("DS_ROOT_PATH", "/tmp/ds-root");
        let err = Config::load().unwrap_err();
        assert!(err.contains("DS_POSTGRES_DSN"));

        let mut guard2 = EnvGuard::new();
        set_engine_required(&mut guard2);
        guard2.set("DS_ROOT_PATH", "  ");
        let err = Config::load().unwrap_err();
        assert!(err.contains("DS_ROOT_PATH"));
    }

    #[test]
    fn load_rejects_inconsistent_sizes() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        set_engine_required(&mut guard);
        guard.set("DS_MAX_UPLOAD_BYTES", "1024");
        guard.set("DS_FIRST_CHUNK_SIZE", "65536");
        let err = Config::load().unwrap_err();
        assert!(err.contains("DS_MAX_UPLOAD_BYTES"));

        guard.set("DS_FIRST_CHUNK_SIZE", "0");
        let err = Config::load().unwrap_err();
        assert!(err.contains("DS_FIRST_CHUNK_SIZE"));
    }

    #[test]
    fn load_splits_configured_lists() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        set_engine_required(&mut guard);
        guard.set("DS_ALLOWED_EXTENSIONS", "pdf, txt ,png");
        guard.set("DS_DEFAULT_BUCKETS", "invoices,archive");
        guard.clear("DS_MAX_UPLOAD_BYTES");
        guard.clear("DS_FIRST_CHUNK_SIZE");
        let config = Config::load().expect("config");
        assert_eq!(config.allowed_extensions, vec!["pdf", "txt", "png"]);
        assert_eq!(config.default_buckets, vec!["invoices", "archive"]);
        assert!(!config.extension_allowed("zip"));
    }

    #[test]
    fn migration_config_defaults_and_overrides() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        set_migration_required(&mut guard);
        let config = MigrationConfig::load().expect("config");
        assert_eq!(config.documents_table, "documents_2017");
        assert_eq!(config.content_table, "documents_content");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_parallelism, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.worker_token, None);

        guard.set("DS_MIGRATION_WORKER_TOKEN", "2");
        guard.set("DS_MIGRATION_BATCH_SIZE", "250");
        let config = MigrationConfig::load().expect("config");
        assert_eq!(config.worker_token, Some(2));
        assert_eq!(config.batch_size, 250);
    }

    #[test]
    fn migration_config_rejects_bad_values() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        set_migration_required(&mut guard);
        guard.set("DS_MIGRATION_YEAR", "20xx");
        assert!(MigrationConfig::load().is_err());

        guard.set("DS_MIGRATION_YEAR", "1600");
        assert!(MigrationConfig::load().is_err());

        guard.set("DS_MIGRATION_YEAR", "2017");
        guard.set("DS_MIGRATION_BATCH_SIZE", "0");
        assert!(MigrationConfig::load().is_err());

        guard.clear("DS_MIGRATION_BATCH_SIZE");
        guard.set("DS_MIGRATION_DOCUMENTS_TABLE", "documents;drop");
        let err = MigrationConfig::load().unwrap_err();
        assert!(err.contains("DS_MIGRATION_DOCUMENTS_TABLE"));
    }

    #[test]
    fn validate_table_name_accepts_identifiers_only() {
        assert!(validate_table_name("X", "documents_2017").is_ok());
        assert!(validate_table_name("X", "DocumentsContent").is_ok());
        assert!(validate_table_name("X", "").is_err());
        assert!(validate_table_name("X", "2documents").is_err());
        assert!(validate_table_name("X", "docs-2017").is_err());
    }

    #[test]
    fn normalize_listen_addr_prefixes_bare_ports() {
        assert_eq!(normalize_listen_addr(":8080".into()), "0.0.0.0:8080");
        assert_eq!(
            normalize_listen_addr("127.0.0.1:9000".into()),
            "127.0.0.1:9000"
        );
    }

    #[test]
    fn csv_or_defaults_falls_back_when_unset() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let mut guard = EnvGuard::new();
        guard.clear("DS_TEST_CSV_DEFAULTS");
        let values = csv_or_defaults("DS_TEST_CSV_DEFAULTS", &["a", "b"]);
        assert_eq!(values, vec!["a", "b"]);
    }
}
