const SERVER_USAGE: &str = "\
docstore — disk-backed blob storage service

USAGE:
    docstore [OPTIONS]

OPTIONS:
    -h, --help           Print this help message and exit
    -v, --version        Print version and exit
        --migrate-only   Run catalog migrations and exit

REQUIRED ENVIRONMENT VARIABLES:
    DS_POSTGRES_DSN            PostgreSQL connection string for the catalog
    DS_ROOT_PATH               Root directory for blob storage

STORAGE:
    DS_MAX_UPLOAD_BYTES        Maximum accepted object size   [1073741824]
    DS_UPLOAD_BUFFER_SIZE      Streaming copy buffer size     [65536]
    DS_FIRST_CHUNK_SIZE        Bytes buffered for detection   [65536]
    DS_ALLOWED_EXTENSIONS      Comma list; others stored as bin [built-in list]
    DS_INLINE_CONTENT_TYPES    Comma list served inline       [built-in list]
    DS_DEFAULT_BUCKETS         Buckets ensured at startup

OTHER:
    DS_API_LISTEN              HTTP listen address            [:8080]
    DS_LOG_LEVEL               Log level                      [info]
    DS_MIGRATIONS_DIR          Override catalog migrations directory
";

const MIGRATOR_USAGE: &str = "\
docstore-migrator — bulk migration worker for legacy document stores

USAGE:
    docstore-migrator [OPTIONS]

OPTIONS:
    -h, --help           Print this help message and exit
    -v, --version        Print version and exit

REQUIRED ENVIRONMENT VARIABLES:
    DS_MIGRATION_SOURCE_DSN    Legacy document metadata database
    DS_MIGRATION_CONTENT_DSN   Legacy per-year content database
    DS_MIGRATION_LOG_DSN       Database holding the migration log
    DS_MIGRATION_TARGET_URL    Base URL of the docstore API
    DS_MIGRATION_TARGET_BUCKET Bucket receiving migrated objects
    DS_MIGRATION_YEAR          Source year being migrated

TUNING:
    DS_MIGRATION_DOCUMENTS_TABLE  Metadata table        [documents_{year}]
    DS_MIGRATION_CONTENT_TABLE    Content table         [documents_content]
    DS_MIGRATION_BATCH_SIZE       Rows per batch        [100]
    DS_MIGRATION_PARALLELISM      In-flight transfers   [4]
    DS_MIGRATION_MAX_RETRIES      Retry budget per row  [3]
    DS_MIGRATION_WORKER_TOKEN     Shard key for this worker (optional)
";

pub fn print_server_usage() {
    print!("{SERVER_USAGE}");
}

pub fn print_migrator_usage() {
    print!("{MIGRATOR_USAGE}");
}

pub fn print_version(binary: &str, version: &str) {
    println!("{binary} {version}");
}

fn handle_cli_flags_from_args(args: &[String], binary: &str, version: &str, usage: &str) -> bool {
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{usage}");
                return true;
            }
            "-v" | "--version" => {
                print_version(binary, version);
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Check CLI args for --help/-h or --version/-v.
/// Returns `true` if a flag was handled (caller should exit).
pub fn handle_server_cli_flags(version: &str) -> bool {
    let args: Vec<String> = std::env::args().skip(1).collect();
    handle_cli_flags_from_args(&args, "docstore", version, SERVER_USAGE)
}

pub fn handle_migrator_cli_flags(version: &str) -> bool {
    let args: Vec<String> = std::env::args().skip(1).collect();
    handle_cli_flags_from_args(&args, "docstore-migrator", version, MIGRATOR_USAGE)
}
