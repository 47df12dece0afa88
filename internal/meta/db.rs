use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;

struct ConnectSettings {
    delay_ms: u64,
    max_attempts: u32,
}

fn load_connect_settings() -> ConnectSettings {
    let max_attempts = std::env::var("DS_POSTGRES_CONNECT_RETRIES")
        .ok()
        .and_then(|val| val.parse::<u32>().ok())
        .unwrap_or(30)
        .max(1);
    let delay_ms = std::env::var("DS_POSTGRES_CONNECT_DELAY_MS")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(1000)
        .max(100);
    ConnectSettings {
        delay_ms,
        max_attempts,
    }
}

/// Connect to Postgres, retrying while the database comes up.
pub async fn connect(dsn: &str) -> Result<PgPool, sqlx::Error> {
    let settings = load_connect_settings();
    let mut last_err = None;
    for attempt in 1..=settings.max_attempts {
        match connect_pool(dsn).await {
            Ok(pool) => return Ok(pool),
            Err(err) => {
                last_err = Some(err);
                if attempt < settings.max_attempts {
                    tracing::warn!(attempt, "postgres connect failed; retrying");
                    sleep(Duration::from_millis(settings.delay_ms)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or(sqlx::Error::PoolTimedOut))
}

async fn connect_pool(dsn: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(dsn)
        .await
}

#[cfg(test)]
mod tests {
    use super::connect;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = env::var(key).ok();
            env::set_var(key, value);
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(prev) = &self.prev {
                env::set_var(self.key, prev);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[tokio::test]
    async fn connect_reports_error_after_retries() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let _retries = EnvGuard::set("DS_POSTGRES_CONNECT_RETRIES", "2");
        let _delay = EnvGuard::set("DS_POSTGRES_CONNECT_DELAY_MS", "100");
        let err = connect("postgres://ds:ds@127.0.0.1:1/ds?sslmode=disable")
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn connect_succeeds_against_configured_database() {
        let _lock = ENV_LOCK.lock().expect("lock");
        let _retries = EnvGuard::set("DS_POSTGRES_CONNECT_RETRIES", "1");
        let dsn = env::var("DS_POSTGRES_DSN")
            .or_else(|_| env::var("DATABASE_URL"))
            .expect("DS_POSTGRES_DSN or DATABASE_URL must be set");
        let pool = connect(&dsn).await.expect("connect");
        sqlx::query("SELECT 1").execute(&pool).await.expect("query");
    }
}
