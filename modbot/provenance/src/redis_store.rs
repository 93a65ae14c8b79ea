use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, IntoConnectionInfo, RedisError};
use tokio::time::timeout;

use crate::store::{ExpiringStore, ScanCursor, ScanPage, StoreError};

/// Connection parameters for [`RedisStore`].
#[derive(Clone)]
pub struct RedisSettings {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Logical database index.
    pub db: i64,
    /// ACL user.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Connect with TLS (`rediss://`).
    pub tls: bool,
    /// Bound applied to connecting and to every command.
    pub op_timeout: Duration,
}

impl RedisSettings {
    fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{scheme}://{}:{}/{}", self.host, self.port, self.db)
    }
}

// Credentials never reach the logs.
impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |value: &Option<String>| if value.is_some() { "Set" } else { "Not Set" };
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("user", &set(&self.username))
            .field("password", &set(&self.password))
            .field("tls", &self.tls)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

/// [`ExpiringStore`] backed by Redis `SET PX`, `SCAN` and `DEL`.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects and verifies the connection with `PING`.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, StoreError> {
        let mut info = settings
            .url()
            .into_connection_info()
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        info.redis.username.clone_from(&settings.username);
        info.redis.password.clone_from(&settings.password);
        let client =
            redis::Client::open(info).map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let manager = timeout(settings.op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout {
                op: "connect",
                after: settings.op_timeout,
            })?
            .map_err(|err| classify("connect", &err))?;
        let store = Self {
            manager,
            op_timeout: settings.op_timeout,
        };
        store.ping().await?;
        Ok(store)
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>> + Send,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|err| classify(op, &err)),
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }
}

fn classify(op: &'static str, err: &RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else if err.is_timeout() {
        StoreError::Timeout {
            op,
            after: Duration::ZERO,
        }
    } else {
        StoreError::Command {
            op,
            reason: err.to_string(),
        }
    }
}

/// Turns a literal prefix into a `MATCH` pattern.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl ExpiringStore for RedisStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            // SET rejects a zero expiry; an already expired key is a deleted key.
            let _: u64 = self
                .bounded("put", redis::cmd("DEL").arg(key).query_async(&mut conn))
                .await?;
            return Ok(());
        }
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg("1").arg("PX").arg(millis);
        let _: () = self.bounded("put", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn scan_page(
        &self,
        prefix: &str,
        cursor: ScanCursor,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let position: u64 = match cursor {
            ScanCursor::Start => 0,
            ScanCursor::At(raw) => raw.parse().map_err(|_| StoreError::Command {
                op: "scan",
                reason: format!("invalid cursor `{raw}`"),
            })?,
        };
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(position)
            .arg("MATCH")
            .arg(match_pattern(prefix))
            .arg("COUNT")
            .arg(count);
        let (next, keys): (u64, Vec<String>) =
            self.bounded("scan", cmd.query_async(&mut conn)).await?;
        Ok(ScanPage {
            keys,
            next: (next != 0).then(|| ScanCursor::At(next.to_string())),
        })
    }

    async fn delete_all(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_str());
        }
        self.bounded("delete_all", cmd.query_async(&mut conn)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
