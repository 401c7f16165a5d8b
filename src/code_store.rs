//! External TTL store for e-mail verification codes and cooldown flags.
//!
//! The verification-code subsystem itself lives outside this service; this
//! module defines the storage interface it shares with the core: codes
//! under `verification_code:{project}:{email}` and rate-limit flags under
//! `rate_limit:{project}:{email}`, both with TTLs enforced by the store.

use async_trait::async_trait;
use rand::Rng;
use redis::AsyncCommands;

use crate::error::Result;

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Store a code for `(project, email)` with the given TTL.
    async fn put(&self, project_id: &str, email: &str, code: &str, ttl_secs: u64) -> Result<()>;

    /// Fetch the current code, or `None` if absent or expired.
    async fn get(&self, project_id: &str, email: &str) -> Result<Option<String>>;

    /// Drop the code (after successful verification).
    async fn delete(&self, project_id: &str, email: &str) -> Result<()>;

    /// Raise the cooldown flag for `(project, email)`.
    async fn set_cooldown(&self, project_id: &str, email: &str, ttl_secs: u64) -> Result<()>;

    /// Is the cooldown flag currently raised?
    async fn in_cooldown(&self, project_id: &str, email: &str) -> Result<bool>;
}

fn code_key(project_id: &str, email: &str) -> String {
    format!("verification_code:{}:{}", project_id, email)
}

fn cooldown_key(project_id: &str, email: &str) -> String {
    format!("rate_limit:{}:{}", project_id, email)
}

/// Generate a 6-digit verification code.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

pub struct RedisCodeStore {
    client: redis::Client,
}

impl RedisCodeStore {
    /// Opening the client performs no I/O; connections are established per
    /// operation through the multiplexed pool.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CodeStore for RedisCodeStore {
    async fn put(&self, project_id: &str, email: &str, code: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(code_key(project_id, email), code, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, project_id: &str, email: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(code_key(project_id, email)).await?;
        Ok(value)
    }

    async fn delete(&self, project_id: &str, email: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(code_key(project_id, email)).await?;
        Ok(())
    }

    async fn set_cooldown(&self, project_id: &str, email: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(cooldown_key(project_id, email), "1", ttl_secs)
            .await?;
        Ok(())
    }

    async fn in_cooldown(&self, project_id: &str, email: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(cooldown_key(project_id, email)).await?;
        Ok(exists)
    }
}
