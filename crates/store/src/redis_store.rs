use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;
use waypoint_core::WaypointError;

use crate::Store;

fn store_err(context: &str, e: redis::RedisError) -> WaypointError {
    WaypointError::Store(format!("{context}: {e}"))
}

/// Production store, backed by a Redis-compatible service. The
/// approximate-membership filter uses the RedisBloom module's `BF.*`
/// commands, issued as raw commands since redis-rs has no native
/// bindings for them.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, WaypointError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| store_err("opening redis client", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| store_err("connecting to redis", e))?;
        Ok(Self { conn })
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, WaypointError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|e| store_err("SCAN", e))?;
            found.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(found)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), WaypointError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, value).await.map_err(|e| store_err("LPUSH", e))?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), WaypointError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(key, value).await.map_err(|e| store_err("RPUSH", e))?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, WaypointError> {
        let mut conn = self.conn.clone();
        conn.lpop(key, None).await.map_err(|e| store_err("LPOP", e))
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, WaypointError> {
        let mut conn = self.conn.clone();
        conn.rpop(key, None).await.map_err(|e| store_err("RPOP", e))
    }

    async fn llen(&self, key: &str) -> Result<u64, WaypointError> {
        let mut conn = self.conn.clone();
        conn.llen(key).await.map_err(|e| store_err("LLEN", e))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, WaypointError> {
        self.scan_keys(prefix).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), WaypointError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.hset(key, field, value).await.map_err(|e| store_err("HSET", e))?;
        Ok(())
    }

    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, WaypointError> {
        let mut conn = self.conn.clone();
        conn.hset_nx(key, field, value).await.map_err(|e| store_err("HSETNX", e))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, WaypointError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(|e| store_err("HGET", e))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, WaypointError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(|e| store_err("HGETALL", e))
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<(), WaypointError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.hdel(key, fields).await.map_err(|e| store_err("HDEL", e))?;
        Ok(())
    }

    async fn filter_reserve(&self, key: &str, capacity: u64, fpr: f64) -> Result<(), WaypointError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<String> = redis::cmd("BF.RESERVE")
            .arg(key)
            .arg(fpr)
            .arg(capacity)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            // ERR item exists: the filter was already reserved by a previous run or worker.
            Err(e) if e.to_string().contains("item exists") => Ok(()),
            Err(e) => Err(store_err("BF.RESERVE", e)),
        }
    }

    async fn filter_exists(&self, key: &str) -> Result<bool, WaypointError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await.map_err(|e| store_err("EXISTS", e))?;
        Ok(exists)
    }

    async fn filter_contains_many(&self, key: &str, items: &[String]) -> Result<Vec<bool>, WaypointError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("BF.MEXISTS");
        cmd.arg(key);
        for item in items {
            cmd.arg(item);
        }
        let flags: Vec<i64> = cmd.query_async(&mut conn).await.map_err(|e| store_err("BF.MEXISTS", e))?;
        Ok(flags.into_iter().map(|f| f != 0).collect())
    }

    async fn filter_add_many(&self, key: &str, items: &[String]) -> Result<(), WaypointError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("BF.MADD");
        cmd.arg(key);
        for item in items {
            cmd.arg(item);
        }
        let result: redis::RedisResult<Vec<i64>> = cmd.query_async(&mut conn).await;
        if let Err(e) = result {
            warn!(key, error = %e, "BF.MADD failed");
            return Err(store_err("BF.MADD", e));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, WaypointError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| store_err("GET", e))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), WaypointError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(|e| store_err("SET", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), WaypointError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(|e| store_err("DEL", e))?;
        Ok(())
    }
}
