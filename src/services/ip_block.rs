//! Banned addresses
//!
//! Posting is refused for addresses listed in the configured DNS blocklist
//! and for addresses with an active ban record.

use crate::config::DnsblConfig;
use crate::db::repositories::IpBlockRepository;
use crate::db::DynDatabasePool;
use crate::models::IpBlockInfo;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Carries the ban reason or the blocklist zone
    #[error("Posting blocked: {0}")]
    Blocked(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Resolves host names for blocklist queries
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Whether `name` resolves to at least one address
    async fn resolves(&self, name: &str) -> std::io::Result<bool>;
}

/// Resolver backed by the system's name service
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolves(&self, name: &str) -> std::io::Result<bool> {
        let mut addrs = tokio::net::lookup_host((name, 0)).await?;
        Ok(addrs.next().is_some())
    }
}

/// `d.c.b.a.<zone>` for IPv4 `a.b.c.d`; IPv6 addresses are not queried
pub fn dnsbl_query_name(addr: &IpAddr, zone: &str) -> Option<String> {
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            Some(format!("{}.{}.{}.{}.{}", d, c, b, a, zone))
        }
        IpAddr::V6(_) => None,
    }
}

pub struct IpBlockService {
    pool: DynDatabasePool,
    repo: Arc<dyn IpBlockRepository>,
    resolver: Arc<dyn HostResolver>,
    dnsbl: DnsblConfig,
}

impl IpBlockService {
    pub fn new(pool: DynDatabasePool, repo: Arc<dyn IpBlockRepository>, dnsbl: DnsblConfig) -> Self {
        Self::with_resolver(pool, repo, dnsbl, Arc::new(SystemResolver))
    }

    pub fn with_resolver(
        pool: DynDatabasePool,
        repo: Arc<dyn IpBlockRepository>,
        dnsbl: DnsblConfig,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            pool,
            repo,
            resolver,
            dnsbl,
        }
    }

    /// Ban record of an address, if any (active or not).
    ///
    /// Any spelling of the address finds the record; something that is not
    /// an address has none.
    pub async fn get_block_info(
        &self,
        conn: &mut SqliteConnection,
        addr: &str,
    ) -> Result<Option<IpBlockInfo>, BlockError> {
        let Some(ip) = canonical_ip(addr) else {
            return Ok(None);
        };
        Ok(self.repo.get(conn, &ip.to_string()).await?)
    }

    /// Whether the address is listed in the blocklist zone.
    ///
    /// Lookup failures and timeouts count as "not listed".
    pub async fn is_listed_in_dnsbl(&self, addr: &str) -> bool {
        if !self.dnsbl.enabled {
            return false;
        }

        let Some(ip) = canonical_ip(addr) else {
            return false;
        };
        let Some(name) = dnsbl_query_name(&ip, &self.dnsbl.zone) else {
            return false;
        };

        let timeout = Duration::from_millis(self.dnsbl.timeout_ms);
        match tokio::time::timeout(timeout, self.resolver.resolves(&name)).await {
            Ok(Ok(listed)) => listed,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!("DNSBL lookup of {} timed out", name);
                false
            }
        }
    }

    /// Refuse posting from blocklisted or banned addresses
    pub async fn check_block_ip(
        &self,
        conn: &mut SqliteConnection,
        addr: &str,
    ) -> Result<(), BlockError> {
        if self.is_listed_in_dnsbl(addr).await {
            tracing::info!("Posting from {} refused: listed in {}", addr, self.dnsbl.zone);
            return Err(BlockError::Blocked(self.dnsbl.zone.clone()));
        }

        match self.get_block_info(conn, addr).await? {
            Some(block) => check_block(&block),
            None => Ok(()),
        }
    }

    /// Ban an address until `until` (`None` bans forever)
    pub async fn ban_ip(
        &self,
        addr: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
        moderator_id: i64,
    ) -> Result<(), BlockError> {
        let ip = canonical_ip(addr).ok_or_else(|| BlockError::InvalidAddress(addr.to_string()))?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BlockError::ValidationError(
                "Ban reason cannot be empty".to_string(),
            ));
        }

        let mut conn = self.pool.acquire().await?;
        self.repo
            .upsert(&mut conn, &ip.to_string(), reason, until, moderator_id, Utc::now())
            .await
            .context("Failed to store ban")?;

        tracing::info!("Moderator {} banned {}: {}", moderator_id, ip, reason);
        Ok(())
    }

    /// Lift a ban. Returns whether there was one.
    pub async fn unban_ip(&self, addr: &str) -> Result<bool, BlockError> {
        let ip = canonical_ip(addr).ok_or_else(|| BlockError::InvalidAddress(addr.to_string()))?;

        let mut conn = self.pool.acquire().await?;
        let existed = self.repo.delete(&mut conn, &ip.to_string()).await?;
        if existed {
            tracing::info!("Unbanned {}", ip);
        }
        Ok(existed)
    }
}

/// Parsed address in the form bans are stored under: IPv6 compressed and
/// lowercase, IPv4-mapped IPv6 as plain IPv4
pub fn canonical_ip(addr: &str) -> Option<IpAddr> {
    addr.trim().parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Fail when the ban is still in force
pub fn check_block(block: &IpBlockInfo) -> Result<(), BlockError> {
    if block.is_blocked() {
        Err(BlockError::Blocked(block.reason.clone()))
    } else {
        Ok(())
    }
}
