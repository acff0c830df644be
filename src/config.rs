// ============================================================================
// Configuration
// ============================================================================
//
// All configuration comes from environment variables (plus an optional
// .env file loaded by the binary). A node's role is derived from its
// registry, not from configuration: any node with enabled slaves acts
// as a master; a node configured with MASTER_URL acts as a slave of
// that installation and must not accept registrations of its own.
//
// ============================================================================

use anyhow::{Context, Result};

// Default port values
const DEFAULT_PORT: u16 = 8080;

// Default outbound HTTP timeout for server-to-server propagation (seconds)
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

// Default polling interval for the pending-delivery retry worker (seconds)
const DEFAULT_RETRY_POLL_INTERVAL_SECS: u64 = 60;

/// Identity of the master installation this node is subscribed to.
/// Present only on slave nodes.
#[derive(Clone, Debug)]
pub struct MasterLink {
    /// Canonical sync endpoint of the master.
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Port the sync endpoint listens on.
    pub port: u16,

    /// This installation's own canonical sync endpoint URL. Doubles as
    /// the "don't call myself" filter during propagation.
    pub site_url: String,

    /// Whether this installation still participates in synchronization.
    /// When false, inbound relayed calls are answered with DISABLED so
    /// the remote master can deregister us.
    pub sync_enabled: bool,

    /// Shared secret. On a master this gates slave registration; on a
    /// slave it is the per-peer secret the master holds for us, so all
    /// inbound relayed calls are keyed against it.
    pub secret: String,

    /// Set when this installation is a slave of another site.
    pub master: Option<MasterLink>,

    /// PostgreSQL connection string for the registry and retry queue.
    pub database_url: String,

    /// Outbound HTTP timeout for propagation calls.
    pub http_timeout_secs: u64,

    /// Retry worker polling interval.
    pub retry_poll_interval_secs: u64,

    /// Salt for hashed identifiers in log output.
    pub log_hash_salt: String,

    /// Log filter (RUST_LOG syntax).
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse::<u16>().context("PORT must be a valid port number")?,
            Err(_) => DEFAULT_PORT,
        };

        let site_url = std::env::var("SITE_URL")
            .context("SITE_URL must be set to this installation's sync endpoint URL")?;

        let secret = std::env::var("SYNC_SECRET").context("SYNC_SECRET must be set")?;
        if secret.trim().is_empty() {
            anyhow::bail!("SYNC_SECRET must not be empty");
        }

        let sync_enabled = std::env::var("SYNC_ENABLED")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let master = std::env::var("MASTER_URL").ok().and_then(|url| {
            let url = url.trim().to_string();
            if url.is_empty() {
                None
            } else {
                Some(MasterLink { url })
            }
        });

        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let http_timeout_secs = env_u64("SYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        let retry_poll_interval_secs =
            env_u64("SYNC_RETRY_POLL_INTERVAL_SECS", DEFAULT_RETRY_POLL_INTERVAL_SECS)?;

        let log_hash_salt =
            std::env::var("LOG_HASH_SALT").unwrap_or_else(|_| "crosslink".to_string());

        let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            port,
            site_url,
            sync_enabled,
            secret,
            master,
            database_url,
            http_timeout_secs,
            retry_poll_interval_secs,
            log_hash_salt,
            rust_log,
        })
    }

    /// True when this node is configured as someone else's slave.
    pub fn is_slave(&self) -> bool {
        self.master.is_some()
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .with_context(|| format!("{} must be a positive integer", name)),
        Err(_) => Ok(default),
    }
}
