//! Configuration for the replicator.
//!
//! Built once at start-up and shared by reference with every component.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use draco_events::Tag;

/// Account used for the DR side of the local platform when none is configured.
pub const DEV_DR_ACCOUNT: &str = "111111111111";

/// Which saga roles this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSelection {
    Producer,
    Consumer,
    All,
}

impl RoleSelection {
    pub fn runs_producer(&self) -> bool {
        matches!(self, RoleSelection::Producer | RoleSelection::All)
    }

    pub fn runs_consumer(&self) -> bool {
        matches!(self, RoleSelection::Consumer | RoleSelection::All)
    }
}

impl FromStr for RoleSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "producer" => Ok(RoleSelection::Producer),
            "consumer" => Ok(RoleSelection::Consumer),
            "all" => Ok(RoleSelection::All),
            other => bail!("unknown role '{other}' (expected producer, consumer or all)"),
        }
    }
}

/// Where provisioned key ids are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirectoryKind {
    /// Key alias derived from the source name.
    Alias,
    /// Legacy layout: one object per source in the DR key bucket.
    ObjectStore,
}

impl FromStr for KeyDirectoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "alias" => Ok(KeyDirectoryKind::Alias),
            "object-store" | "s3" => Ok(KeyDirectoryKind::ObjectStore),
            other => bail!("unknown key directory '{other}' (expected alias or object-store)"),
        }
    }
}

/// Completion polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Polls before a wait is reported as exhausted.
    pub max_iterations: u32,

    /// Delay between polls.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_iterations: 60,
            interval: Duration::from_secs(60),
        }
    }
}

/// Replicator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,

    /// Roles served by this process.
    pub role: RoleSelection,

    /// Region of both accounts.
    pub region: String,

    /// DR account id.
    pub dr_account: String,

    /// Shared transit key; when unset the per-source DR key is used.
    pub transit_key_arn: Option<String>,

    /// Topic the consumer listens on.
    pub dr_topic_arn: String,

    /// Topic the producer listens on.
    pub producer_topic_arn: String,

    /// Workflow that drives completion polling.
    pub workflow_arn: String,

    /// Tag applied to every DR copy and key.
    pub dr_tag: Tag,

    /// Key directory variant.
    pub key_directory: KeyDirectoryKind,

    /// Bucket of the legacy key directory.
    pub key_bucket: String,

    /// Completion polling cadence.
    pub poll: PollConfig,

    /// Debug verbosity (0 = info, 1 = debug, 2+ = trace).
    pub debug: u8,

    /// Log intended deletions instead of deleting.
    pub dry_run: bool,

    /// Run against the in-memory local platform.
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let listen_addr = var("DRACO_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid DRACO_LISTEN_ADDR")?;

        let role = match var("DRACO_ROLE") {
            Some(v) => v.parse()?,
            None => RoleSelection::All,
        };

        let dev_mode = var("DRACO_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let region = var("DRACO_REGION").unwrap_or_else(|| "us-east-1".to_string());

        let dr_account = match var("DRACO_DR_ACCOUNT") {
            Some(account) => account,
            None if dev_mode => DEV_DR_ACCOUNT.to_string(),
            None => bail!("DRACO_DR_ACCOUNT is required"),
        };

        let dr_topic_arn = var("DRACO_DR_TOPIC_ARN")
            .unwrap_or_else(|| format!("arn:aws:sns:{region}:{dr_account}:DracoConsumer"));
        let producer_topic_arn = var("DRACO_PRODUCER_TOPIC_ARN")
            .unwrap_or_else(|| format!("arn:aws:sns:{region}:{dr_account}:DracoProducer"));
        let workflow_arn = var("DRACO_WORKFLOW_ARN").unwrap_or_else(|| {
            format!("arn:aws:states:{region}:{dr_account}:stateMachine:DracoWait4Copy")
        });

        let dr_tag = Tag::new(
            var("DRACO_TAG_KEY").unwrap_or_else(|| "Draco".to_string()),
            var("DRACO_TAG_VALUE").unwrap_or_else(|| "DR".to_string()),
        );

        let key_directory = match var("DRACO_KEY_DIRECTORY") {
            Some(v) => v.parse()?,
            None => KeyDirectoryKind::Alias,
        };
        let key_bucket =
            var("DRACO_KEY_BUCKET").unwrap_or_else(|| format!("draco-{dr_account}-{region}"));

        let defaults = PollConfig::default();
        let poll = PollConfig {
            max_iterations: match var("DRACO_POLL_MAX_ITERATIONS") {
                Some(v) => v.parse().context("invalid DRACO_POLL_MAX_ITERATIONS")?,
                None => defaults.max_iterations,
            },
            interval: match var("DRACO_POLL_INTERVAL_SECS") {
                Some(v) => Duration::from_secs(v.parse().context("invalid DRACO_POLL_INTERVAL_SECS")?),
                None => defaults.interval,
            },
        };

        let debug = var("DRACO_DEBUG")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        // Any value other than "false" enables dry run.
        let dry_run = lookup("DRACO_DRY_RUN").is_some_and(|v| v != "false");

        let log_level = var("DRACO_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            role,
            region,
            dr_account,
            transit_key_arn: var("DRACO_TRANSIT_KEY_ARN"),
            dr_topic_arn,
            producer_topic_arn,
            workflow_arn,
            dr_tag,
            key_directory,
            key_bucket,
            poll,
            debug,
            dry_run,
            dev_mode,
            log_level,
        })
    }

    /// Configuration for the local platform with every default applied.
    pub fn dev() -> Result<Self> {
        let mut config = Self::from_lookup(|key| (key == "DRACO_DEV").then(|| "1".to_string()))?;
        config.poll.interval = Duration::from_millis(50);
        Ok(config)
    }

    /// Tracing filter directive for the configured verbosity.
    pub fn filter_directive(&self) -> String {
        match self.debug {
            0 => self.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}
