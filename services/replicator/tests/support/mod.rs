#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use draco_events::{Tag, TagList, LIFECYCLE_TAG};
use draco_replicator::config::Config;
use draco_replicator::platform::{LocalPlatform, DEV_PRODUCER_ACCOUNT};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running local platform with its dispatcher.
pub struct Running {
    pub platform: Arc<LocalPlatform>,
    pub shutdown: watch::Sender<bool>,
    pub dispatcher: JoinHandle<()>,
}

pub fn fast_config() -> Config {
    let mut config = Config::dev().unwrap();
    config.poll.interval = Duration::from_millis(10);
    config
}

pub fn start(config: Config) -> Running {
    let (platform, messages) = LocalPlatform::build(Arc::new(config));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let dispatcher = platform.dispatcher.clone();
    let handle = tokio::spawn(async move {
        dispatcher.run(messages, shutdown_rx).await;
    });
    Running {
        platform: Arc::new(platform),
        shutdown,
        dispatcher: handle,
    }
}

pub fn lifecycle(policy: &str) -> TagList {
    TagList::from(vec![Tag::new(LIFECYCLE_TAG, policy), Tag::new("Owner", "payments")])
}

/// Bus-delivered notification that an instance snapshot was created.
pub fn instance_created(config: &Config, snapshot_id: &str) -> Value {
    let message = json!({
        "Event ID": "http://docs.amazonwebservices.com/AmazonRDS/latest/UserGuide/USER_Events.html#RDS-EVENT-0042",
        "Source ID": snapshot_id,
    });
    json!({
        "Records": [{
            "EventSource": "aws:sns",
            "Sns": {
                "Subject": "RDS Notification Message",
                "Message": message.to_string(),
                "TopicArn": format!("arn:aws:sns:{}:{}:rds-events", config.region, DEV_PRODUCER_ACCOUNT),
            }
        }]
    })
}

/// Waits until `condition` holds, panicking after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
