//! Bus subscription worker of the local platform.
//!
//! Every publication on the loopback bus is wrapped the way the bus delivers
//! it and handed to the role subscribed to its topic, one task per message.

use std::sync::Arc;

use draco_events::BusEnvelope;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::bus::Publication;
use crate::config::Config;
use crate::consumer::Consumer;
use crate::error::HandlerResponse;
use crate::producer::Producer;

#[derive(Clone)]
pub struct Dispatcher {
    producer_topic: String,
    dr_topic: String,
    producer: Option<Arc<Producer>>,
    consumer: Option<Arc<Consumer>>,
}

impl Dispatcher {
    pub fn new(config: &Config, producer: Option<Arc<Producer>>, consumer: Option<Arc<Consumer>>) -> Self {
        Self {
            producer_topic: config.producer_topic_arn.clone(),
            dr_topic: config.dr_topic_arn.clone(),
            producer,
            consumer,
        }
    }

    #[instrument(skip(self, messages, shutdown))]
    pub async fn run(
        &self,
        mut messages: mpsc::UnboundedReceiver<Publication>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            producer_topic = %self.producer_topic,
            dr_topic = %self.dr_topic,
            "Starting dispatcher"
        );

        loop {
            tokio::select! {
                message = messages.recv() => {
                    match message {
                        Some(publication) => {
                            let dispatcher = self.clone();
                            tokio::spawn(async move {
                                dispatcher.deliver(publication).await;
                            });
                        }
                        None => {
                            info!("Bus closed, dispatcher stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Delivers one publication to its subscriber.
    ///
    /// Returns `None` when nothing subscribes to the topic.
    pub async fn deliver(&self, publication: Publication) -> Option<HandlerResponse> {
        let topic = publication.topic_arn.clone();
        let envelope = BusEnvelope::saga(topic.clone(), publication.message);
        let raw = match serde_json::to_value(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                error!(topic = %topic, error = %e, "Could not wrap publication");
                return None;
            }
        };

        let response = if topic == self.producer_topic {
            self.producer.as_ref()?.handle(&raw).await
        } else if topic == self.dr_topic {
            self.consumer.as_ref()?.handle(&raw).await
        } else {
            warn!(topic = %topic, "No subscriber for topic");
            return None;
        };

        if response.is_success() {
            debug!(topic = %topic, body = %response.body, "Delivered");
        } else {
            warn!(
                topic = %topic,
                status_code = response.status_code,
                body = %response.body,
                "Delivery failed"
            );
        }
        Some(response)
    }
}
