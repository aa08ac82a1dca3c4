use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use tracing::{debug, error, info};

use super::{InboundMessage, MessageSource};
use crate::config::KafkaConfig;
use crate::error::Result;

/// Consumer-group subscription with manual offset commits
pub struct KafkaMessageSource {
    consumer: StreamConsumer,
    topics: Vec<String>,
}

impl KafkaMessageSource {
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set(
                "session.timeout.ms",
                config.session_timeout.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                e
            })?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics).map_err(|e| {
            error!("Failed to subscribe to topics: {}", e);
            e
        })?;

        info!("Kafka consumer subscribed to topics: {:?}", config.topics);

        Ok(Self {
            consumer,
            topics: config.topics.clone(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundMessage>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                debug!(partition, "Reached end of partition");
                Ok(None)
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(msg)) => Ok(Some(InboundMessage {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                payload: msg.payload().map(<[u8]>::to_vec),
            })),
        }
    }

    async fn commit(&mut self, message: &InboundMessage) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;

        self.consumer.commit(&tpl, CommitMode::Async)?;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Committed offset"
        );
        Ok(())
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        info!("Kafka consumer unsubscribed from topics: {:?}", self.topics);
    }
}
