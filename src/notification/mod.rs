/// 알림 경계
/// 코어는 AuctionEvent를 싱크에 내보내기만 한다.
/// 실제 전달(이메일, 푸시)은 알림 토픽을 구독하는 외부 협력자 몫.
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::error::{AuctionError, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

// endregion: --- Imports

// region:    --- Notification Sink Trait
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, event: AuctionEvent) -> Result<()>;
}
// endregion: --- Notification Sink Trait

// region:    --- Kafka Sink
/// 알림 토픽 기본 이름
pub const NOTIFICATION_TOPIC: &str = "auction-notifications";

#[derive(Clone)]
pub struct KafkaNotificationSink {
    producer: Arc<FutureProducer>,
    topic: String,
}

/// KafkaNotificationSink 구현
impl KafkaNotificationSink {
    pub fn new(brokers: &str, topic: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| AuctionError::Notification(format!("Producer 생성 실패: {e:?}")))?;

        Ok(KafkaNotificationSink {
            producer: Arc::new(producer),
            topic: topic.to_string(),
        })
    }

    /// 알림 토픽 생성
    pub async fn create_topic(
        brokers: &str,
        topic_name: &str,
        num_partitions: i32,
        replication_factor: i32,
    ) -> Result<()> {
        info!("{:<12} --> 알림 토픽 생성 시작: {}", "Notification", topic_name);

        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|e| AuctionError::Notification(format!("AdminClient 생성 실패: {e:?}")))?;

        let new_topic = NewTopic::new(
            topic_name,
            num_partitions,
            TopicReplication::Fixed(replication_factor),
        );

        match admin_client
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
        {
            Ok(_) => {
                info!(
                    "{:<12} --> 알림 토픽 생성 성공: {}",
                    "Notification", topic_name
                );
                Ok(())
            }
            Err(e) => {
                error!("{:<12} --> 알림 토픽 생성 실패: {:?}", "Notification", e);
                Err(AuctionError::Notification(format!("토픽 생성 실패: {e:?}")))
            }
        }
    }
}

#[async_trait]
impl NotificationSink for KafkaNotificationSink {
    async fn emit(&self, event: AuctionEvent) -> Result<()> {
        let key = event.key();
        let payload = serde_json::to_string(&event)
            .map_err(|e| AuctionError::Notification(e.to_string()))?;

        info!(
            "{:<12} --> 알림 발행: topic={}, key={}",
            "Notification", self.topic, key
        );
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        self.producer
            .send(record, std::time::Duration::from_secs(0))
            .await
            .map_err(|(e, _)| AuctionError::Notification(format!("발행 실패: {e:?}")))?;

        Ok(())
    }
}
// endregion: --- Kafka Sink

// region:    --- Memory Sink
/// 테스트/로컬용 기록 싱크
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuctionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 발행된 이벤트 스냅샷
    pub async fn events(&self) -> Vec<AuctionEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn emit(&self, event: AuctionEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
// endregion: --- Memory Sink
