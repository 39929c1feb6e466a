/// 결제 웹훅 정합 처리
/// 결제 제공자가 비동기로 보내는 이벤트를 PENDING 프로모션에 멱등 적용한다.
/// 로트/리스팅 상태 기계와는 id 참조로만 이어지며 공유 메모리 락이 없다.
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::auction::model::{PaymentStatus, Promotion, PromotionStatus};
use crate::config::EngineConfig;
use crate::error::{AuctionError, Result};
use crate::notification::NotificationSink;
use crate::store::{AuctionStore, PromotionPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::interval;
use tracing::{error, info, warn};

// endregion: --- Imports

// region:    --- Webhook Payload
/// 결제 제공자 인바운드 페이로드
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentWebhook {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// 이벤트 메타데이터에 실린 프로모션 id
    pub object_ref: i64,
    pub status: WebhookStatus,
}

/// 제공자가 보내는 결제 결과 상태
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Paid,
    Declined,
    Expired,
    Refunded,
}

/// 웹훅 처리 결과 (제공자에게는 셋 다 ACK)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// 상태 전이를 새로 적용함
    Applied,
    /// 재전달 또는 이미 같은 상태 (재적용/중복 알림 없음)
    AlreadyApplied,
    /// 참조 대상 없음 (기록 후 ACK, 재시도 대상 아님)
    Ignored,
}
// endregion: --- Webhook Payload

// region:    --- Signature Verifier
/// 서명 검증은 외부 협력자에 위임되는 경계.
/// 기본 구현은 raw body의 HMAC-SHA256 hex 비교다.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> bool;
}

pub struct HmacVerifier {
    secret: String,
}

impl HmacVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }

    /// 테스트/클라이언트용 서명 계산
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(hmac_sha256::HMAC::mac(payload, self.secret.as_bytes()))
    }
}

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, payload: &[u8], signature: &str) -> bool {
        self.sign(payload) == signature
    }
}
// endregion: --- Signature Verifier

// region:    --- Reconciler
/// 프로모션 전이 충돌 재확인 횟수 (동시 중복 전달 수렴용)
const APPLY_ATTEMPTS: u32 = 3;

pub struct PaymentReconciler {
    store: Arc<dyn AuctionStore>,
    sink: Arc<dyn NotificationSink>,
    verifier: Arc<dyn SignatureVerifier>,
    config: EngineConfig,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn AuctionStore>,
        sink: Arc<dyn NotificationSink>,
        verifier: Arc<dyn SignatureVerifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sink,
            verifier,
            config,
        }
    }

    /// 웹훅 1건 처리
    /// 서명 검증 -> 파싱 -> 이벤트 id 멱등성 -> 대상 조회 -> 상태 전이.
    /// 서명 실패 외에는 상태 변화 없이도 전부 ACK 대상이다.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        // 1) 서명 검증. 실패는 이벤트 단위 터미널, 상태 변화 없음.
        if !self.verifier.verify(body, signature) {
            warn!("{:<12} --> 서명 검증 실패", "Webhook");
            return Err(AuctionError::InvalidSignature);
        }

        let webhook: PaymentWebhook = serde_json::from_slice(body)
            .map_err(|e| AuctionError::MalformedDocument(format!("웹훅 파싱 실패: {e}")))?;
        info!(
            "{:<12} --> 웹훅 수신: event_id={}, ref={}, status={:?}",
            "Webhook", webhook.event_id, webhook.object_ref, webhook.status
        );

        // 2) 이벤트 id 재전달 차단 (조회만, 기록은 적용이 끝난 뒤)
        if self.store.webhook_event_seen(&webhook.event_id).await? {
            info!(
                "{:<12} --> 재전달 웹훅 무시: event_id={}",
                "Webhook", webhook.event_id
            );
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        // 3) 대상 조회. 모르는 참조는 일시 장애가 아니므로 기록 후 ACK.
        let promotion = match self.store.get_promotion(webhook.object_ref).await {
            Ok(promotion) => promotion,
            Err(AuctionError::PromotionNotFound(id)) => {
                warn!(
                    "{:<12} --> 알 수 없는 프로모션 참조 ACK: {}",
                    "Webhook", id
                );
                self.store.record_webhook_event(&webhook.event_id).await?;
                return Ok(WebhookOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

        // 4) 전이 적용. 실패 시 이벤트 id를 태우지 않으므로
        //    제공자의 같은 id 재전달이 복구 경로로 남는다.
        let outcome = self.apply(promotion, webhook.status, now).await?;

        // 5) 적용이 끝난 뒤에만 id 기록. 이후 재전달은 전이 없이 ACK.
        self.store.record_webhook_event(&webhook.event_id).await?;
        Ok(outcome)
    }

    /// 상태 전이 적용. 동시 중복 전달은 버전 충돌 후 재확인으로 수렴한다.
    async fn apply(
        &self,
        mut promotion: Promotion,
        status: WebhookStatus,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        for _ in 0..APPLY_ATTEMPTS {
            // 멱등성: 이미 함의된 상태면 재적용 없이 ACK
            if already_applied(&promotion, status) {
                return Ok(WebhookOutcome::AlreadyApplied);
            }

            let patch = match status {
                WebhookStatus::Paid => PromotionPatch {
                    status: Some(PromotionStatus::Active),
                    payment_status: Some(PaymentStatus::Paid),
                    updated_at: Some(now),
                },
                WebhookStatus::Declined | WebhookStatus::Expired => PromotionPatch {
                    status: Some(PromotionStatus::Failed),
                    updated_at: Some(now),
                    ..PromotionPatch::default()
                },
                WebhookStatus::Refunded => PromotionPatch {
                    status: Some(PromotionStatus::Expired),
                    payment_status: Some(PaymentStatus::Refunded),
                    updated_at: Some(now),
                },
            };

            match self
                .store
                .update_promotion(promotion.id, promotion.version, patch)
                .await
            {
                Ok(updated) => {
                    info!(
                        "{:<12} --> 프로모션 {} 전이: {} / {}",
                        "Webhook",
                        updated.id,
                        updated.status.as_str(),
                        updated.payment_status.as_str()
                    );
                    if status == WebhookStatus::Paid {
                        self.sink
                            .emit(AuctionEvent::PromotionActivated {
                                promotion_id: updated.id,
                                listing_id: updated.listing_id,
                                timestamp: now,
                            })
                            .await?;
                    }
                    return Ok(WebhookOutcome::Applied);
                }
                Err(e) if e.is_conflict() => {
                    // 동시 전달이 먼저 적용됨. 다시 읽고 멱등성 재확인.
                    promotion = self.store.get_promotion(promotion.id).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AuctionError::MaxRetriesExceeded)
    }

    /// 유실 웹훅 안전망: 타임아웃을 넘긴 PENDING 프로모션을 FAILED로 내린다.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.config.promotion_timeout;
        let mut expired = 0;
        for promotion in self.store.find_stale_pending_promotions(cutoff).await? {
            match self
                .store
                .update_promotion(
                    promotion.id,
                    promotion.version,
                    PromotionPatch {
                        status: Some(PromotionStatus::Failed),
                        updated_at: Some(now),
                        ..PromotionPatch::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    info!(
                        "{:<12} --> PENDING 타임아웃 프로모션 만료: {}",
                        "Webhook", promotion.id
                    );
                    expired += 1;
                }
                // 스윕 도중 웹훅이 먼저 도착한 경우. 그대로 둔다.
                Err(e) if e.is_conflict() => continue,
                Err(e) => {
                    error!(
                        "{:<12} --> 프로모션 {} 만료 실패: {:?}",
                        "Webhook", promotion.id, e
                    );
                }
            }
        }
        Ok(expired)
    }

    /// 만료 스윕 백그라운드 시작
    pub fn start_sweep(self: Arc<Self>) {
        let reconciler = self;
        tokio::spawn(async move {
            let mut ticker = interval(reconciler.config.sweep_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.expire_stale(Utc::now()).await {
                    error!("{:<12} --> 만료 스윕 중 오류 발생: {:?}", "Webhook", e);
                }
            }
        });
    }
}

/// 이벤트가 함의하는 상태에 이미 도달했는지 (멱등성 판정)
fn already_applied(promotion: &Promotion, status: WebhookStatus) -> bool {
    match status {
        WebhookStatus::Paid => promotion.payment_status == PaymentStatus::Paid,
        WebhookStatus::Declined | WebhookStatus::Expired => {
            promotion.status == PromotionStatus::Failed
        }
        WebhookStatus::Refunded => promotion.payment_status == PaymentStatus::Refunded,
    }
}
// endregion: --- Reconciler
