use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 코어가 외부 알림 경계로 내보내는 이벤트
/// 직렬화 형태: {"event_type": "...", ...payload}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuctionEvent {
    // 선두 입찰자 교체 이벤트 (이전 선두에게 전달)
    Outbid {
        lot_id: i64,
        bidder_id: i64,
        outbid_amount: i64,
        timestamp: DateTime<Utc>,
    },
    // 낙찰 이벤트
    LotWon {
        lot_id: i64,
        bidder_id: i64,
        amount: i64,
        timestamp: DateTime<Utc>,
    },
    // 유찰 이벤트 (reserve 미달 여부 구분)
    LotUnsold {
        lot_id: i64,
        reserve_met: bool,
        timestamp: DateTime<Utc>,
    },
    // 프로모션 활성화 이벤트 (결제 확인 시)
    PromotionActivated {
        promotion_id: i64,
        listing_id: i64,
        timestamp: DateTime<Utc>,
    },
}

impl AuctionEvent {
    /// 알림 토픽 파티셔닝 키
    pub fn key(&self) -> String {
        match self {
            Self::Outbid { lot_id, .. }
            | Self::LotWon { lot_id, .. }
            | Self::LotUnsold { lot_id, .. } => format!("lot-{lot_id}"),
            Self::PromotionActivated { promotion_id, .. } => format!("promotion-{promotion_id}"),
        }
    }
}
