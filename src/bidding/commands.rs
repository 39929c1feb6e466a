/// 입찰 커맨드 처리
/// 1. 입찰 (조건부 선두 교체 + outbid 알림)
/// 2. 현재 선두 조회
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::auction::model::{Bid, LotStatus};
use crate::config::EngineConfig;
use crate::error::{AuctionError, Result};
use crate::notification::NotificationSink;
use crate::store::AuctionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Commands
/// 입찰 명령
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaceBidCommand {
    pub lot_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
}

/// 1. 입찰
/// 같은 로트에 대한 동시 입찰은 저장소의 조건부 갱신으로 직렬화되고,
/// 버전 충돌은 한도 내에서만 인라인 재시도 후 호출자에게 표면화한다.
pub async fn handle_place_bid(
    cmd: PlaceBidCommand,
    now: DateTime<Utc>,
    store: &dyn AuctionStore,
    sink: &dyn NotificationSink,
    cfg: &EngineConfig,
) -> Result<Bid> {
    info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Command", cmd);
    let mut retries = 0;

    while retries < cfg.bid_max_retries {
        let lot = store.get_lot(cmd.lot_id).await?;

        // 경매 상태 및 시간 검증. 종료 시각 정각의 입찰은 지각으로 거부.
        if lot.status != LotStatus::Active || now >= lot.lot_end_time {
            return Err(AuctionError::LotClosed { lot_id: cmd.lot_id });
        }

        match store
            .place_bid_if_higher(cmd.lot_id, cmd.bidder_id, cmd.amount, now, cfg.min_increment)
            .await
        {
            Ok(placement) => {
                info!(
                    "{:<12} --> 입찰 성공: lot={}, amount={}",
                    "Command", cmd.lot_id, cmd.amount
                );
                // 이전 선두에게 outbid 알림.
                // 입찰은 이미 기록됐으므로 알림 실패가 결과를 뒤집어서는 안 된다.
                if let Some(outbid) = placement.outbid {
                    let event = AuctionEvent::Outbid {
                        lot_id: outbid.lot_id,
                        bidder_id: outbid.bidder_id,
                        outbid_amount: cmd.amount,
                        timestamp: now,
                    };
                    if let Err(e) = sink.emit(event).await {
                        warn!(
                            "{:<12} --> outbid 알림 발행 실패: lot={}, {:?}",
                            "Command", cmd.lot_id, e
                        );
                    }
                }
                return Ok(placement.bid);
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    "{:<12} --> 낙관적 업데이트로 인한 버전 충돌: 재시도",
                    "Command"
                );
                retries += 1;
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(AuctionError::MaxRetriesExceeded)
}

/// 2. 현재 선두 조회 (읽기 전용)
pub async fn winning_bid(store: &dyn AuctionStore, lot_id: i64) -> Result<Option<Bid>> {
    store.winning_bid(lot_id).await
}
// endregion: --- Commands
