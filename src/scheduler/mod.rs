/// 로트 종료 스케줄러
/// 주기 스캔과 벽시계 고정 스캔이 같은 진입점(run_scan)을 호출한다.
/// 스캔은 무상태이며 레플리카 간 조정은 전부 저장소 버전 가드로 이뤄지므로
/// 여러 프로세스가 동시에 돌아도 로트는 정확히 한 번만 터미널 상태가 된다.
/// 종료는 레벨 트리거: 한 번 놓친 틱이나 실패한 전이는 다음 스캔이 치유한다.
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::auction::model::{ListingStatus, Lot, LotStatus};
use crate::config::{EngineConfig, ReservePolicy};
use crate::error::Result;
use crate::notification::NotificationSink;
use crate::store::{AuctionStore, LotPatch};
use chrono::{DateTime, Days, TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// endregion: --- Imports

// region:    --- Scan Report
/// 스캔 1회 결과 집계
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// CLOSING 고착에서 복구한 로트 수
    pub reclaimed: usize,
    /// 낙찰 처리 수
    pub closed_sold: usize,
    /// 유찰 처리 수
    pub closed_unsold: usize,
    /// 다른 레플리카에 양보한 버전 충돌 수
    pub conflicts: usize,
    /// 전체 로트 터미널 도달로 닫힌 리스팅 수
    pub listings_closed: usize,
}
// endregion: --- Scan Report

// region:    --- Closing Scheduler
/// 스캔 1회 처리 상한
const SCAN_BATCH_LIMIT: i64 = 500;

pub struct ClosingScheduler {
    store: Arc<dyn AuctionStore>,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl ClosingScheduler {
    pub fn new(
        store: Arc<dyn AuctionStore>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// 스케줄러 시작: 고정 주기 루프 + 벽시계(자정 UTC) 고정 루프
    pub fn start(self: Arc<Self>) {
        let scheduler = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = interval(scheduler.config.scan_interval);
            // 지연된 틱은 큐잉하지 않고 합쳐서 한 번만 돈다
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scheduler.bounded_scan().await;
            }
        });

        let scheduler = self;
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let anchor = next_daily_anchor(now);
                let wait = (anchor - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                info!("{:<12} --> 벽시계 고정 스캔 실행", "Scheduler");
                scheduler.bounded_scan().await;
            }
        });
    }

    /// 데드라인이 걸린 스캔 1회. 실패해도 다음 틱은 계속 돈다.
    async fn bounded_scan(&self) {
        match timeout(self.config.scan_deadline, self.run_scan(Utc::now())).await {
            Ok(Ok(report)) => {
                debug!("{:<12} --> 스캔 완료: {:?}", "Scheduler", report);
            }
            Ok(Err(e)) => {
                error!("{:<12} --> 스캔 중 오류 발생: {:?}", "Scheduler", e);
            }
            Err(_) => {
                warn!("{:<12} --> 스캔 데드라인 초과, 다음 틱에 재시도", "Scheduler");
            }
        }
    }

    /// 종료 스캔 진입점
    /// 1) CLOSING 고착 로트를 워치독으로 복구
    /// 2) 종료 시각이 지난 ACTIVE 로트를 CLOSING으로 전이 후 확정
    /// 3) 로트가 전부 터미널인 리스팅을 닫음
    pub async fn run_scan(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut touched_listings = BTreeSet::new();

        // 1) 워치독: 전이 도중 죽은 프로세스가 남긴 CLOSING 로트 복구.
        //    확정 알림은 확정 CAS가 성공한 쪽에서만 나가므로 중복 발행이 없다.
        let cutoff = now - self.config.closing_watchdog;
        for lot in self.store.find_stuck_closing(cutoff).await? {
            let lot_id = lot.id;
            touched_listings.insert(lot.listing_id);
            match self.finalize_lot(lot, now, &mut report).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "{:<12} --> 고착 로트 {} 복구 실패: {:?}",
                        "Scheduler", lot_id, e
                    );
                }
            }
        }

        // 2) 종료 대상 로트 처리
        for lot in self.store.find_due_lots(now, SCAN_BATCH_LIMIT).await? {
            let lot_id = lot.id;
            touched_listings.insert(lot.listing_id);

            // ACTIVE -> CLOSING 원자 전이. 충돌이면 다른 레플리카가 처리 중.
            let closing = match self
                .store
                .update_lot(
                    lot.id,
                    lot.version,
                    LotPatch {
                        status: Some(LotStatus::Closing),
                        closing_since: Some(Some(now)),
                        ..LotPatch::default()
                    },
                )
                .await
            {
                Ok(closing) => closing,
                Err(e) if e.is_conflict() => {
                    debug!(
                        "{:<12} --> 로트 {} 전이 양보 (다른 레플리카)",
                        "Scheduler", lot_id
                    );
                    report.conflicts += 1;
                    continue;
                }
                Err(e) => {
                    // 로트는 ACTIVE로 남고 다음 스캔이 재시도한다
                    error!(
                        "{:<12} --> 로트 {} CLOSING 전이 실패: {:?}",
                        "Scheduler", lot_id, e
                    );
                    continue;
                }
            };

            if let Err(e) = self.finalize_lot(closing, now, &mut report).await {
                error!(
                    "{:<12} --> 로트 {} 확정 실패, 워치독이 복구 예정: {:?}",
                    "Scheduler", lot_id, e
                );
            }
        }

        // 3) 로트가 전부 터미널인 리스팅 닫기
        for listing_id in touched_listings {
            match self.close_listing_if_done(listing_id).await {
                Ok(true) => report.listings_closed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "{:<12} --> 리스팅 {} 종료 처리 실패: {:?}",
                        "Scheduler", listing_id, e
                    );
                }
            }
        }

        Ok(report)
    }

    /// CLOSING 로트를 실제 선두 입찰 상태를 재확인해 SOLD/UNSOLD로 확정한다.
    /// 알림은 확정 CAS 성공 후에만 내보낸다. (로트 + 터미널 상태당 최대 1회)
    async fn finalize_lot(
        &self,
        lot: Lot,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> Result<bool> {
        let winner = self.store.winning_bid(lot.id).await?;
        let reserve_met = lot.reserve_met();

        let (target, event) = match winner {
            Some(bid) if reserve_met => (
                LotStatus::Sold,
                AuctionEvent::LotWon {
                    lot_id: lot.id,
                    bidder_id: bid.bidder_id,
                    amount: bid.amount,
                    timestamp: now,
                },
            ),
            // reserve 미달 또는 무입찰은 유찰. 미달 구분은 정책에 따른다.
            _ => (
                LotStatus::Unsold,
                AuctionEvent::LotUnsold {
                    lot_id: lot.id,
                    reserve_met: match self.config.reserve_policy {
                        ReservePolicy::ReserveNotMet => reserve_met,
                        ReservePolicy::MarkUnsold => true,
                    },
                    timestamp: now,
                },
            ),
        };

        match self
            .store
            .update_lot(
                lot.id,
                lot.version,
                LotPatch {
                    status: Some(target),
                    closing_since: Some(None),
                    ..LotPatch::default()
                },
            )
            .await
        {
            Ok(_) => {
                match target {
                    LotStatus::Sold => report.closed_sold += 1,
                    _ => report.closed_unsold += 1,
                }
                info!(
                    "{:<12} --> 로트 {} 확정: {}",
                    "Scheduler",
                    lot.id,
                    target.as_str()
                );
                self.sink.emit(event).await?;
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                // 다른 레플리카가 먼저 확정함. 알림도 그쪽에서 나간다.
                report.conflicts += 1;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// 소속 로트가 전부 터미널이면 리스팅을 닫는다.
    async fn close_listing_if_done(&self, listing_id: i64) -> Result<bool> {
        let listing = self.store.get_listing(listing_id).await?;
        if listing.status != ListingStatus::Active {
            return Ok(false);
        }
        let lots = self.store.lots_of_listing(listing_id).await?;
        if lots.is_empty() || !lots.iter().all(|l| l.status.is_terminal()) {
            return Ok(false);
        }
        match self
            .store
            .update_listing_status(listing_id, listing.version, ListingStatus::Closed)
            .await
        {
            Ok(_) => {
                info!("{:<12} --> 리스팅 {} 종료", "Scheduler", listing_id);
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 다음 자정(UTC) 계산
fn next_daily_anchor(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Days::new(1);
    match tomorrow.and_hms_opt(0, 0, 0) {
        Some(naive) => Utc.from_utc_datetime(&naive),
        None => now + chrono::Duration::days(1),
    }
}
// endregion: --- Closing Scheduler
