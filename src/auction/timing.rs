/// 로트 종료 시각 파생
/// 리스팅의 auction_end_date에 순번 * Δ 만큼 간격을 둬서
/// 한 리스팅의 로트들이 같은 순간에 몰려 닫히지 않게 한다.
// region:    --- Imports
use crate::error::{AuctionError, Result};
use crate::store::{AuctionStore, LotPatch};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

// endregion: --- Imports

// region:    --- Time Derivation
/// 단일 로트 종료 시각: auction_end_date + index * Δ
pub fn lot_end_time(auction_end_date: DateTime<Utc>, index: i32, stagger: Duration) -> DateTime<Utc> {
    auction_end_date + stagger * index
}

/// 리스팅 전체 로트의 종료 시각 파생
/// 순수 함수. 같은 입력이면 항상 같은 결과 (재파생 안전).
/// auction_end_date 미설정은 입력 오류이며 기본값으로 대체하지 않는다.
pub fn derive_lot_end_times(
    listing_id: i64,
    auction_end_date: Option<DateTime<Utc>>,
    lot_count: usize,
    stagger: Duration,
) -> Result<Vec<DateTime<Utc>>> {
    let end_date = auction_end_date.ok_or(AuctionError::MissingEndDate(listing_id))?;
    Ok((0..lot_count)
        .map(|i| lot_end_time(end_date, i as i32, stagger))
        .collect())
}

/// 관리자 종료 시각 정정 백필
/// auction_end_date 수정 후 로트들의 lot_end_time을 재파생해 저장한다.
/// 정상 운영 경로가 아닌 보정 작업. 버전 가드로 기록하고 갱신 건수를 돌려준다.
pub async fn backfill_lot_end_times(
    store: &dyn AuctionStore,
    listing_id: i64,
    stagger: Duration,
) -> Result<usize> {
    let listing = store.get_listing(listing_id).await?;
    let end_date = listing
        .auction_end_date
        .ok_or(AuctionError::MissingEndDate(listing_id))?;

    let mut updated = 0;
    for lot in store.lots_of_listing(listing_id).await? {
        let derived = lot_end_time(end_date, lot.seq_index, stagger);
        if lot.lot_end_time == derived {
            continue;
        }
        store
            .update_lot(
                lot.id,
                lot.version,
                LotPatch {
                    lot_end_time: Some(derived),
                    ..LotPatch::default()
                },
            )
            .await?;
        updated += 1;
    }

    info!(
        "{:<12} --> 리스팅 {} 로트 종료 시각 백필 완료: {}건",
        "Timing", listing_id, updated
    );
    Ok(updated)
}
// endregion: --- Time Derivation
