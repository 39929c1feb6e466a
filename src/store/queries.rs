/// Postgres 저장소 쿼리 모음

/// 리스팅 생성
pub const INSERT_LISTING: &str = r#"
    INSERT INTO listings (auction_end_date, status, version, created_at)
    VALUES ($1, $2, 1, now())
    RETURNING id, auction_end_date, status, version, created_at
"#;

/// 리스팅 조회
pub const GET_LISTING: &str =
    "SELECT id, auction_end_date, status, version, created_at FROM listings WHERE id = $1";

/// 리스팅 상태 전이 (버전 가드)
pub const UPDATE_LISTING_STATUS: &str = r#"
    UPDATE listings SET status = $3, version = version + 1
    WHERE id = $1 AND version = $2
    RETURNING id, auction_end_date, status, version, created_at
"#;

/// 리스팅 존재 확인
pub const LISTING_EXISTS: &str = "SELECT 1 AS one FROM listings WHERE id = $1";

/// 로트 생성
pub const INSERT_LOT: &str = r#"
    INSERT INTO lots (listing_id, seq_index, lot_end_time, status, starting_price,
                      current_price, current_bidder, reserve_price, version, closing_since)
    VALUES ($1, $2, $3, 'ACTIVE', $4, $4, NULL, $5, 1, NULL)
    RETURNING id, listing_id, seq_index, lot_end_time, status, starting_price,
              current_price, current_bidder, reserve_price, version, closing_since
"#;

/// 로트 조회
pub const GET_LOT: &str = "SELECT id, listing_id, seq_index, lot_end_time, status, starting_price, \
     current_price, current_bidder, reserve_price, version, closing_since FROM lots WHERE id = $1";

/// 로트 부분 갱신 (버전 가드, 미지정 필드는 유지)
pub const UPDATE_LOT: &str = r#"
    UPDATE lots SET
        status = COALESCE($3, status),
        lot_end_time = COALESCE($4, lot_end_time),
        closing_since = CASE WHEN $5 THEN $6 ELSE closing_since END,
        version = version + 1
    WHERE id = $1 AND version = $2
    RETURNING id, listing_id, seq_index, lot_end_time, status, starting_price,
              current_price, current_bidder, reserve_price, version, closing_since
"#;

/// 로트 존재 확인
pub const LOT_EXISTS: &str = "SELECT 1 AS one FROM lots WHERE id = $1";

/// 종료 시각이 지난 ACTIVE 로트 (스케줄러 공정성을 위한 결정적 정렬)
pub const FIND_DUE_LOTS: &str = "SELECT id, listing_id, seq_index, lot_end_time, status, \
     starting_price, current_price, current_bidder, reserve_price, version, closing_since \
     FROM lots WHERE status = 'ACTIVE' AND lot_end_time <= $1 ORDER BY lot_end_time, id LIMIT $2";

/// CLOSING에 고착된 로트 (워치독)
pub const FIND_STUCK_CLOSING: &str = "SELECT id, listing_id, seq_index, lot_end_time, status, \
     starting_price, current_price, current_bidder, reserve_price, version, closing_since \
     FROM lots WHERE status = 'CLOSING' AND (closing_since IS NULL OR closing_since <= $1) ORDER BY id";

/// 리스팅 소속 로트
pub const LOTS_OF_LISTING: &str = "SELECT id, listing_id, seq_index, lot_end_time, status, \
     starting_price, current_price, current_bidder, reserve_price, version, closing_since \
     FROM lots WHERE listing_id = $1 ORDER BY seq_index";

/// 선두 캐시 교체 (입찰 트랜잭션 내부)
pub const UPDATE_LOT_LEADER: &str = r#"
    UPDATE lots SET current_price = $2, current_bidder = $3, version = version + 1
    WHERE id = $1
"#;

/// 행 잠금 로트 조회 (입찰 트랜잭션 내부)
pub const GET_LOT_FOR_UPDATE: &str = "SELECT id, listing_id, seq_index, lot_end_time, status, \
     starting_price, current_price, current_bidder, reserve_price, version, closing_since \
     FROM lots WHERE id = $1 FOR UPDATE";

/// 입찰 기록
pub const INSERT_BID: &str = r#"
    INSERT INTO bids (lot_id, bidder_id, amount, placed_at)
    VALUES ($1, $2, $3, $4)
    RETURNING id, lot_id, bidder_id, amount, placed_at
"#;

/// 선두 입찰 조회 (캐시와 일치하는 가장 이른 입찰)
pub const GET_LEADER_BID: &str = r#"
    SELECT id, lot_id, bidder_id, amount, placed_at FROM bids
    WHERE lot_id = $1 AND bidder_id = $2 AND amount = $3
    ORDER BY placed_at ASC LIMIT 1
"#;

/// 입찰 이력 조회
pub const GET_BID_HISTORY: &str = r#"
    SELECT id, lot_id, bidder_id, amount, placed_at
    FROM bids
    WHERE lot_id = $1
    ORDER BY placed_at DESC
"#;

/// 프로모션 생성
pub const INSERT_PROMOTION: &str = r#"
    INSERT INTO promotions (listing_id, status, payment_status, version, created_at, updated_at)
    VALUES ($1, 'PENDING', 'UNPAID', 1, $2, $2)
    RETURNING id, listing_id, status, payment_status, version, created_at, updated_at
"#;

/// 프로모션 조회
pub const GET_PROMOTION: &str = "SELECT id, listing_id, status, payment_status, version, \
     created_at, updated_at FROM promotions WHERE id = $1";

/// 프로모션 부분 갱신 (버전 가드)
pub const UPDATE_PROMOTION: &str = r#"
    UPDATE promotions SET
        status = COALESCE($3, status),
        payment_status = COALESCE($4, payment_status),
        updated_at = COALESCE($5, updated_at),
        version = version + 1
    WHERE id = $1 AND version = $2
    RETURNING id, listing_id, status, payment_status, version, created_at, updated_at
"#;

/// 프로모션 존재 확인
pub const PROMOTION_EXISTS: &str = "SELECT 1 AS one FROM promotions WHERE id = $1";

/// 만료 스윕 대상 PENDING 프로모션
pub const FIND_STALE_PENDING: &str = "SELECT id, listing_id, status, payment_status, version, \
     created_at, updated_at FROM promotions \
     WHERE status = 'PENDING' AND created_at <= $1 ORDER BY id";

/// 웹훅 이벤트 id 조회 (기록 없이)
pub const WEBHOOK_EVENT_SEEN: &str = "SELECT 1 AS one FROM webhook_events WHERE event_id = $1";

/// 웹훅 이벤트 id 기록 (재전달이면 행 없음)
pub const RECORD_WEBHOOK_EVENT: &str = r#"
    INSERT INTO webhook_events (event_id, received_at)
    VALUES ($1, now())
    ON CONFLICT (event_id) DO NOTHING
    RETURNING event_id
"#;
