/// 엔진 설정
/// 환경 변수에서 읽고, 없으면 기본값을 사용한다.
// region:    --- Imports
use chrono::Duration as ChronoDuration;
use std::time::Duration;

// endregion: --- Imports

// region:    --- Reserve Policy
/// 최저가(reserve) 미달 로트 처리 정책
/// 입찰이 있어도 reserve 미달이면 유찰 처리하되,
/// ReserveNotMet 정책에서는 유찰 이벤트에 미달 사실을 구분해 싣는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservePolicy {
    MarkUnsold,
    ReserveNotMet,
}

// endregion: --- Reserve Policy

// region:    --- Engine Config
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 종료 스캔 주기
    pub scan_interval: Duration,
    /// 스캔 1회 데드라인 (초과 시 중단하고 다음 틱에 재시도)
    pub scan_deadline: Duration,
    /// 로트 간 종료 시간 간격 (Δ, 기본 1분)
    pub lot_stagger: ChronoDuration,
    /// CLOSING 상태 고착 판정 워치독 (기본 5분)
    pub closing_watchdog: ChronoDuration,
    /// PENDING 프로모션 만료 타임아웃 (기본 24시간)
    pub promotion_timeout: ChronoDuration,
    /// 프로모션 만료 스윕 주기
    pub sweep_interval: Duration,
    /// 입찰 버전 충돌 인라인 재시도 한도
    pub bid_max_retries: u32,
    /// 최소 입찰 증가 단위
    pub min_increment: i64,
    /// reserve 미달 처리 정책
    pub reserve_policy: ReservePolicy,
    /// 웹훅 서명 공유 비밀키
    pub webhook_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            scan_deadline: Duration::from_secs(25),
            lot_stagger: ChronoDuration::minutes(1),
            closing_watchdog: ChronoDuration::minutes(5),
            promotion_timeout: ChronoDuration::hours(24),
            sweep_interval: Duration::from_secs(600),
            bid_max_retries: 5,
            min_increment: 1,
            reserve_policy: ReservePolicy::MarkUnsold,
            webhook_secret: "dev-secret".to_string(),
        }
    }
}

impl EngineConfig {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scan_interval: Duration::from_secs(env_i64("SCAN_INTERVAL_SECS", 30).max(1) as u64),
            scan_deadline: Duration::from_secs(env_i64("SCAN_DEADLINE_SECS", 25).max(1) as u64),
            lot_stagger: ChronoDuration::seconds(env_i64("LOT_STAGGER_SECS", 60).max(1)),
            closing_watchdog: ChronoDuration::seconds(env_i64("CLOSING_WATCHDOG_SECS", 300).max(1)),
            promotion_timeout: ChronoDuration::seconds(
                env_i64("PROMOTION_TIMEOUT_SECS", 24 * 3600).max(1),
            ),
            sweep_interval: Duration::from_secs(env_i64("SWEEP_INTERVAL_SECS", 600).max(1) as u64),
            bid_max_retries: env_i64("BID_MAX_RETRIES", 5).max(1) as u32,
            min_increment: env_i64("MIN_BID_INCREMENT", 1).max(1),
            reserve_policy: match std::env::var("RESERVE_POLICY").as_deref() {
                Ok("RESERVE_NOT_MET") => ReservePolicy::ReserveNotMet,
                _ => ReservePolicy::MarkUnsold,
            },
            webhook_secret: std::env::var("WEBHOOK_SECRET")
                .unwrap_or(defaults.webhook_secret),
        }
    }
}

/// 환경 변수 정수 파싱 (실패 시 기본값)
fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
// endregion: --- Engine Config
