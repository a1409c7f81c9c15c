//! 지연 필터
//!
//! 누적 바이트가 임계값을 넘은 연결에서 청크 전달 전에 대기합니다.
//! 대기 횟수는 릴레이 수명 전체에서 `max_delays`로 제한됩니다.

use std::time::Duration;

use bytes::Bytes;
use tracing::info;

use super::{BoundedCounter, ByteCount, Filter, Outbound};

/// 누적 바이트 임계값을 넘은 뒤 청크 전달을 지연시키는 필터
#[derive(Debug)]
pub struct DelayFilter {
    threshold: u64,
    delay: Duration,
    delays: BoundedCounter,
}

impl DelayFilter {
    /// 새 필터를 생성합니다.
    ///
    /// # Arguments
    ///
    /// * `threshold` - 청크 처리 전 누적 바이트가 이 값을 초과하면 지연 대상
    /// * `delay` - 한 번의 지연 시간
    /// * `max_delays` - 릴레이 수명 동안 최대 지연 횟수
    pub fn new(threshold: u64, delay: Duration, max_delays: u32) -> Self {
        Self {
            threshold,
            delay,
            delays: BoundedCounter::new(max_delays),
        }
    }

    /// 지금까지 수행한(또는 진행 중인) 지연 횟수
    pub fn delays(&self) -> u32 {
        self.delays.get()
    }

    /// 한 번의 지연 시간
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Filter for DelayFilter {
    type Connection = ByteCount;

    fn begin_connection(&self) -> Self::Connection {
        ByteCount::default()
    }

    async fn on_outbound(&self, conn: &mut Self::Connection, chunk: Bytes) -> Outbound {
        // 대기 전에 횟수를 선점해야 동시 연결에서도 상한을 넘지 않음
        if conn.bytes() > self.threshold && self.delays.try_claim() {
            info!(
                bytes = conn.bytes(),
                delay_ms = self.delay.as_millis() as u64,
                delays = self.delays.get(),
                "delaying outbound chunk"
            );
            tokio::time::sleep(self.delay).await;
        }

        conn.add(chunk.len());
        Outbound::Forward(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn chunk(len: usize) -> Bytes {
        Bytes::from(vec![1u8; len])
    }

    #[tokio::test(start_paused = true)]
    async fn delays_after_threshold_and_keeps_counting() {
        let filter = DelayFilter::new(10, Duration::from_secs(20), 3);
        let mut conn = filter.begin_connection();

        let start = Instant::now();
        filter.on_outbound(&mut conn, chunk(11)).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        let start = Instant::now();
        let out = filter.on_outbound(&mut conn, chunk(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert_eq!(out, Outbound::Forward(chunk(5)));
        // 지연 여부와 관계없이 카운터는 갱신됨
        assert_eq!(conn.bytes(), 16);
        assert_eq!(filter.delays(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_count_is_shared_across_connections() {
        let filter = DelayFilter::new(0, Duration::from_secs(1), 3);

        for _ in 0..5 {
            let mut conn = filter.begin_connection();
            for _ in 0..4 {
                filter.on_outbound(&mut conn, chunk(8)).await;
            }
        }
        assert_eq!(filter.delays(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_delays_below_threshold() {
        let filter = DelayFilter::new(1024, Duration::from_secs(5), 3);
        let mut conn = filter.begin_connection();
        let start = Instant::now();
        for _ in 0..4 {
            filter.on_outbound(&mut conn, chunk(256)).await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(filter.delays(), 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sleeps_at_most_max_delays_in_total(
                max in 0u32..6,
                connections in 1usize..12,
                chunks_per_conn in 1usize..12,
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .start_paused(true)
                    .build()
                    .unwrap();
                let delay = Duration::from_secs(1);
                let filter = DelayFilter::new(4, delay, max);

                let elapsed = runtime.block_on(async {
                    let start = Instant::now();
                    for _ in 0..connections {
                        let mut conn = filter.begin_connection();
                        for _ in 0..chunks_per_conn {
                            filter.on_outbound(&mut conn, chunk(8)).await;
                        }
                    }
                    start.elapsed()
                });

                prop_assert!(filter.delays() <= max);
                prop_assert!(elapsed < delay * (max + 1));
            }
        }
    }
}
