//! 연결 끊기 필터
//!
//! 누적 바이트가 임계값을 넘은 연결을 끊습니다. 릴레이 수명 동안
//! 처음 `max_closures`개의 연결만 끊고, 이후 연결은 데이터 양과 상관없이
//! 그대로 통과시킵니다.

use bytes::Bytes;
use tracing::info;

use super::{BoundedCounter, ByteCount, Filter, Outbound};

/// 누적 바이트 임계값을 넘은 연결을 끊는 필터
#[derive(Debug)]
pub struct InterruptFilter {
    threshold: u64,
    closures: BoundedCounter,
}

impl InterruptFilter {
    /// 새 필터를 생성합니다.
    ///
    /// # Arguments
    ///
    /// * `threshold` - 청크 처리 전 누적 바이트가 이 값을 초과하면 끊기 대상
    /// * `max_closures` - 릴레이 수명 동안 끊을 최대 연결 수
    pub fn new(threshold: u64, max_closures: u32) -> Self {
        Self {
            threshold,
            closures: BoundedCounter::new(max_closures),
        }
    }

    /// 지금까지 끊은 연결 수
    pub fn closures(&self) -> u32 {
        self.closures.get()
    }

    /// 설정된 최대 끊기 횟수
    pub fn max_closures(&self) -> u32 {
        self.closures.max()
    }
}

impl Filter for InterruptFilter {
    type Connection = ByteCount;

    fn begin_connection(&self) -> Self::Connection {
        ByteCount::default()
    }

    async fn on_outbound(&self, conn: &mut Self::Connection, chunk: Bytes) -> Outbound {
        // 이번 청크를 세기 전의 값과 비교. 끊는 경우 카운터는 갱신하지 않음
        if conn.bytes() > self.threshold && self.closures.try_claim() {
            info!(
                bytes = conn.bytes(),
                threshold = self.threshold,
                closures = self.closures.get(),
                "interrupting connection"
            );
            return Outbound::Terminate;
        }

        conn.add(chunk.len());
        Outbound::Forward(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[tokio::test]
    async fn forwards_until_threshold_exceeded() {
        let filter = InterruptFilter::new(10, 3);
        let mut conn = filter.begin_connection();

        // 0 -> 6 -> 12: 비교는 청크 처리 전 값으로 수행
        assert!(matches!(
            filter.on_outbound(&mut conn, chunk(6)).await,
            Outbound::Forward(_)
        ));
        assert!(matches!(
            filter.on_outbound(&mut conn, chunk(6)).await,
            Outbound::Forward(_)
        ));
        assert_eq!(conn.bytes(), 12);

        assert_eq!(
            filter.on_outbound(&mut conn, chunk(6)).await,
            Outbound::Terminate
        );
        // 끊는 분기에서는 카운터가 갱신되지 않음
        assert_eq!(conn.bytes(), 12);
        assert_eq!(filter.closures(), 1);
    }

    #[tokio::test]
    async fn threshold_comparison_is_strict() {
        let filter = InterruptFilter::new(10, 3);
        let mut conn = filter.begin_connection();

        filter.on_outbound(&mut conn, chunk(10)).await;
        assert_eq!(conn.bytes(), 10);
        // 10 > 10 은 거짓이므로 전달
        assert!(matches!(
            filter.on_outbound(&mut conn, chunk(1)).await,
            Outbound::Forward(_)
        ));
        assert_eq!(
            filter.on_outbound(&mut conn, chunk(1)).await,
            Outbound::Terminate
        );
    }

    #[tokio::test]
    async fn only_first_max_closures_connections_are_cut() {
        let filter = InterruptFilter::new(0, 3);

        for expected in 1..=3 {
            let mut conn = filter.begin_connection();
            filter.on_outbound(&mut conn, chunk(1)).await;
            assert_eq!(
                filter.on_outbound(&mut conn, chunk(1)).await,
                Outbound::Terminate
            );
            assert_eq!(filter.closures(), expected);
        }

        // 네 번째 연결은 데이터 양과 무관하게 통과
        let mut conn = filter.begin_connection();
        for _ in 0..100 {
            assert!(matches!(
                filter.on_outbound(&mut conn, chunk(1024)).await,
                Outbound::Forward(_)
            ));
        }
        assert_eq!(conn.bytes(), 100 * 1024);
        assert_eq!(filter.closures(), 3);
    }

    #[tokio::test]
    async fn begin_connection_resets_only_connection_state() {
        let filter = InterruptFilter::new(4, 5);
        let mut first = filter.begin_connection();
        filter.on_outbound(&mut first, chunk(5)).await;
        assert_eq!(
            filter.on_outbound(&mut first, chunk(1)).await,
            Outbound::Terminate
        );

        let second = filter.begin_connection();
        assert_eq!(second.bytes(), 0);
        assert_eq!(filter.closures(), 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn block_on<F: std::future::Future>(f: F) -> F::Output {
            tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
                .block_on(f)
        }

        proptest! {
            #[test]
            fn terminates_iff_prior_bytes_exceed_threshold(
                threshold in 0u64..4096,
                prior in 0usize..8192,
                chunk_len in 1usize..2048,
            ) {
                let filter = InterruptFilter::new(threshold, 1);
                let mut conn = filter.begin_connection();
                let out = block_on(async {
                    if prior > 0 {
                        // 첫 청크는 누적 0에서 비교되므로 항상 전달
                        filter.on_outbound(&mut conn, chunk(prior)).await;
                    }
                    filter.on_outbound(&mut conn, chunk(chunk_len)).await
                });
                let expect_terminate = prior as u64 > threshold;
                prop_assert_eq!(out == Outbound::Terminate, expect_terminate);
            }

            #[test]
            fn closures_never_exceed_max(
                max in 0u32..8,
                connections in 0usize..32,
                chunks in prop::collection::vec(1usize..64, 1..16),
            ) {
                let filter = InterruptFilter::new(16, max);
                block_on(async {
                    for _ in 0..connections {
                        let mut conn = filter.begin_connection();
                        for len in &chunks {
                            if filter.on_outbound(&mut conn, chunk(*len)).await == Outbound::Terminate {
                                break;
                            }
                        }
                    }
                });
                prop_assert!(filter.closures() <= max);
            }
        }
    }
}
