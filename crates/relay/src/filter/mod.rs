//! 연결별 필터 파이프라인
//!
//! 필터는 두 단계의 상태를 가집니다.
//! - 공유 상태: 필터 인스턴스(`&self`)에 있으며 릴레이 수명 동안 모든 연결이 공유합니다.
//!   영향을 줄 연결 수를 제한하는 카운터 등이 여기에 속합니다.
//! - 연결 상태: [`Filter::begin_connection`]이 새 연결마다 새로 만드는 레코드입니다.
//!
//! # 구현체
//! - [`PassThrough`]: 모든 청크를 그대로 전달
//! - [`InterruptFilter`]: 누적 바이트가 임계값을 넘은 연결을 끊음
//! - [`DelayFilter`]: 누적 바이트가 임계값을 넘은 연결의 청크를 지연

pub mod delay;
pub mod interrupt;

pub use delay::DelayFilter;
pub use interrupt::InterruptFilter;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

/// 아웃바운드 청크 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// 이 청크(변형되었을 수 있음)를 업스트림으로 전달
    Forward(Bytes),
    /// 즉시 전달을 멈추고 연결을 닫음. 되돌릴 수 없습니다.
    Terminate,
}

/// 릴레이에 주입되는 연결별 필터
///
/// 릴레이는 연결을 수락할 때마다 [`begin_connection`](Self::begin_connection)을
/// 한 번 호출하고, 이후 클라이언트 → 업스트림 방향의 청크마다
/// [`on_outbound`](Self::on_outbound)를 호출합니다.
///
/// `on_outbound`가 반환하는 future는 해당 연결의 복사 경로 안에서만 대기하므로
/// 지연 필터가 다른 연결의 수락이나 중계를 막지 않습니다.
pub trait Filter: Send + Sync + 'static {
    /// 연결마다 초기화되는 상태
    type Connection: Send + 'static;

    /// 새 연결의 상태를 만듭니다. 공유 상태는 건드리지 않습니다.
    fn begin_connection(&self) -> Self::Connection;

    /// 아웃바운드 청크 하나를 처리합니다.
    fn on_outbound(
        &self,
        conn: &mut Self::Connection,
        chunk: Bytes,
    ) -> impl Future<Output = Outbound> + Send;
}

/// 연결 상태: 이 연결에서 지금까지 필터가 센 바이트 수
///
/// 값은 줄어들지 않습니다.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCount {
    bytes: u64,
}

impl ByteCount {
    /// 현재까지 센 바이트 수
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn add(&mut self, len: usize) {
        self.bytes = self.bytes.saturating_add(len as u64);
    }
}

/// 모든 청크를 그대로 전달하는 필터
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Filter for PassThrough {
    type Connection = ByteCount;

    fn begin_connection(&self) -> Self::Connection {
        ByteCount::default()
    }

    async fn on_outbound(&self, conn: &mut Self::Connection, chunk: Bytes) -> Outbound {
        conn.add(chunk.len());
        Outbound::Forward(chunk)
    }
}

/// 상한이 있는 공유 카운터
///
/// 여러 연결이 동시에 증가를 시도해도 `max`를 넘지 않도록
/// 비교와 증가를 하나의 원자 연산으로 수행합니다.
#[derive(Debug)]
pub(crate) struct BoundedCounter {
    count: AtomicU32,
    max: u32,
}

impl BoundedCounter {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            max,
        }
    }

    /// 상한 미만이면 1 증가시키고 `true`를 반환합니다.
    pub(crate) fn try_claim(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    pub(crate) fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn max(&self) -> u32 {
        self.max
    }
}
