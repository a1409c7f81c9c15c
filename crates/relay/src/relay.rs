//! 양방향 TCP 릴레이
//!
//! 로컬 포트에 바인드해 연결을 수락하고, 연결마다 업스트림 연결을 열어
//! 양방향으로 바이트를 복사합니다. 클라이언트 → 업스트림 방향만 필터를 거칩니다.
//!
//! 수락 루프와 연결 처리 태스크는 모두 [`TaskTracker`]에 등록되며,
//! [`Relay::stop`]은 모든 태스크가 끝날 때까지 반환하지 않습니다.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use metrics::counter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use autest_core::metrics as m;

use crate::config::RelaySettings;
use crate::error::RelayError;
use crate::filter::{Filter, Outbound};

/// 수락 실패 후 첫 재시도 간격
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
/// 수락 실패 재시도 간격 상한
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// 릴레이 누적 통계
///
/// 모든 값은 단조 증가합니다.
#[derive(Debug, Default)]
pub struct RelayStats {
    connections: AtomicU64,
    terminated: AtomicU64,
    bytes_outbound: AtomicU64,
    bytes_inbound: AtomicU64,
    accept_errors: AtomicU64,
}

impl RelayStats {
    /// 수락한 연결 수
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// 필터가 끊은 연결 수
    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }

    /// 클라이언트 → 업스트림으로 전달한 바이트 수
    pub fn bytes_outbound(&self) -> u64 {
        self.bytes_outbound.load(Ordering::Relaxed)
    }

    /// 업스트림 → 클라이언트로 전달한 바이트 수
    pub fn bytes_inbound(&self) -> u64 {
        self.bytes_inbound.load(Ordering::Relaxed)
    }

    /// 실패한 수락 시도 수
    pub fn accept_errors(&self) -> u64 {
        self.accept_errors.load(Ordering::Relaxed)
    }
}

/// 한 방향 복사가 끝난 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    /// 읽기 쪽이 EOF에 도달
    Eof,
    /// 필터가 연결 종료를 요청
    Terminated,
    /// 릴레이 종료 또는 반대 방향의 종료 요청
    Cancelled,
}

/// 실행 중인 릴레이
///
/// [`Relay::start`]가 반환된 시점에 리스너는 이미 바인드되어 있습니다.
/// `stop` 없이 drop되면 모든 태스크에 취소를 알립니다.
pub struct Relay {
    local_addr: SocketAddr,
    upstream_addr: String,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Arc<RelayStats>,
}

impl Relay {
    /// 릴레이를 시작합니다.
    ///
    /// 리스너를 바인드한 뒤 수락 루프를 백그라운드 태스크로 띄우고 곧바로 반환합니다.
    /// 필터 인스턴스 하나가 이 릴레이의 모든 연결에 공유됩니다.
    ///
    /// # Errors
    ///
    /// 바인드에 실패하면 `RelayError::Bind`를 반환합니다.
    pub async fn start<F: Filter>(settings: RelaySettings, filter: F) -> Result<Self, RelayError> {
        let listener =
            TcpListener::bind(&settings.bind_addr)
                .await
                .map_err(|e| RelayError::Bind {
                    addr: settings.bind_addr.clone(),
                    reason: e.to_string(),
                })?;
        let local_addr = listener.local_addr()?;

        info!(
            listen = %local_addr,
            upstream = %settings.upstream_addr,
            "relay listening"
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let stats = Arc::new(RelayStats::default());
        let upstream_addr = settings.upstream_addr.clone();

        tracker.spawn(accept_loop(
            listener,
            settings,
            Arc::new(filter),
            cancel.clone(),
            tracker.clone(),
            Arc::clone(&stats),
        ));

        Ok(Self {
            local_addr,
            upstream_addr,
            cancel,
            tracker,
            stats,
        })
    }

    /// 실제로 바인드된 로컬 주소 (포트 0으로 바인드한 경우 유용)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 업스트림 주소
    pub fn upstream_addr(&self) -> &str {
        &self.upstream_addr
    }

    /// 누적 통계
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// 릴레이를 멈춥니다.
    ///
    /// 리스너를 닫고 모든 활성 연결을 끊은 뒤, 모든 연결 태스크가 끝날 때까지
    /// 기다립니다. 여러 번 호출해도 안전합니다.
    pub async fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(listen = %self.local_addr, "stopping relay");
        }
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(
            listen = %self.local_addr,
            connections = self.stats.connections(),
            terminated = self.stats.terminated(),
            "relay stopped"
        );
    }

    /// 수락 루프와 모든 연결 태스크가 끝났는지 확인합니다.
    pub fn is_stopped(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.tracker.close();
    }
}

/// 수락 루프가 연결을 받아오는 소스
trait Acceptor: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = std::io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = std::io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// 연속된 수락 실패에 대한 지수 백오프
///
/// EMFILE처럼 리스너가 계속 readable인 채로 실패하는 경우 루프가 바쁘게
/// 돌지 않도록 합니다. 수락에 성공하면 초기화됩니다.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            next: ACCEPT_BACKOFF_MIN,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = ACCEPT_BACKOFF_MIN;
    }
}

async fn accept_loop<A: Acceptor, F: Filter>(
    listener: A,
    settings: RelaySettings,
    filter: Arc<F>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Arc<RelayStats>,
) {
    let mut backoff = AcceptBackoff::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("relay accept loop received shutdown signal");
                break;
            }
            result = listener.accept() => {
                let (client, peer) = match result {
                    Ok(accepted) => {
                        backoff.reset();
                        accepted
                    }
                    Err(e) => {
                        let err = RelayError::Accept(e.to_string());
                        stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                        let delay = backoff.next_delay();
                        warn!(error = %err, retry_in = ?delay, "relay accept failed, backing off");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                };

                stats.connections.fetch_add(1, Ordering::Relaxed);
                counter!(m::RELAY_CONNECTIONS_TOTAL).increment(1);
                debug!(%peer, "relay accepted connection");

                let filter = Arc::clone(&filter);
                let upstream_addr = settings.upstream_addr.clone();
                let buffer_size = settings.buffer_size;
                let conn_cancel = cancel.child_token();
                let stats = Arc::clone(&stats);

                tracker.spawn(async move {
                    if let Err(e) = handle_connection(
                        client,
                        &upstream_addr,
                        filter.as_ref(),
                        buffer_size,
                        conn_cancel,
                        &stats,
                    )
                    .await
                    {
                        warn!(%peer, error = %e, "relay connection error");
                    }
                });
            }
        }
    }
    // 리스너는 여기서 drop되어 소켓이 닫힘
}

/// 연결 하나를 처리합니다.
///
/// 업스트림에 연결한 뒤 필터 연결 상태를 초기화하고 두 방향을 동시에 복사합니다.
/// 필터가 종료를 요청하면 연결 토큰을 취소해 반대 방향도 즉시 멈춥니다.
async fn handle_connection<F: Filter>(
    client: TcpStream,
    upstream_addr: &str,
    filter: &F,
    buffer_size: usize,
    cancel: CancellationToken,
    stats: &RelayStats,
) -> Result<(), RelayError> {
    let upstream = tokio::select! {
        result = TcpStream::connect(upstream_addr) => result.map_err(|e| RelayError::Upstream {
            addr: upstream_addr.to_owned(),
            reason: e.to_string(),
        })?,
        _ = cancel.cancelled() => return Ok(()),
    };

    let mut conn_state = filter.begin_connection();
    let (client_rd, client_wr) = client.into_split();
    let (upstream_rd, upstream_wr) = upstream.into_split();

    let outbound = async {
        let end = pump_outbound(
            client_rd,
            upstream_wr,
            filter,
            &mut conn_state,
            buffer_size,
            &cancel,
            stats,
        )
        .await;
        if matches!(end, Ok(PumpEnd::Terminated)) {
            stats.terminated.fetch_add(1, Ordering::Relaxed);
            counter!(m::RELAY_TERMINATED_TOTAL).increment(1);
            cancel.cancel();
        }
        end
    };
    let inbound = pump_inbound(upstream_rd, client_wr, buffer_size, &cancel, stats);

    let (outbound_end, inbound_end) = tokio::join!(outbound, inbound);
    debug!(
        outbound = ?outbound_end,
        inbound = ?inbound_end,
        "relay connection closed"
    );

    outbound_end?;
    inbound_end?;
    Ok(())
}

/// 클라이언트 → 업스트림: 청크마다 필터를 거칩니다.
async fn pump_outbound<F: Filter>(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    filter: &F,
    conn_state: &mut F::Connection,
    buffer_size: usize,
    cancel: &CancellationToken,
    stats: &RelayStats,
) -> Result<PumpEnd, RelayError> {
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.reserve(buffer_size);
        let n = tokio::select! {
            result = reader.read_buf(&mut buf) => result?,
            _ = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
        };
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(PumpEnd::Eof);
        }

        let chunk = buf.split().freeze();
        let verdict = tokio::select! {
            verdict = filter.on_outbound(conn_state, chunk) => verdict,
            _ = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
        };

        match verdict {
            Outbound::Terminate => return Ok(PumpEnd::Terminated),
            Outbound::Forward(data) => {
                tokio::select! {
                    result = writer.write_all(&data) => result?,
                    _ = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
                }
                stats
                    .bytes_outbound
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                counter!(m::RELAY_BYTES_TOTAL, m::LABEL_DIRECTION => "outbound")
                    .increment(data.len() as u64);
            }
        }
    }
}

/// 업스트림 → 클라이언트: 필터 없이 그대로 전달합니다.
async fn pump_inbound(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    buffer_size: usize,
    cancel: &CancellationToken,
    stats: &RelayStats,
) -> Result<PumpEnd, RelayError> {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = tokio::select! {
            result = reader.read(&mut buf) => result?,
            _ = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
        };
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(PumpEnd::Eof);
        }

        tokio::select! {
            result = writer.write_all(&buf[..n]) => result?,
            _ = cancel.cancelled() => return Ok(PumpEnd::Cancelled),
        }
        stats.bytes_inbound.fetch_add(n as u64, Ordering::Relaxed);
        counter!(m::RELAY_BYTES_TOTAL, m::LABEL_DIRECTION => "inbound").increment(n as u64);
    }
}
