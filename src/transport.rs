//! 데이터그램 전송 계층 경계
//!
//! 프로토콜은 최선형(best-effort), 순서 없음, 크기 제한이 있는 데이터그램만 가정한다.
//! 주소 해석, 암호화, 메시 라우팅은 전송 계층의 몫이다.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::{Error, Result};

/// 데이터그램 송신 인터페이스
///
/// 무선 스택처럼 송신 결과를 즉시 돌려주는 비차단 호출이어야 한다.
pub trait Transport: Send + Sync + 'static {
    /// `dest`(주소 + 포트)로 데이터그램 하나 전송
    fn send_datagram(&self, dest: SocketAddr, bytes: &[u8]) -> Result<()>;

    /// 로컬 바인딩 주소 (알 수 없으면 None)
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// tokio UDP 소켓 기반 전송
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// 소켓 바인딩
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        // 첫 try_send_to 전에 쓰기 준비 상태를 받아 둔다
        socket.writable().await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// 수신 루프용 소켓 핸들
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

impl Transport for UdpTransport {
    fn send_datagram(&self, dest: SocketAddr, bytes: &[u8]) -> Result<()> {
        // 송신 버퍼가 가득 찬 경우(WouldBlock)도 실패로 보고한다
        self.socket
            .try_send_to(bytes, dest)
            .map(|_| ())
            .map_err(Error::TransportFailure)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

/// 재시도하면 회복되는 수신 에러인지 판별
///
/// ICMP 도달 불가로 인한 reset/refused, 인터럽트, 타임아웃은 일시적이다.
/// 그 외(소켓 닫힘, 잘못된 인자 등)는 수신 루프를 끝내야 한다.
pub fn is_transient_recv_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
pub(crate) mod mock {
    use std::io;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::Transport;
    use crate::message::Message;
    use crate::{Error, Result};

    /// 보낸 데이터그램을 기록하는 테스트용 전송
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
        fail: AtomicBool,
    }

    impl RecordingTransport {
        pub(crate) fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            self.sent.lock().clone()
        }

        /// 보낸 데이터그램을 디코딩해서 반환
        pub(crate) fn messages(&self) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .filter_map(|(_, bytes)| Message::decode(bytes).ok())
                .collect()
        }

        pub(crate) fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    impl Transport for RecordingTransport {
        fn send_datagram(&self, dest: SocketAddr, bytes: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::TransportFailure(io::Error::new(
                    io::ErrorKind::Other,
                    "link down",
                )));
            }
            self.sent.lock().push((dest, bytes.to_vec()));
            Ok(())
        }
    }
}
