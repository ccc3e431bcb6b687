//! Large packet 엔드포인트
//!
//! 역할(송신/수신)마다 전송 하나만 진행한다.
//! - 송신: 페이로드 등록 → Signal → 요청 수신 → 주기마다 프래그먼트 전송
//! - 수신: Signal 수신 → 전체 마스크 요청 → 조립, 타임아웃 시 누락분 재요청
//!
//! 새 송신/수신이 시작되면 진행 중이던 것은 즉시 취소된다.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::event::{Event, EventReceiver, RequestEvent, SignalEvent};
use crate::mask::FragmentMask;
use crate::message::{MessageType, RequestMessage, SignalMessage};
use crate::receiver::FragmentReceiver;
use crate::sender::{FragmentSender, SendGate};
use crate::transfer::TransferRecord;
use crate::transport::{is_transient_recv_error, Transport, UdpTransport};
use crate::{Config, Error, Result};

/// 일시적 수신 에러 후 재시도 전 대기
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// 엔드포인트 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 페이로드를 등록하고 요청에 응답
    Sender,
    /// Signal에 응답해 페이로드를 받음 (rx_port에 바인딩)
    Receiver,
}

/// 엔드포인트 공유 상태
struct Shared {
    role: Role,
    config: Config,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<Event>,
    dispatcher: Dispatcher,

    /// 등록된 송신 레코드 (요청 반영 전 상태)
    outbound: Mutex<Option<TransferRecord>>,

    send_gate: SendGate,
    send_task: Mutex<Option<JoinHandle<()>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// 송신 세대를 올려 진행 중인 송신을 무효화
    ///
    /// `send_task` 잠금을 쥔 상태에서 호출해야 한다.
    fn cancel_send_locked(&self, task: &mut Option<JoinHandle<()>>) {
        *self.send_gate.lock() += 1;
        if let Some(handle) = task.take() {
            if !handle.is_finished() {
                debug!("진행 중인 송신 취소");
            }
            handle.abort();
        }
    }

    fn cancel_receive_locked(&self, task: &mut Option<JoinHandle<()>>) {
        self.dispatcher.clear_session();
        if let Some(handle) = task.take() {
            if !handle.is_finished() {
                debug!("진행 중인 수신 취소");
            }
            handle.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for task in [&self.send_task, &self.receive_task, &self.listener] {
            if let Some(handle) = task.lock().take() {
                handle.abort();
            }
        }
    }
}

/// Large packet 엔드포인트
///
/// 복제해도 같은 상태를 공유한다.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Shared>,
}

impl Endpoint {
    /// 주어진 전송 계층으로 엔드포인트 생성
    ///
    /// 수신 데이터그램은 호출자가 [`Endpoint::handle_datagram`]으로 넘겨야 한다.
    pub fn new(role: Role, config: Config, transport: Arc<dyn Transport>) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_depth.max(1));

        let inner = Arc::new(Shared {
            role,
            config,
            transport,
            dispatcher: Dispatcher::new(events_tx.clone()),
            events: events_tx,
            outbound: Mutex::new(None),
            send_gate: Arc::new(Mutex::new(0)),
            send_task: Mutex::new(None),
            receive_task: Mutex::new(None),
            listener: Mutex::new(None),
        });

        (Self { inner }, events_rx)
    }

    /// UDP 소켓을 열고 수신 루프 시작
    ///
    /// 수신자는 `0.0.0.0:rx_port`, 송신자는 임의 포트에 바인딩한다.
    pub async fn bind(role: Role, config: Config) -> Result<(Self, EventReceiver)> {
        let port = match role {
            Role::Receiver => config.rx_port,
            Role::Sender => 0,
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        Self::bind_to(role, config, addr).await
    }

    /// 지정한 주소에 바인딩
    pub async fn bind_to(
        role: Role,
        config: Config,
        addr: SocketAddr,
    ) -> Result<(Self, EventReceiver)> {
        let transport = UdpTransport::bind(addr).await?;
        let socket = transport.socket();
        let buffer_size = config.recv_buffer_size.max(1);

        let (endpoint, events) = Self::new(role, config, Arc::new(transport));
        let weak = Arc::downgrade(&endpoint.inner);

        let listener = tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            loop {
                let (len, source) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) if is_transient_recv_error(&e) => {
                        debug!("일시적 수신 에러: {}", e);
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                        continue;
                    }
                    Err(e) => {
                        warn!("수신 에러, 수신 루프 종료: {}", e);
                        break;
                    }
                };

                // 엔드포인트가 사라지면 종료
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.dispatcher.dispatch(&buf[..len], source).await;
            }
        });
        *endpoint.inner.listener.lock() = Some(listener);

        info!(
            "Large packet endpoint started: {:?} on {}",
            role,
            endpoint
                .local_addr()
                .map_or_else(|| addr.to_string(), |a| a.to_string())
        );

        Ok((endpoint, events))
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    /// 수신 데이터그램 처리 (전송 계층 콜백)
    pub async fn handle_datagram(&self, data: &[u8], source: SocketAddr) -> Option<MessageType> {
        self.inner.dispatcher.dispatch(data, source).await
    }

    // ---- 송신 ----

    /// 송신할 페이로드 등록
    ///
    /// 진행 중인 송신은 취소되고 레코드는 새로 만들어진다.
    pub fn register_outbound(&self, packet_id: u16, payload: &[u8]) -> Result<()> {
        let record = TransferRecord::outbound(packet_id, payload)?;
        let fragment_count = record.fragment_count();

        let mut task = self.inner.send_task.lock();
        self.inner.cancel_send_locked(&mut task);
        *self.inner.outbound.lock() = Some(record);

        info!(
            "송신 페이로드 등록: packet_id={}, {} bytes, {} fragments",
            packet_id,
            payload.len(),
            fragment_count
        );
        Ok(())
    }

    /// 등록된 송신 레코드 사본
    pub fn outbound(&self) -> Option<TransferRecord> {
        self.inner.outbound.lock().clone()
    }

    /// 요청을 등록된 레코드에 반영하고 송신 시작
    pub fn answer_request(&self, request: &RequestEvent) -> Result<()> {
        let mut record = self.outbound().ok_or(Error::NothingRegistered)?;
        record.apply_request(request)?;
        self.start_send(record)
    }

    /// 송신 시작
    ///
    /// 이미 진행 중인 송신이 있으면 `Busy`.
    pub fn start_send(&self, record: TransferRecord) -> Result<()> {
        self.launch_send(record, false)
    }

    /// 진행 중인 송신을 취소하고 새로 시작
    pub fn restart_send(&self, record: TransferRecord) -> Result<()> {
        self.launch_send(record, true)
    }

    fn launch_send(&self, record: TransferRecord, replace: bool) -> Result<()> {
        let packet_id = record.packet_id;
        let peer = record.peer.ok_or(Error::MissingPeer { packet_id })?;
        if self.inner.events.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let mut task = self.inner.send_task.lock();
        let active = task.as_ref().map_or(false, |handle| !handle.is_finished());
        if active && !replace {
            return Err(Error::Busy { packet_id });
        }
        self.inner.cancel_send_locked(&mut task);

        let generation = *self.inner.send_gate.lock();
        let sender = FragmentSender::new(
            record,
            peer,
            self.inner.transport.clone(),
            self.inner.send_gate.clone(),
            generation,
        );
        *task = Some(tokio::spawn(sender.run(self.inner.events.clone())));
        Ok(())
    }

    /// 진행 중인 송신 취소
    ///
    /// 반환 이후 취소된 송신의 프래그먼트는 더 이상 나가지 않는다.
    pub fn cancel_send(&self) {
        let mut task = self.inner.send_task.lock();
        self.inner.cancel_send_locked(&mut task);
    }

    pub fn is_sending(&self) -> bool {
        self.inner
            .send_task
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// 수신자(rx_port)에게 전송 준비 알림
    pub fn send_signal(&self, dest: IpAddr, packet_id: u16, fragment_count: u8) -> Result<()> {
        let dest = SocketAddr::new(dest, self.inner.config.rx_port);
        let signal = SignalMessage::new(packet_id, fragment_count);
        self.inner.transport.send_datagram(dest, &signal.to_bytes())?;

        debug!(
            "Signal 전송: packet_id={}, {} fragments to {}",
            packet_id, fragment_count, dest
        );
        Ok(())
    }

    // ---- 수신 ----

    /// 프래그먼트 요청 전송
    pub fn send_request(
        &self,
        dest: SocketAddr,
        packet_id: u16,
        mask: FragmentMask,
        period_ms: u16,
    ) -> Result<()> {
        let request = RequestMessage::new(packet_id, mask, period_ms);
        self.inner.transport.send_datagram(dest, &request.to_bytes())?;

        debug!(
            "Request 전송: packet_id={}, mask {}, period {}ms to {}",
            packet_id, mask, period_ms, dest
        );
        Ok(())
    }

    /// Signal에 응답해 수신 시작
    ///
    /// 이전 수신 세션은 취소된다. 주기를 지정하지 않으면 `request_period_ms`.
    pub fn start_receive(&self, signal: &SignalEvent, period_ms: Option<u16>) -> Result<()> {
        let period_ms = period_ms.unwrap_or(self.inner.config.request_period_ms);
        let record =
            TransferRecord::inbound(signal.packet_id, signal.fragment_count, signal.source, period_ms)?;
        if self.inner.events.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let mut task = self.inner.receive_task.lock();
        self.inner.cancel_receive_locked(&mut task);

        // 요청을 보내기 전에 세션을 연결해 첫 프래그먼트부터 받는다
        let (fragments_tx, fragments_rx) =
            mpsc::channel(self.inner.config.fragment_queue_depth.max(1));
        self.inner.dispatcher.set_session(fragments_tx);

        let receiver = FragmentReceiver::new(
            record,
            signal.source,
            self.inner.transport.clone(),
            self.inner.config.clone(),
        );
        *task = Some(tokio::spawn(
            receiver.run(fragments_rx, self.inner.events.clone()),
        ));
        drop(task);

        // 실패하면 재시도 경로에 맡긴다
        if let Err(e) = self.send_request(
            signal.source,
            signal.packet_id,
            FragmentMask::full(signal.fragment_count),
            period_ms,
        ) {
            warn!("초기 요청 전송 실패: packet_id={}: {}", signal.packet_id, e);
        }
        Ok(())
    }

    pub fn cancel_receive(&self) {
        let mut task = self.inner.receive_task.lock();
        self.inner.cancel_receive_locked(&mut task);
    }

    pub fn is_receiving(&self) -> bool {
        self.inner
            .receive_task
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// 모든 전송과 수신 루프 정지
    pub fn shutdown(&self) {
        self.cancel_send();
        self.cancel_receive();
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        info!("Large packet endpoint stopped");
    }
}
