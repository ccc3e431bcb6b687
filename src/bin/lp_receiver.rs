//! Large packet 수신 노드 (루트)
//!
//! Signal을 받으면 바로 전체 마스크를 요청하고, 조립이 끝난 페이로드를 출력한다.
//!
//! 사용법:
//!   cargo run --release --bin lp-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 재전송 경로 확인 (프래그먼트 20% 폐기)
//!   cargo run --release --bin lp-receiver -- --fault-rate 20

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use large_packet::{Config, Endpoint, Event, Role};

/// 수신 노드 설정
struct ReceiverConfig {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let config = Config::default();
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.rx_port),
            config,
        }
    }
}

fn parse_args() -> ReceiverConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ReceiverConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    config.config.rx_port = config.bind_addr.port();
                    i += 1;
                }
            }
            "--period" => {
                if i + 1 < args.len() {
                    config.config.request_period_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--fault-rate" => {
                if i + 1 < args.len() {
                    let percent: u8 = args[i + 1].parse().expect("0~100 사이 숫자 필요");
                    config.config = config.config.with_fault_injection(percent);
                    i += 1;
                }
            }
            "--strict-peer" => {
                config.config.match_peer_address = true;
            }
            "--unstable" => {
                let bind_addr = config.bind_addr;
                config.config = Config {
                    rx_port: bind_addr.port(),
                    ..Config::unstable_network()
                };
            }
            "--help" | "-h" => {
                println!(
                    r#"Large packet receiver

Signal에 요청으로 응답하고, 조립된 페이로드를 출력한다.

사용법:
  cargo run --release --bin lp-receiver -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:1520)
  --period <MS>           요청할 프래그먼트 간격 (기본: 800)
  --fault-rate <PERCENT>  수신 프래그먼트 폐기 비율, 테스트용 (기본: 0)
  --strict-peer           다른 주소에서 온 프래그먼트 무시
  --unstable              불안정한 링크용 설정
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => {
                warn!("알 수 없는 옵션 무시: {}", other);
            }
        }
        i += 1;
    }

    config
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG로 조정)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let receiver_config = parse_args();

    info!("Large packet receiver starting...");
    if receiver_config.config.fault_rate_percent > 0 {
        warn!(
            "결함 주입 활성화: 프래그먼트 {}% 폐기",
            receiver_config.config.fault_rate_percent
        );
    }

    let (endpoint, mut events) = Endpoint::bind_to(
        Role::Receiver,
        receiver_config.config,
        receiver_config.bind_addr,
    )
    .await?;

    while let Some(event) = events.recv().await {
        match event {
            Event::SignalReceived(signal) => {
                info!(
                    "Signal: packet_id={}, {} fragments from {}",
                    signal.packet_id, signal.fragment_count, signal.source
                );
                if let Err(e) = endpoint.start_receive(&signal, None) {
                    warn!("수신 시작 실패: packet_id={}: {}", signal.packet_id, e);
                }
            }
            Event::FragmentReceived {
                packet_id,
                index,
                fragment_count,
                source,
            } => {
                debug!(
                    "프래그먼트 수신: packet_id={}, {}/{} from {}",
                    packet_id,
                    usize::from(index) + 1,
                    fragment_count,
                    source
                );
            }
            Event::TransferComplete(done) => {
                println!(
                    "Large packet received, {} bytes (packet_id={}, from {})",
                    done.payload.len(),
                    done.packet_id,
                    done.peer
                );
                println!("{}", String::from_utf8_lossy(&done.payload));
            }
            Event::ReceiveAborted { packet_id, error } => {
                warn!("수신 실패: packet_id={}: {}", packet_id, error);
            }
            other => debug!("이벤트: {:?}", other),
        }
    }

    endpoint.shutdown();
    Ok(())
}
