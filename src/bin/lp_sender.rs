//! Large packet 송신 노드
//!
//! 루트(수신자)로 가는 경로가 자리잡을 때까지 기다린 뒤 페이로드를 등록하고
//! 주기적으로 Signal을 보낸다. 요청이 오면 바로 프래그먼트 전송을 시작한다.
//!
//! 사용법:
//!   cargo run --release --bin lp-sender -- --root <IP> [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin lp-sender -- --root 192.168.0.10 --interval 30

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use large_packet::{fragment_count_for, Config, Endpoint, Event, Role, MAX_PAYLOAD_BYTES};

const PAYLOAD: &str = concat!(
    "Lorem ipsum dolor sit amet, consectetaur adipisicing elit, sed do eiusmod tempor ",
    "incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis ",
    "nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo ",
    "consequat. Duis aute irure dolor in reprehenderit in voluptate velit esse cillum ",
    "dolore eu fugiat nulla pariatur. Excepteur sint occaecat cupidatat non ",
    "proident, sunt in culpa qui officia deserunt mollit anim id est laborum.\n",
    "Sed ut perspiciatis unde omnis iste natus error sit voluptatem accusantium ",
    "doloremque laudantium, totam rem aperiam, eaque ipsa quae ab illo inventore ",
    "veritatis et quasi architecto beatae vitae dicta sunt explicabo. Nemo enim ipsam ",
    "voluptatem quia voluptas sit aspernatur aut odit aut fugit, sed quia ",
    "consequuntur magni dolores eos qui ratione voluptatem sequi nesciunt. Neque ",
    "porro quisquam est, qui dolorem ipsum quia dolor sit amet, consectetur, adipisci ",
    "velit, sed quia non numquam eius modi tempora incidunt ut labore et dolore ",
    "magnam aliquam quaerat voluptatem. Ut enim ad minima veniam, quis nostrum ",
    "exercitationem ullam corporis suscipit laboriosam, nisi ut aliquid ex ea commodi ",
    "consequatur? Quis autem vel eum iure reprehenderit qui in ea voluptate velit ",
    "esse quam nihil molestiae consequatur, vel illum qui dolorem eum fugiat quo ",
    "voluptas nulla pariatur?\nAt vero eos et accusamus et iusto odio dignissimos ",
    "ducimus qui blanditiis praesentium voluptatum deleniti atque corrupti quos ",
    "dolores et quas molestias excepturi sint occaecati cupiditate non provident, ",
    "similique sunt in culpa qui officia deserunt mollitia animi, id est laborum et ",
    "dolorum fuga. Et harum quidem rerum facilis est et expedita distinctio. Nam ",
    "libero tempore, cum soluta nobis est eligendi optio cumque nihil impedit quo ",
    "minus id quod maxime placeat facere possimus, omnis voluptas assumenda est, ",
    "omnis dolor repellendus. Temporibus autem quibusdam et aut officiis debitis aut ",
    "rerum necessitatibus saepe eveniet ut et voluptates repudiandae sint et ",
    "molestiae non recusandae. Itaque earum rerum hic tenetur a sapiente delectus, ut ",
    "aut reiciendis voluptatibus maiores alias consequatur aut perferendis doloribus ",
    "asperiores repellat.\n",
);

/// 송신 노드 설정
struct SenderConfig {
    bind_addr: Option<SocketAddr>,
    root: Option<IpAddr>,
    interval: Duration,
    /// 첫 Signal 전 대기 (루트 → 노드 방향 경로 수립)
    route_delay: Duration,
    config: Config,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            root: None,
            interval: Duration::from_secs(180),
            route_delay: Duration::from_secs(40),
            config: Config::default(),
        }
    }
}

fn parse_args() -> SenderConfig {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

fn parse_args_from(args: &[String]) -> SenderConfig {
    let mut config = SenderConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = Some(args[i + 1].parse().expect("유효한 주소 필요"));
                    i += 1;
                }
            }
            "--root" | "-r" => {
                if i + 1 < args.len() {
                    config.root = Some(args[i + 1].parse().expect("유효한 IP 주소 필요"));
                    i += 1;
                }
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.interval = Duration::from_secs(secs.max(1));
                    i += 1;
                }
            }
            "--route-delay" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.route_delay = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.config.rx_port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"Large packet sender

페이로드를 등록하고 루트에 주기적으로 Signal을 보낸다.
루트가 요청하면 요청된 프래그먼트를 주기마다 하나씩 전송한다.

사용법:
  cargo run --release --bin lp-sender -- --root <IP> [OPTIONS]

옵션:
  -r, --root <IP>         수신자(루트) 주소 (필수)
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:임의 포트)
  -p, --port <PORT>       수신자 포트 (기본: 1520)
  -i, --interval <SECS>   새 페이로드 알림 주기 (기본: 180)
  --route-delay <SECS>    첫 알림 전 경로 수립 대기 (기본: 40)
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

    let sender_config = parse_args();
    let Some(root) = sender_config.root else {
        error!("--root 주소가 필요합니다 (--help 참고)");
        std::process::exit(2);
    };

    let payload = PAYLOAD.as_bytes();
    if payload.len() > MAX_PAYLOAD_BYTES {
        error!("페이로드가 너무 큼: {} bytes", payload.len());
        std::process::exit(1);
    }

    info!("Large packet sender starting...");
    info!("Root address: {}", root);

    let (endpoint, mut events) = match sender_config.bind_addr {
        Some(addr) => Endpoint::bind_to(Role::Sender, sender_config.config, addr).await?,
        None => Endpoint::bind(Role::Sender, sender_config.config).await?,
    };
    if let Some(addr) = endpoint.local_addr() {
        info!("Bound to local address: {}", addr);
    }

    // 루트에 닿는다고 루트가 우리에게 닿는 것은 아니다
    if !sender_config.route_delay.is_zero() {
        info!(
            "Establishing downward route... ({}s)",
            sender_config.route_delay.as_secs()
        );
        tokio::time::sleep(sender_config.route_delay).await;
    }

    let fragment_count = fragment_count_for(payload.len());
    let mut packet_id: u16 = 0;
    let mut ticker = tokio::time::interval(sender_config.interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match endpoint.register_outbound(packet_id, payload) {
                    Ok(()) => {
                        if let Err(e) = endpoint.send_signal(root, packet_id, fragment_count) {
                            warn!("Signal 전송 실패: {}", e);
                        }
                    }
                    Err(e) => error!("페이로드 등록 실패: packet_id={}: {}", packet_id, e),
                }
                packet_id = packet_id.wrapping_add(1);
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::RequestReceived(request) => {
                        // 요청이 오면 진행 중인 송신을 교체하고 바로 전송
                        let result = endpoint.outbound().map(|mut record| {
                            record
                                .apply_request(&request)
                                .and_then(|()| endpoint.restart_send(record))
                        });
                        match result {
                            Some(Ok(())) => {}
                            Some(Err(e)) => warn!("요청 처리 실패: {}", e),
                            None => warn!("등록된 페이로드 없음, 요청 무시"),
                        }
                    }
                    Event::SendComplete { packet_id } => {
                        info!("송신 완료: packet_id={}", packet_id);
                    }
                    Event::SendFailed { packet_id, error } => {
                        warn!("송신 실패: packet_id={}: {}", packet_id, error);
                    }
                    other => debug!("이벤트: {:?}", other),
                }
            }
        }
    }

    endpoint.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("lp-sender")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_default_waits_for_route() {
        let config = parse_args_from(&args(&["--root", "10.0.0.1"]));
        assert_eq!(config.route_delay, Duration::from_secs(40));
        assert_eq!(config.interval, Duration::from_secs(180));
        assert_eq!(config.root, Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_route_delay_flag() {
        let config = parse_args_from(&args(&[
            "--root",
            "10.0.0.1",
            "--route-delay",
            "0",
            "--interval",
            "5",
        ]));
        assert!(config.route_delay.is_zero());
        assert_eq!(config.interval, Duration::from_secs(5));
    }
}
