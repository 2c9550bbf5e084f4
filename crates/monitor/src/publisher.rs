//! Publicação UDP do snapshot para uma camada de apresentação externa.

use bms_core::config::PublishConfig;
use bms_core::publish::{SnapshotFrame, encode_frame};
use std::net::UdpSocket;
use tracing::{debug, error, info, warn};

pub struct SnapshotPublisher {
    sock: UdpSocket,
    dest_addr: String,
}

impl SnapshotPublisher {
    pub fn new(config: &PublishConfig) -> std::io::Result<Self> {
        let bind = if config.bind_ip.is_empty() {
            "0.0.0.0:0".to_string()
        } else {
            format!("{}:0", config.bind_ip)
        };
        let sock = UdpSocket::bind(bind)?;
        info!("Publicando snapshots para {}", config.dest_addr);
        Ok(Self {
            sock,
            dest_addr: config.dest_addr.clone(),
        })
    }

    pub fn publish(&self, frame: &SnapshotFrame) {
        match encode_frame(frame) {
            Ok(bytes) => match self.sock.send_to(&bytes, &self.dest_addr) {
                Ok(sent) => debug!("→ {sent} bytes para {}", self.dest_addr),
                Err(e) => warn!("Erro ao enviar snapshot: {e}"),
            },
            Err(e) => error!("Erro ao serializar snapshot: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::ConnectionState;
    use bms_core::publish::decode_frame;
    use std::time::Duration;

    #[test]
    fn frame_arrives_over_loopback() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let config = PublishConfig {
            enabled: true,
            dest_addr: listener.local_addr().unwrap().to_string(),
            bind_ip: "127.0.0.1".into(),
        };
        let publisher = SnapshotPublisher::new(&config).unwrap();

        let mut frame = SnapshotFrame {
            state: ConnectionState::Connected,
            ..Default::default()
        };
        frame.snapshot.voltages[3][4] = Some(3.91);
        publisher.publish(&frame);

        let mut buf = [0u8; 65536];
        let (size, _) = listener.recv_from(&mut buf).unwrap();
        let decoded = decode_frame(&buf[..size]).unwrap();
        assert_eq!(decoded, frame);
    }
}
