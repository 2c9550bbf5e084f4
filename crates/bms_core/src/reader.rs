//! Thread serial que remonta linhas e entrega ao consumidor via channel.

use crate::config::SerialConfig;
use crate::connection::{self, SharedConnection};
use crate::protocol::{DecodeError, WireFormat};
use crate::transport::{LinkError, Transport};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Evento entregue pela thread serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Linha completa, sem terminador
    Line(Vec<u8>),
    /// Falha de I/O; a thread já encerrou
    LinkLost(String),
}

/// Parâmetros da thread de leitura.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub format: WireFormat,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    pub max_line_len: usize,
}

impl ReaderSettings {
    pub fn from_config(config: &SerialConfig) -> Self {
        Self {
            format: config.protocol,
            poll_interval: config.poll_interval(),
            queue_capacity: config.queue_capacity.max(1),
            max_line_len: config.max_line_len,
        }
    }
}

// ──────────────────────────────────────────────
// Contadores do link
// ──────────────────────────────────────────────

/// Contadores atualizados pela thread serial e pelo tick de consumo.
#[derive(Debug, Default)]
pub struct LinkStats {
    lines_received: AtomicU64,
    queue_overflow: AtomicU64,
    overlong_lines: AtomicU64,
    decode_too_short: AtomicU64,
    decode_malformed: AtomicU64,
    decode_out_of_bounds: AtomicU64,
    discarded_not_connected: AtomicU64,
}

/// Cópia dos contadores do link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatsSnapshot {
    pub lines_received: u64,
    pub queue_overflow: u64,
    pub overlong_lines: u64,
    pub decode_too_short: u64,
    pub decode_malformed: u64,
    pub decode_out_of_bounds: u64,
    pub discarded_not_connected: u64,
}

impl LinkStatsSnapshot {
    pub fn decode_errors(&self) -> u64 {
        self.decode_too_short + self.decode_malformed + self.decode_out_of_bounds
    }
}

impl LinkStats {
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            overlong_lines: self.overlong_lines.load(Ordering::Relaxed),
            decode_too_short: self.decode_too_short.load(Ordering::Relaxed),
            decode_malformed: self.decode_malformed.load(Ordering::Relaxed),
            decode_out_of_bounds: self.decode_out_of_bounds.load(Ordering::Relaxed),
            discarded_not_connected: self.discarded_not_connected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_decode_error(&self, error: &DecodeError) {
        let counter = match error {
            DecodeError::TooShort(_) => &self.decode_too_short,
            DecodeError::Malformed(_) => &self.decode_malformed,
            DecodeError::OutOfBounds { .. } => &self.decode_out_of_bounds,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_not_connected(&self, count: u64) {
        self.discarded_not_connected.fetch_add(count, Ordering::Relaxed);
    }
}

// ──────────────────────────────────────────────
// Framing
// ──────────────────────────────────────────────

/// Remonta o stream de bytes em linhas.
///
/// Linhas vazias (só espaço) são puladas. Uma linha que passa de
/// `max_len` é descartada inteira, até o próximo terminador.
#[derive(Debug)]
pub struct LineFramer {
    terminator: u8,
    max_len: usize,
    buf: Vec<u8>,
    discarding: bool,
    overlong: u64,
}

impl LineFramer {
    pub fn new(terminator: u8, max_len: usize) -> Self {
        Self {
            terminator,
            max_len,
            buf: Vec::with_capacity(max_len.min(1024)),
            discarding: false,
            overlong: 0,
        }
    }

    /// Consome bytes e retorna as linhas completas, em ordem.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == self.terminator {
                if !self.discarding && !self.buf.iter().all(u8::is_ascii_whitespace) {
                    lines.push(std::mem::take(&mut self.buf));
                }
                self.buf.clear();
                self.discarding = false;
            } else if self.discarding {
                continue;
            } else if self.buf.len() >= self.max_len {
                self.buf.clear();
                self.discarding = true;
                self.overlong += 1;
            } else {
                self.buf.push(byte);
            }
        }
        lines
    }

    /// Linhas descartadas por tamanho desde a última chamada.
    pub fn take_overlong(&mut self) -> u64 {
        std::mem::take(&mut self.overlong)
    }
}

// ──────────────────────────────────────────────
// Thread
// ──────────────────────────────────────────────

/// Handle da thread de leitura.
#[derive(Debug)]
pub struct ReaderHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// A thread já saiu do loop (falha de link ou consumidor encerrado).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Pede o encerramento e espera a thread terminar.
    ///
    /// Quem segura o `Receiver` deve soltá-lo antes, para não travar um
    /// envio pendente.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Thread serial terminou com panic");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Inicia a thread de leitura. Retorna o handle e o receiver do channel.
pub fn spawn_reader_thread(
    mut transport: Box<dyn Transport>,
    settings: ReaderSettings,
    connection: SharedConnection,
    stats: Arc<LinkStats>,
) -> Result<(ReaderHandle, Receiver<ReaderEvent>), LinkError> {
    let (tx, rx) = bounded::<ReaderEvent>(settings.queue_capacity);
    let running = Arc::new(AtomicBool::new(true));

    let thread = std::thread::Builder::new()
        .name("serial-reader".into())
        .spawn({
            let running = Arc::clone(&running);
            move || {
                reader_loop(transport.as_mut(), &settings, &tx, &connection, &stats, &running);
            }
        })?;

    Ok((
        ReaderHandle {
            running,
            thread: Some(thread),
        },
        rx,
    ))
}

fn reader_loop(
    transport: &mut dyn Transport,
    settings: &ReaderSettings,
    tx: &Sender<ReaderEvent>,
    connection: &SharedConnection,
    stats: &LinkStats,
    running: &AtomicBool,
) {
    let mut framer = LineFramer::new(settings.format.terminator(), settings.max_line_len);
    let mut buf = [0u8; 1024];
    info!("Thread serial iniciada ({})", settings.format);

    while running.load(Ordering::Relaxed) {
        match transport.read(&mut buf) {
            Ok(0) => std::thread::sleep(settings.poll_interval),
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    stats.lines_received.fetch_add(1, Ordering::Relaxed);
                    match tx.try_send(ReaderEvent::Line(line)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Consumidor lento: descarta em vez de travar a serial
                            stats.queue_overflow.fetch_add(1, Ordering::Relaxed);
                            debug!("Fila cheia, descartando linha");
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!("Consumidor encerrado, saindo da thread serial");
                            return;
                        }
                    }
                }
                let overlong = framer.take_overlong();
                if overlong > 0 {
                    stats.overlong_lines.fetch_add(overlong, Ordering::Relaxed);
                    debug!("{overlong} linha(s) longa(s) demais descartada(s)");
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                // Ocioso, continua
                std::thread::sleep(settings.poll_interval);
            }
            Err(e) => {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let reason = e.to_string();
                connection::lock(connection).link_lost(reason.clone());
                if tx.try_send(ReaderEvent::LinkLost(reason)).is_err() {
                    debug!("Não foi possível entregar LinkLost (fila cheia ou fechada)");
                }
                break;
            }
        }
    }

    info!("Thread serial encerrada");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, ConnectionState};
    use crate::transport::mock::MockTransport;
    use std::time::Instant;

    fn settings(format: WireFormat) -> ReaderSettings {
        ReaderSettings {
            format,
            poll_interval: Duration::from_millis(1),
            queue_capacity: 64,
            max_line_len: 32,
        }
    }

    fn recv(rx: &Receiver<ReaderEvent>) -> ReaderEvent {
        rx.recv_timeout(Duration::from_secs(2)).expect("evento não chegou")
    }

    #[test]
    fn framer_splits_across_chunks() {
        let mut framer = LineFramer::new(b'\n', 64);
        assert!(framer.push(b"V,1,1,3.").is_empty());
        let lines = framer.push(b"9\nT,1,1,25\n\n  \nI,0");
        assert_eq!(lines, vec![b"V,1,1,3.9".to_vec(), b"T,1,1,25".to_vec()]);
        assert_eq!(framer.push(b",0,1.5\n"), vec![b"I,0,0,1.5".to_vec()]);
    }

    #[test]
    fn framer_drops_overlong_line_only() {
        let mut framer = LineFramer::new(b'\r', 8);
        let lines = framer.push(b"t700123456789ABCDEF\rt701\r");
        assert_eq!(lines, vec![b"t701".to_vec()]);
        assert_eq!(framer.take_overlong(), 1);
        assert_eq!(framer.take_overlong(), 0);
    }

    #[test]
    fn reader_forwards_lines_in_order() {
        let transport = MockTransport::default();
        let connection = ConnectionManager::shared(WireFormat::Csv);
        let stats = Arc::new(LinkStats::default());
        let (handle, rx) = spawn_reader_thread(
            Box::new(transport.clone()),
            settings(WireFormat::Csv),
            Arc::clone(&connection),
            Arc::clone(&stats),
        )
        .unwrap();

        transport.push(b"HELLO_ACK\nV,1,1,3.70\nV,1,1,3.90\n");
        assert_eq!(recv(&rx), ReaderEvent::Line(b"HELLO_ACK".to_vec()));
        assert_eq!(recv(&rx), ReaderEvent::Line(b"V,1,1,3.70".to_vec()));
        assert_eq!(recv(&rx), ReaderEvent::Line(b"V,1,1,3.90".to_vec()));
        assert_eq!(stats.snapshot().lines_received, 3);

        drop(rx);
        handle.stop();
    }

    #[test]
    fn io_fault_reports_link_lost() {
        let transport = MockTransport::default();
        let connection = ConnectionManager::shared(WireFormat::Legacy);
        {
            let mut conn = connection::lock(&connection);
            conn.begin_connect("COM3");
            conn.transport_opened();
        }
        let (handle, rx) = spawn_reader_thread(
            Box::new(transport.clone()),
            settings(WireFormat::Legacy),
            Arc::clone(&connection),
            Arc::new(LinkStats::default()),
        )
        .unwrap();

        transport.fail();
        assert!(matches!(recv(&rx), ReaderEvent::LinkLost(_)));
        assert_eq!(connection::lock(&connection).state(), ConnectionState::Disconnected);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_finished());
        handle.stop();
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let transport = MockTransport::default();
        let stats = Arc::new(LinkStats::default());
        let mut cfg = settings(WireFormat::Csv);
        cfg.queue_capacity = 2;
        let (handle, rx) = spawn_reader_thread(
            Box::new(transport.clone()),
            cfg,
            ConnectionManager::shared(WireFormat::Csv),
            Arc::clone(&stats),
        )
        .unwrap();

        transport.push(b"a\nb\nc\nd\n");
        let deadline = Instant::now() + Duration::from_secs(2);
        while stats.snapshot().lines_received < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.lines_received, 4);
        assert_eq!(snap.queue_overflow, 2);
        assert_eq!(rx.len(), 2);

        drop(rx);
        handle.stop();
    }
}
