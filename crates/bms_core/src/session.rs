//! Sessão com o pack: comandos do operador e tick de consumo.
//!
//! A camada de apresentação só conversa com [`BmsSession`]: pede
//! `connect`/`disconnect`/`set_charge_current`, chama [`BmsSession::drain`]
//! no seu tick e lê [`BmsSession::snapshot`].

use crate::config::SerialConfig;
use crate::connection::{self, ConnectionManager, ConnectionState, SharedConnection};
use crate::protocol::{self, ValidationError, WireFormat};
use crate::reader::{
    LinkStats, LinkStatsSnapshot, ReaderEvent, ReaderHandle, ReaderSettings, spawn_reader_thread,
};
use crate::store::StateStore;
use crate::transport::{LinkError, PortOpener, Transport};
use crate::types::{PackSnapshot, ParsedRecord};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Falha de um comando do operador.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Resultado de um tick de drenagem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Linhas retiradas da fila
    pub lines: usize,
    /// Registros que atualizaram o store
    pub applied: u64,
    /// Linhas que não decodificaram
    pub decode_errors: usize,
    /// Registros descartados por a conexão não aceitar telemetria
    pub discarded: u64,
    /// O handshake completou neste tick
    pub handshake_completed: bool,
    /// O link caiu; motivo para o operador
    pub link_lost: Option<String>,
}

struct ActiveLink {
    writer: Box<dyn Transport>,
    events: Receiver<ReaderEvent>,
    reader: ReaderHandle,
}

/// Sessão com um pack.
pub struct BmsSession {
    config: SerialConfig,
    opener: Box<dyn PortOpener>,
    connection: SharedConnection,
    store: Arc<StateStore>,
    stats: Arc<LinkStats>,
    link: Option<ActiveLink>,
}

impl BmsSession {
    pub fn new(config: SerialConfig, opener: Box<dyn PortOpener>) -> Self {
        let connection = ConnectionManager::shared(config.protocol);
        Self {
            config,
            opener,
            connection,
            store: Arc::new(StateStore::new()),
            stats: Arc::new(LinkStats::default()),
            link: None,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.config.protocol
    }

    pub fn state(&self) -> ConnectionState {
        connection::lock(&self.connection).state()
    }

    /// Porta atual (ou da última tentativa) e último erro de link.
    pub fn status(&self) -> (ConnectionState, Option<String>, Option<String>) {
        let conn = connection::lock(&self.connection);
        (
            conn.state(),
            conn.port().map(str::to_string),
            conn.last_error().map(str::to_string),
        )
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn snapshot(&self) -> PackSnapshot {
        self.store.snapshot()
    }

    pub fn link_stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Abre a porta, inicia a leitura e envia o handshake.
    ///
    /// Uma conexão existente é encerrada antes.
    pub fn connect(&mut self, port_name: &str) -> Result<(), LinkError> {
        if self.link.is_some() || self.state() != ConnectionState::Disconnected {
            self.disconnect();
        }
        connection::lock(&self.connection).begin_connect(port_name);

        match self.open_link(port_name) {
            Ok(()) => {
                connection::lock(&self.connection).transport_opened();
                info!("Handshake enviado para {port_name} ({})", self.config.protocol);
                Ok(())
            }
            Err(e) => {
                self.teardown();
                connection::lock(&self.connection).link_lost(e.to_string());
                Err(e)
            }
        }
    }

    fn open_link(&mut self, port_name: &str) -> Result<(), LinkError> {
        let writer = self.opener.open(port_name)?;
        let reader_transport = writer.try_clone_transport()?;
        let (reader, events) = spawn_reader_thread(
            reader_transport,
            ReaderSettings::from_config(&self.config),
            Arc::clone(&self.connection),
            Arc::clone(&self.stats),
        )?;
        let link = self.link.insert(ActiveLink {
            writer,
            events,
            reader,
        });

        let frames = protocol::handshake_frames(self.config.protocol);
        for (i, frame) in frames.iter().enumerate() {
            if i > 0 {
                std::thread::sleep(self.config.handshake_settle());
            }
            link.writer.write_all(frame)?;
            link.writer.flush()?;
        }
        Ok(())
    }

    /// Encerra a conexão de forma síncrona.
    pub fn disconnect(&mut self) {
        self.teardown();
        connection::lock(&self.connection).disconnect();
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            let ActiveLink {
                writer,
                events,
                reader,
            } = link;
            // Solta o receiver antes do join para não travar um envio pendente
            drop(events);
            reader.stop();
            drop(writer);
            debug!("Link serial encerrado");
        }
    }

    /// Envia o comando de corrente de carga.
    ///
    /// O valor é validado antes de olhar a conexão.
    pub fn set_charge_current(&mut self, amps: f64) -> Result<(), CommandError> {
        let frame = protocol::charge_command(self.config.protocol, amps)?;
        if self.state() != ConnectionState::Connected {
            return Err(LinkError::NotConnected.into());
        }
        let Some(link) = self.link.as_mut() else {
            return Err(LinkError::NotConnected.into());
        };

        let written = link.writer.write_all(&frame).and_then(|()| link.writer.flush());
        if let Err(e) = written {
            warn!("Falha ao enviar comando de carga: {e}");
            self.teardown();
            connection::lock(&self.connection).link_lost(e.to_string());
            return Err(LinkError::Io(e).into());
        }
        info!("Corrente de carga ajustada para {amps:.2} A");
        Ok(())
    }

    /// Drena a fila, decodifica e aplica tudo na ordem de chegada.
    ///
    /// Não bloqueia: só consome o que já está na fila.
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        let Some(link) = self.link.as_ref() else {
            return report;
        };

        let format = self.config.protocol;
        let mut pending: Vec<ParsedRecord> = Vec::new();
        let mut link_lost = None;
        // Linhas lidas antes de uma queda ainda valem pelo estado de então
        let mut queued = connection::lock(&self.connection).queued_state();

        for event in link.events.try_iter() {
            match event {
                ReaderEvent::Line(line) => {
                    report.lines += 1;
                    match protocol::decode(format, &line) {
                        Ok(record) => self.route(record, &mut queued, &mut pending, &mut report),
                        Err(e) => {
                            report.decode_errors += 1;
                            self.stats.record_decode_error(&e);
                            debug!("Linha descartada ({e}): {:?}", String::from_utf8_lossy(&line));
                        }
                    }
                }
                ReaderEvent::LinkLost(reason) => {
                    link_lost = Some(reason);
                    break;
                }
            }
        }

        if !pending.is_empty() {
            report.applied = self.store.apply_batch(pending).applied;
        }

        // A thread pode ter caído sem conseguir entregar o evento
        if link_lost.is_none() && link.reader.is_finished() {
            let conn = connection::lock(&self.connection);
            if conn.state() == ConnectionState::Disconnected {
                link_lost = Some(conn.last_error().unwrap_or("thread serial encerrada").to_string());
            }
        }

        if let Some(reason) = link_lost {
            self.teardown();
            connection::lock(&self.connection).link_lost(reason.clone());
            report.link_lost = Some(reason);
        }

        report
    }

    fn route(
        &self,
        record: ParsedRecord,
        queued: &mut ConnectionState,
        pending: &mut Vec<ParsedRecord>,
        report: &mut DrainReport,
    ) {
        let mut conn = connection::lock(&self.connection);
        match record {
            ParsedRecord::HandshakeAck => {
                if *queued == ConnectionState::Connecting {
                    *queued = ConnectionState::Connected;
                }
                if conn.handshake_acknowledged() {
                    report.handshake_completed = true;
                }
            }
            ParsedRecord::Unrecognized => {}
            ParsedRecord::VoltageReading { .. }
            | ParsedRecord::TemperatureReading { .. }
            | ParsedRecord::PackCurrentReading { .. }
            | ParsedRecord::ChargeCurrentReading { .. }
            | ParsedRecord::PackVoltageReading { .. }
            | ParsedRecord::ChargerStatusReading { .. } => {
                if queued.accepts_records(conn.format()) {
                    pending.push(record);
                } else {
                    report.discarded += 1;
                    self.stats.record_not_connected(1);
                }
            }
        }
    }
}

impl Drop for BmsSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
