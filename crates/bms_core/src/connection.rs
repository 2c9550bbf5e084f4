//! Máquina de estados da conexão serial.
//!
//! ```text
//!  Disconnected ──[connect]──▶ Connecting ──[HELLO_ACK | legacy aberto]──▶ Connected
//!        ▲                          │                                          │
//!        └──────[falha de I/O | disconnect]─────────────────────────────────────┘
//! ```

use crate::protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Estado do link com o pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Registros de telemetria podem ser aplicados neste estado.
    pub fn accepts_records(self, format: WireFormat) -> bool {
        match self {
            Self::Connected => true,
            Self::Connecting => !format.has_handshake(),
            Self::Disconnected => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Desconectado"),
            Self::Connecting => f.write_str("Conectando"),
            Self::Connected => f.write_str("Conectado"),
        }
    }
}

/// Gerenciador da conexão. Compartilhado via [`SharedConnection`].
#[derive(Debug)]
pub struct ConnectionManager {
    format: WireFormat,
    state: ConnectionState,
    port: Option<String>,
    last_error: Option<String>,
    /// Estado no momento da última queda de link
    lost_from: Option<ConnectionState>,
}

/// Handle compartilhado entre a thread serial e a sessão.
pub type SharedConnection = Arc<Mutex<ConnectionManager>>;

impl ConnectionManager {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            state: ConnectionState::Disconnected,
            port: None,
            last_error: None,
            lost_from: None,
        }
    }

    pub fn shared(format: WireFormat) -> SharedConnection {
        Arc::new(Mutex::new(Self::new(format)))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Porta da conexão atual ou da última tentativa.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Motivo da última queda de link, se houve.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Pedido do operador. Só vale a partir de `Disconnected`.
    pub fn begin_connect(&mut self, port: &str) -> bool {
        if self.state != ConnectionState::Disconnected {
            warn!("Conexão já em andamento ({}), ignorando pedido para {port}", self.state);
            return false;
        }
        self.port = Some(port.to_string());
        self.last_error = None;
        self.lost_from = None;
        self.transition(ConnectionState::Connecting);
        true
    }

    /// Transporte aberto e handshake enviado.
    ///
    /// Sem handshake (legacy) a conexão já é considerada estabelecida.
    pub fn transport_opened(&mut self) {
        if self.state == ConnectionState::Connecting && !self.format.has_handshake() {
            self.transition(ConnectionState::Connected);
        }
    }

    /// `HandshakeAck` recebido. Retorna `true` se completou a conexão.
    pub fn handshake_acknowledged(&mut self) -> bool {
        if self.state == ConnectionState::Connecting {
            self.transition(ConnectionState::Connected);
            true
        } else {
            false
        }
    }

    /// Falha de I/O: derruba a conexão e guarda o motivo.
    pub fn link_lost(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.state != ConnectionState::Disconnected {
            warn!("Link perdido em {}: {reason}", self.port.as_deref().unwrap_or("?"));
            self.lost_from = Some(self.state);
            self.transition(ConnectionState::Disconnected);
        }
        self.last_error = Some(reason);
    }

    /// Desconexão pedida pelo operador.
    pub fn disconnect(&mut self) {
        self.lost_from = None;
        if self.state != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
        }
    }

    /// Registros de telemetria podem ser aplicados agora.
    pub fn accepts_records(&self) -> bool {
        self.state.accepts_records(self.format)
    }

    /// Estado em que as linhas ainda na fila foram lidas.
    ///
    /// Depois de uma queda a fila ainda guarda o que chegou antes da falha;
    /// essas linhas seguem o estado anterior à queda.
    pub fn queued_state(&self) -> ConnectionState {
        self.lost_from.unwrap_or(self.state)
    }

    fn transition(&mut self, next: ConnectionState) {
        info!(
            "Conexão {} → {} ({}, {})",
            self.state,
            next,
            self.port.as_deref().unwrap_or("-"),
            self.format
        );
        self.state = next;
    }
}

/// Trava o gerenciador recuperando de lock envenenado.
pub fn lock(connection: &SharedConnection) -> MutexGuard<'_, ConnectionManager> {
    connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_waits_for_handshake() {
        let mut conn = ConnectionManager::new(WireFormat::Csv);
        assert!(!conn.accepts_records());
        assert!(conn.begin_connect("COM3"));
        conn.transport_opened();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.accepts_records());

        assert!(conn.handshake_acknowledged());
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.accepts_records());
        // Ack repetido não muda nada
        assert!(!conn.handshake_acknowledged());
    }

    #[test]
    fn legacy_connects_when_transport_opens() {
        let mut conn = ConnectionManager::new(WireFormat::Legacy);
        conn.begin_connect("COM3");
        assert!(conn.accepts_records(), "legacy não tem handshake");
        conn.transport_opened();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn link_loss_disconnects_and_keeps_reason() {
        let mut conn = ConnectionManager::new(WireFormat::Csv);
        conn.begin_connect("/dev/ttyUSB0");
        conn.handshake_acknowledged();
        conn.link_lost("broken pipe");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.accepts_records());
        assert_eq!(conn.last_error(), Some("broken pipe"));
        assert_eq!(conn.port(), Some("/dev/ttyUSB0"));

        // A fila anterior à queda segue o estado de antes
        assert_eq!(conn.queued_state(), ConnectionState::Connected);

        // Reconexão explícita limpa o erro
        assert!(conn.begin_connect("/dev/ttyUSB0"));
        assert!(conn.last_error().is_none());
        assert_eq!(conn.queued_state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_only_from_disconnected() {
        let mut conn = ConnectionManager::new(WireFormat::Csv);
        assert!(conn.begin_connect("COM3"));
        assert!(!conn.begin_connect("COM4"));
        assert_eq!(conn.port(), Some("COM3"));
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.handshake_acknowledged());
    }

    #[test]
    fn operator_disconnect_forgets_queued_state() {
        let mut conn = ConnectionManager::new(WireFormat::Legacy);
        conn.begin_connect("COM3");
        conn.transport_opened();
        conn.link_lost("timeout");
        assert_eq!(conn.queued_state(), ConnectionState::Connected);
        conn.disconnect();
        assert_eq!(conn.queued_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn acceptance_per_state_and_format() {
        use ConnectionState::*;
        assert!(Connected.accepts_records(WireFormat::Csv));
        assert!(!Connecting.accepts_records(WireFormat::Csv));
        assert!(Connecting.accepts_records(WireFormat::Legacy));
        assert!(!Disconnected.accepts_records(WireFormat::Legacy));
    }
}
