//! Transporte do link com o pack.
//!
//! A sessão e a thread de leitura só conhecem [`Transport`]; a porta serial
//! real entra via [`SerialOpener`].

use crate::config::SerialConfig;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Falhas do link. Fatais para a conexão atual, nunca para o processo.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Falha ao abrir {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Erro de I/O no link: {0}")]
    Io(#[from] io::Error),

    #[error("Sem conexão com o BMS")]
    NotConnected,
}

/// Canal bidirecional de bytes que pode ser duplicado para a thread de leitura.
pub trait Transport: Read + Write + Send {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>>;
}

impl Transport for Box<dyn SerialPort> {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        let clone = self.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(clone))
    }
}

/// Abre transportes pelo nome da porta.
pub trait PortOpener: Send {
    fn open(&self, port: &str) -> Result<Box<dyn Transport>, LinkError>;
}

/// Abre portas seriais reais.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialOpener {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }

    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.baud_rate, config.read_timeout())
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, port: &str) -> Result<Box<dyn Transport>, LinkError> {
        let serial = serialport::new(port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| LinkError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        info!("Porta {port} aberta a {} baud", self.baud_rate);
        Ok(Box::new(serial))
    }
}

/// Portas seriais visíveis no sistema.
pub fn list_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            debug!("Falha ao listar portas: {e}");
            Vec::new()
        }
    }
}
