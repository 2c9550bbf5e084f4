//! # BMS Core
//!
//! Núcleo do monitor de bateria: decodifica a telemetria que chega pela
//! serial, mantém o estado mais recente do pack e calcula os alertas.
//!
//! ## Módulos
//! - [`types`] – Registros decodificados e snapshot do pack
//! - [`protocol`] – Decodificação das linhas (legacy CAN hex e CSV) e frames de saída
//! - [`store`] – Estado autoritativo, último valor por slot
//! - [`alerts`] – Flags de desvio, faixa absoluta, temperatura e sobrecorrente
//! - [`connection`] – Máquina de estados do link
//! - [`reader`] – Thread serial e framing de linhas
//! - [`session`] – Comandos do operador e tick de consumo
//! - [`transport`] – Abstração da porta serial
//! - [`config`] – Configuração unificada via TOML
//! - [`publish`] – Frame binário do snapshot para apresentação externa

pub mod types;
pub mod protocol;
pub mod store;
pub mod alerts;
pub mod connection;
pub mod reader;
pub mod session;
pub mod transport;
pub mod config;
pub mod publish;

// Re-exports convenientes
pub use types::{PackSnapshot, ParsedRecord};
pub use protocol::{DecodeError, ValidationError, WireFormat, decode};
pub use store::StateStore;
pub use alerts::{AlertFlags, evaluate};
pub use connection::ConnectionState;
pub use session::{BmsSession, CommandError, DrainReport};
pub use transport::{LinkError, SerialOpener};
pub use config::{AppConfig, SerialConfig};
