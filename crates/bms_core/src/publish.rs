//! Frame binário do snapshot para camadas de apresentação externas.
//!
//! ```text
//! ┌──────────┬─────────┬──────────────────────────┐
//! │ Magic(1) │ Ver.(1) │ bincode(SnapshotFrame)   │
//! └──────────┴─────────┴──────────────────────────┘
//! ```

use crate::alerts::AlertFlags;
use crate::connection::ConnectionState;
use crate::reader::LinkStatsSnapshot;
use crate::types::PackSnapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic byte que identifica frames do monitor de BMS.
pub const MAGIC_BYTE: u8 = 0x42; // 'B'

/// Versão atual do frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + version).
const HEADER_SIZE: usize = 2;

/// Tamanho máximo de pacote UDP seguro (sem fragmentação).
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Tudo que a apresentação precisa para renderizar um tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub state: ConnectionState,
    pub snapshot: PackSnapshot,
    pub alerts: AlertFlags,
    pub link: LinkStatsSnapshot,
}

/// Erros do frame de publicação.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Pacote muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// Serializa qualquer corpo atrás do header `[MAGIC][VERSION]`.
pub fn encode_framed<T: Serialize>(body: &T) -> Result<Vec<u8>, PublishError> {
    let size = bincode::serialized_size(body).map_err(|e| PublishError::Serialize(e.to_string()))?;
    let mut out = Vec::with_capacity(HEADER_SIZE + size as usize);
    out.extend_from_slice(&[MAGIC_BYTE, PROTOCOL_VERSION]);
    bincode::serialize_into(&mut out, body).map_err(|e| PublishError::Serialize(e.to_string()))?;
    Ok(out)
}

/// Valida o header e desserializa o corpo.
pub fn decode_framed<T: DeserializeOwned>(data: &[u8]) -> Result<T, PublishError> {
    let [magic, version, body @ ..] = data else {
        return Err(PublishError::TooShort(data.len()));
    };
    match (*magic, *version) {
        (MAGIC_BYTE, PROTOCOL_VERSION) => {
            bincode::deserialize(body).map_err(|e| PublishError::Deserialize(e.to_string()))
        }
        (MAGIC_BYTE, other) => Err(PublishError::VersionMismatch(other)),
        (other, _) => Err(PublishError::InvalidMagic(other)),
    }
}

pub fn encode_frame(frame: &SnapshotFrame) -> Result<Vec<u8>, PublishError> {
    encode_framed(frame)
}

pub fn decode_frame(data: &[u8]) -> Result<SnapshotFrame, PublishError> {
    decode_framed(data)
}
