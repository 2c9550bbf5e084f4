//! Protocolos de linha da serial do BMS.
//!
//! Dois formatos intercambiáveis:
//!
//! ```text
//! Legacy (CANdapter, terminado em CR, 't' removido antes de indexar)
//! ┌────────┬─────┬──────────┬──────────┬──────────────────────┐
//! │ ID (3) │ DLC │ seg (2)  │ cell (2) │ payload (4 V / 2 °C) │
//! └────────┴─────┴──────────┴──────────┴──────────────────────┘
//!   0x700 = tensão, 0x701 = temperatura
//!
//! CSV (terminado em LF)
//!   TIPO,SEG,CELL,VALOR     TIPO ∈ {V,T,I,C,P,S}, SEG/CELL 1-based
//! ```
//!
//! A decodificação é pura e total: linha corrompida vira [`DecodeError`],
//! nunca panic.

use crate::types::{ParsedRecord, SEGMENTS, TEMPERATURE_CELLS, VOLTAGE_CELLS};
use serde::{Deserialize, Serialize};

/// ID CAN do broadcast de tensão.
pub const LEGACY_VOLTAGE_ID: u32 = 0x700;

/// ID CAN do broadcast de temperatura.
pub const LEGACY_TEMPERATURE_ID: u32 = 0x701;

/// Tamanho mínimo de um frame legacy após remover o marcador `t`.
pub const LEGACY_MIN_LEN: usize = 12;

/// Escala do payload de tensão legacy (V por LSB).
pub const LEGACY_VOLTS_PER_LSB: f64 = 0.000150;

/// Offset do payload de temperatura legacy (°C).
pub const LEGACY_TEMPERATURE_OFFSET: i16 = 100;

/// Offset somado ao índice da célula no frame de tensão legacy.
const LEGACY_CELL_OFFSET: u32 = 4;

/// Token de resposta ao handshake CSV.
pub const HANDSHAKE_ACK: &str = "HELLO_ACK";

/// Faixa aceita para a corrente de carga (A).
pub const CHARGE_CURRENT_MAX: f64 = 10.0;

/// Formato de linha usado no link serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Frames CAN em hex ASCII (CANdapter)
    Legacy,
    /// Linhas CSV com handshake `HELLO`/`HELLO_ACK`
    #[default]
    Csv,
}

impl WireFormat {
    /// Byte que termina uma linha neste formato.
    pub fn terminator(self) -> u8 {
        match self {
            Self::Legacy => b'\r',
            Self::Csv => b'\n',
        }
    }

    /// O formato exige `HandshakeAck` antes de aceitar telemetria.
    pub fn has_handshake(self) -> bool {
        match self {
            Self::Legacy => false,
            Self::Csv => true,
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Csv => f.write_str("csv"),
        }
    }
}

/// Erros de decodificação de linha. Nenhum é fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Linha muito curta ({0} caracteres, mínimo {LEGACY_MIN_LEN})")]
    TooShort(usize),

    #[error("Linha malformada: {0}")]
    Malformed(String),

    #[error("Índice fora dos limites: segmento {segment}, célula {cell}")]
    OutOfBounds { segment: i64, cell: i64 },
}

/// Valor de comando rejeitado antes de chegar ao transporte.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Corrente de carga inválida: {0} A (0–{CHARGE_CURRENT_MAX})")]
    ChargeCurrentOutOfRange(f64),
}

// ──────────────────────────────────────────────
// Decodificação
// ──────────────────────────────────────────────

/// Decodifica uma linha (sem terminador) no formato indicado.
pub fn decode(format: WireFormat, line: &[u8]) -> Result<ParsedRecord, DecodeError> {
    match format {
        WireFormat::Legacy => decode_legacy(line),
        WireFormat::Csv => decode_csv(line),
    }
}

/// Decodifica um frame CAN legacy em hex ASCII.
///
/// Índices fora dos limites viram [`ParsedRecord::Unrecognized`] (ruído
/// do hardware), não erro.
pub fn decode_legacy(line: &[u8]) -> Result<ParsedRecord, DecodeError> {
    let frame: Vec<u8> = line
        .iter()
        .copied()
        .filter(|&b| b != b't' && b != b'\r' && b != b'\n')
        .collect();

    if frame.len() < LEGACY_MIN_LEN {
        return Err(DecodeError::TooShort(frame.len()));
    }

    match hex_field(&frame[0..3])? {
        LEGACY_VOLTAGE_ID => {
            let segment = (hex_field(&frame[4..6])? % SEGMENTS as u32) as usize;
            let cell_byte = hex_field(&frame[6..8])?;
            let Some(cell) = cell_byte.checked_sub(LEGACY_CELL_OFFSET) else {
                return Ok(ParsedRecord::Unrecognized);
            };
            let cell = cell as usize;
            if cell >= VOLTAGE_CELLS {
                return Ok(ParsedRecord::Unrecognized);
            }
            let raw = hex_field(&frame[8..12])?;
            Ok(ParsedRecord::VoltageReading {
                segment,
                cell,
                volts: (raw as f64 * LEGACY_VOLTS_PER_LSB) as f32,
            })
        }
        LEGACY_TEMPERATURE_ID => {
            let segment = hex_field(&frame[4..6])? as usize;
            let cell = hex_field(&frame[6..8])? as usize;
            if segment >= SEGMENTS || cell >= TEMPERATURE_CELLS {
                return Ok(ParsedRecord::Unrecognized);
            }
            let raw = hex_field(&frame[8..10])? as i16;
            Ok(ParsedRecord::TemperatureReading {
                segment,
                cell,
                celsius: raw - LEGACY_TEMPERATURE_OFFSET,
            })
        }
        _ => Ok(ParsedRecord::Unrecognized),
    }
}

fn hex_field(digits: &[u8]) -> Result<u32, DecodeError> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| DecodeError::Malformed("campo hex não é ASCII".into()))?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::Malformed(format!("campo hex inválido: {text:?}")));
    }
    u32::from_str_radix(text, 16)
        .map_err(|e| DecodeError::Malformed(format!("campo hex {text:?}: {e}")))
}

/// Decodifica uma linha CSV `TIPO,SEG,CELL,VALOR` ou o token `HELLO_ACK`.
pub fn decode_csv(line: &[u8]) -> Result<ParsedRecord, DecodeError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| DecodeError::Malformed("linha não é UTF-8".into()))?
        .trim();

    if text == HANDSHAKE_ACK {
        return Ok(ParsedRecord::HandshakeAck);
    }

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(DecodeError::Malformed(format!(
            "{} campos (esperado 4)",
            fields.len()
        )));
    }

    let segment = parse_index(fields[1])?;
    let cell = parse_index(fields[2])?;
    let value = fields[3];

    match fields[0] {
        "V" => {
            let (segment, cell) = zero_based(segment, cell, VOLTAGE_CELLS)?;
            Ok(ParsedRecord::VoltageReading {
                segment,
                cell,
                volts: parse_float(value)?,
            })
        }
        "T" => {
            let (segment, cell) = zero_based(segment, cell, TEMPERATURE_CELLS)?;
            let celsius = value
                .parse::<i16>()
                .map_err(|e| DecodeError::Malformed(format!("temperatura {value:?}: {e}")))?;
            Ok(ParsedRecord::TemperatureReading {
                segment,
                cell,
                celsius,
            })
        }
        "I" => Ok(ParsedRecord::PackCurrentReading {
            amps: parse_float(value)?,
        }),
        "C" => Ok(ParsedRecord::ChargeCurrentReading {
            amps: parse_float(value)?,
        }),
        "P" => Ok(ParsedRecord::PackVoltageReading {
            volts: parse_float(value)?,
        }),
        "S" => match value {
            "0" => Ok(ParsedRecord::ChargerStatusReading { connected: false }),
            "1" => Ok(ParsedRecord::ChargerStatusReading { connected: true }),
            other => Err(DecodeError::Malformed(format!(
                "status do carregador {other:?} (esperado 0 ou 1)"
            ))),
        },
        other => Err(DecodeError::Malformed(format!("tipo desconhecido {other:?}"))),
    }
}

fn parse_index(field: &str) -> Result<i64, DecodeError> {
    field
        .parse::<i64>()
        .map_err(|e| DecodeError::Malformed(format!("índice {field:?}: {e}")))
}

fn parse_float(field: &str) -> Result<f32, DecodeError> {
    let value = field
        .parse::<f32>()
        .map_err(|e| DecodeError::Malformed(format!("valor {field:?}: {e}")))?;
    if !value.is_finite() {
        return Err(DecodeError::Malformed(format!("valor não finito {field:?}")));
    }
    Ok(value)
}

/// Converte índices 1-based em 0-based validando contra o grid.
fn zero_based(segment: i64, cell: i64, cells: usize) -> Result<(usize, usize), DecodeError> {
    let out_of_bounds = DecodeError::OutOfBounds { segment, cell };
    let (Some(seg0), Some(cell0)) = (segment.checked_sub(1), cell.checked_sub(1)) else {
        return Err(out_of_bounds);
    };
    if !(0..SEGMENTS as i64).contains(&seg0) || !(0..cells as i64).contains(&cell0) {
        return Err(out_of_bounds);
    }
    Ok((seg0 as usize, cell0 as usize))
}

// ──────────────────────────────────────────────
// Frames de saída
// ──────────────────────────────────────────────

/// Frames enviados ao abrir a conexão, na ordem.
///
/// No legacy existe um tempo de acomodação entre os dois frames; quem
/// envia decide a espera.
pub fn handshake_frames(format: WireFormat) -> &'static [&'static [u8]] {
    match format {
        WireFormat::Legacy => &[b"S5\rL1\r", b"O\rL1\r"],
        WireFormat::Csv => &[b"HELLO\n"],
    }
}

/// Valida a corrente de carga pedida pelo operador.
pub fn validate_charge_current(amps: f64) -> Result<f64, ValidationError> {
    if !amps.is_finite() || !(0.0..=CHARGE_CURRENT_MAX).contains(&amps) {
        return Err(ValidationError::ChargeCurrentOutOfRange(amps));
    }
    Ok(amps)
}

/// Monta o comando de corrente de carga.
///
/// Legacy: `T1502<hex(trunc(10·A)+100)>00\rL1\r`. CSV: `C,<A:.2>\n`.
pub fn charge_command(format: WireFormat, amps: f64) -> Result<Vec<u8>, ValidationError> {
    let amps = validate_charge_current(amps)?;
    let frame = match format {
        WireFormat::Legacy => {
            let code = (10.0 * amps).trunc() as u32 + 100;
            format!("T1502{code:x}00\rL1\r")
        }
        WireFormat::Csv => format!("C,{amps:.2}\n"),
    };
    Ok(frame.into_bytes())
}

// ──────────────────────────────────────────────
// Codificação de telemetria (simulador e testes)
// ──────────────────────────────────────────────

/// Codifica um registro como linha CSV terminada em LF.
///
/// Retorna `None` para registros sem representação CSV (`Unrecognized`).
pub fn encode_csv_record(record: &ParsedRecord) -> Option<String> {
    let line = match *record {
        ParsedRecord::VoltageReading { segment, cell, volts } => {
            format!("V,{},{},{volts:.4}\n", segment + 1, cell + 1)
        }
        ParsedRecord::TemperatureReading { segment, cell, celsius } => {
            format!("T,{},{},{celsius}\n", segment + 1, cell + 1)
        }
        ParsedRecord::PackCurrentReading { amps } => format!("I,0,0,{amps:.2}\n"),
        ParsedRecord::ChargeCurrentReading { amps } => format!("C,0,0,{amps:.2}\n"),
        ParsedRecord::PackVoltageReading { volts } => format!("P,0,0,{volts:.2}\n"),
        ParsedRecord::ChargerStatusReading { connected } => {
            format!("S,0,0,{}\n", u8::from(connected))
        }
        ParsedRecord::HandshakeAck => format!("{HANDSHAKE_ACK}\n"),
        ParsedRecord::Unrecognized => return None,
    };
    Some(line)
}

/// Codifica um registro como frame CAN legacy (`t...` + CR), DLC 8.
///
/// Só tensão e temperatura existem no legacy.
pub fn encode_legacy_record(record: &ParsedRecord) -> Option<String> {
    match *record {
        ParsedRecord::VoltageReading { segment, cell, volts } => {
            let raw = (volts as f64 / LEGACY_VOLTS_PER_LSB).round().clamp(0.0, u16::MAX as f64);
            Some(format!(
                "t{LEGACY_VOLTAGE_ID:03X}8{:02X}{:02X}{:04X}00000000\r",
                segment,
                cell as u32 + LEGACY_CELL_OFFSET,
                raw as u16
            ))
        }
        ParsedRecord::TemperatureReading { segment, cell, celsius } => {
            let raw = (celsius + LEGACY_TEMPERATURE_OFFSET).clamp(0, 0xFF);
            Some(format!(
                "t{LEGACY_TEMPERATURE_ID:03X}8{segment:02X}{cell:02X}{raw:02X}0000000000\r"
            ))
        }
        ParsedRecord::PackCurrentReading { .. }
        | ParsedRecord::ChargeCurrentReading { .. }
        | ParsedRecord::PackVoltageReading { .. }
        | ParsedRecord::ChargerStatusReading { .. }
        | ParsedRecord::HandshakeAck
        | ParsedRecord::Unrecognized => None,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
