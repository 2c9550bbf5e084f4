//! Tipos do pack de baterias: registros decodificados e snapshot de estado.
//!
//! Cada slot guarda apenas a última leitura recebida. `None` significa
//! "sem leitura ainda"; os acessores do [`crate::store::StateStore`] expõem
//! isso como o sentinela `-1`.

use serde::{Deserialize, Serialize};

/// Número de segmentos do pack.
pub const SEGMENTS: usize = 12;

/// Células com tensão monitorada por segmento.
pub const VOLTAGE_CELLS: usize = 12;

/// Células com temperatura monitorada por segmento.
pub const TEMPERATURE_CELLS: usize = 10;

/// Sentinela de tensão para slot nunca atualizado.
pub const VOLTAGE_SENTINEL: f32 = -1.0;

/// Sentinela de temperatura para slot nunca atualizado.
pub const TEMPERATURE_SENTINEL: i16 = -1;

// ──────────────────────────────────────────────
// Registro decodificado
// ──────────────────────────────────────────────

/// Resultado da decodificação de uma linha da serial.
///
/// Enum fechado: todo ponto de consumo faz `match` exaustivo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedRecord {
    /// Tensão de uma célula (V), índices 0-based.
    VoltageReading { segment: usize, cell: usize, volts: f32 },
    /// Temperatura de uma célula (°C), índices 0-based.
    TemperatureReading { segment: usize, cell: usize, celsius: i16 },
    /// Corrente do sistema de tração (A)
    PackCurrentReading { amps: f32 },
    /// Corrente de carga (A)
    ChargeCurrentReading { amps: f32 },
    /// Tensão total do pack (V)
    PackVoltageReading { volts: f32 },
    /// Carregador conectado ou não
    ChargerStatusReading { connected: bool },
    /// Resposta ao handshake do protocolo CSV
    HandshakeAck,
    /// Frame válido que não carrega telemetria conhecida
    Unrecognized,
}

impl ParsedRecord {
    /// Índices dentro dos limites do grid correspondente.
    ///
    /// Registros sem índice são sempre considerados válidos.
    pub fn in_bounds(&self) -> bool {
        match *self {
            Self::VoltageReading { segment, cell, .. } => {
                segment < SEGMENTS && cell < VOLTAGE_CELLS
            }
            Self::TemperatureReading { segment, cell, .. } => {
                segment < SEGMENTS && cell < TEMPERATURE_CELLS
            }
            Self::PackCurrentReading { .. }
            | Self::ChargeCurrentReading { .. }
            | Self::PackVoltageReading { .. }
            | Self::ChargerStatusReading { .. }
            | Self::HandshakeAck
            | Self::Unrecognized => true,
        }
    }
}

// ──────────────────────────────────────────────
// Escalares do pack
// ──────────────────────────────────────────────

/// Grandezas do pack inteiro. Cada uma fica ausente até o primeiro update.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PackScalars {
    /// Corrente de tração (A)
    pub traction_current: Option<f32>,
    /// Corrente de carga (A)
    pub charge_current: Option<f32>,
    /// Tensão do pack (V)
    pub pack_voltage: Option<f32>,
    /// Carregador conectado
    pub charger_connected: Option<bool>,
}

// ──────────────────────────────────────────────
// Diagnóstico do store
// ──────────────────────────────────────────────

/// Contadores de aplicação de registros.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreCounters {
    /// Registros que atualizaram algum slot
    pub applied: u64,
    /// Registros descartados por índice fora dos limites
    pub out_of_bounds: u64,
    /// `Unrecognized` e `HandshakeAck` recebidos pelo store
    pub ignored: u64,
}

// ──────────────────────────────────────────────
// Snapshot
// ──────────────────────────────────────────────

/// Cópia consistente de todo o estado do pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackSnapshot {
    /// Tensões por `[segmento][célula]`
    pub voltages: [[Option<f32>; VOLTAGE_CELLS]; SEGMENTS],
    /// Temperaturas por `[segmento][célula]`
    pub temperatures: [[Option<i16>; TEMPERATURE_CELLS]; SEGMENTS],
    pub pack: PackScalars,
    pub counters: StoreCounters,
}

impl PackSnapshot {
    /// Tensão do slot ou [`VOLTAGE_SENTINEL`]. Índices inválidos também
    /// retornam o sentinela.
    pub fn voltage(&self, segment: usize, cell: usize) -> f32 {
        self.voltages
            .get(segment)
            .and_then(|row| row.get(cell))
            .copied()
            .flatten()
            .unwrap_or(VOLTAGE_SENTINEL)
    }

    /// Temperatura do slot ou [`TEMPERATURE_SENTINEL`].
    pub fn temperature(&self, segment: usize, cell: usize) -> i16 {
        self.temperatures
            .get(segment)
            .and_then(|row| row.get(cell))
            .copied()
            .flatten()
            .unwrap_or(TEMPERATURE_SENTINEL)
    }

    /// Quantidade de células com tensão já recebida.
    pub fn voltage_readings(&self) -> usize {
        self.voltages.iter().flatten().filter(|v| v.is_some()).count()
    }

    /// Quantidade de células com temperatura já recebida.
    pub fn temperature_readings(&self) -> usize {
        self.temperatures.iter().flatten().filter(|t| t.is_some()).count()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
