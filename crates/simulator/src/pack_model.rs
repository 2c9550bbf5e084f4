//! Modelo determinístico do pack e interpretação dos comandos do host.

use bms_core::WireFormat;
use bms_core::protocol::HANDSHAKE_ACK;
use bms_core::types::{ParsedRecord, SEGMENTS, TEMPERATURE_CELLS, VOLTAGE_CELLS};

/// Célula que periodicamente afunda para exercitar o alerta de desvio.
const WEAK_CELL: (usize, usize) = (2, 6);

/// Gera varreduras completas do pack a cada tick.
#[derive(Debug, Default)]
pub struct PackModel {
    tick: u64,
    charge_setpoint: f32,
}

impl PackModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charge_setpoint(&self) -> f32 {
        self.charge_setpoint
    }

    pub fn set_charge_current(&mut self, amps: f32) {
        self.charge_setpoint = amps.clamp(0.0, 10.0);
    }

    /// Uma varredura: todas as tensões, todas as temperaturas e os escalares.
    pub fn sweep(&mut self) -> Vec<ParsedRecord> {
        let t = self.tick as f32;
        self.tick += 1;

        let mut records = Vec::with_capacity(SEGMENTS * (VOLTAGE_CELLS + TEMPERATURE_CELLS) + 4);
        let mut pack_volts = 0.0f32;

        for segment in 0..SEGMENTS {
            let seg_phase = segment as f32 * 0.5;
            for cell in 0..VOLTAGE_CELLS {
                let mut volts = 3.80
                    + 0.15 * (t * 0.1 + seg_phase).sin()
                    + 0.01 * (cell as f32 * 1.3 + t * 0.05).sin();
                if (segment, cell) == WEAK_CELL && self.tick % 30 < 5 {
                    volts -= 0.2;
                }
                pack_volts += volts;
                records.push(ParsedRecord::VoltageReading { segment, cell, volts });
            }
            for cell in 0..TEMPERATURE_CELLS {
                let celsius = 25.0 + segment as f32 + 8.0 * (t * 0.03 + cell as f32 * 0.7).sin();
                records.push(ParsedRecord::TemperatureReading {
                    segment,
                    cell,
                    celsius: celsius.round() as i16,
                });
            }
        }

        let connected = self.charge_setpoint > 0.0;
        records.push(ParsedRecord::PackCurrentReading {
            amps: 150.0 + 90.0 * (t * 0.13).sin(),
        });
        records.push(ParsedRecord::ChargeCurrentReading {
            amps: if connected { self.charge_setpoint } else { 0.0 },
        });
        records.push(ParsedRecord::PackVoltageReading { volts: pack_volts });
        records.push(ParsedRecord::ChargerStatusReading { connected });
        records
    }
}

// ──────────────────────────────────────────────
// Comandos do host
// ──────────────────────────────────────────────

/// Comando recebido do monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    /// `HELLO` do protocolo CSV
    Hello,
    /// Abertura do canal CAN (`O`)
    OpenChannel,
    /// Setup do adaptador (`S5`, `L1`), sem efeito
    AdapterSetup,
    ChargeCurrent(f32),
}

/// Interpreta uma linha vinda do host, já sem terminador.
pub fn parse_host_command(format: WireFormat, line: &str) -> Option<HostCommand> {
    let line = line.trim();
    match format {
        WireFormat::Csv => {
            if line == "HELLO" {
                return Some(HostCommand::Hello);
            }
            let amps = line.strip_prefix("C,")?.trim().parse::<f32>().ok()?;
            Some(HostCommand::ChargeCurrent(amps))
        }
        WireFormat::Legacy => match line {
            "O" => Some(HostCommand::OpenChannel),
            "S5" | "L1" => Some(HostCommand::AdapterSetup),
            _ => {
                // T1502<code>00, code = trunc(10·A) + 100 em hex
                let code = line.strip_prefix("T1502")?.strip_suffix("00")?;
                let code = u32::from_str_radix(code, 16).ok()?;
                let tenths = code.checked_sub(100)?;
                Some(HostCommand::ChargeCurrent(tenths as f32 / 10.0))
            }
        },
    }
}

/// Resposta ao handshake CSV.
pub fn handshake_reply() -> String {
    format!("{HANDSHAKE_ACK}\n")
}
