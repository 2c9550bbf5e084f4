//! Estado autoritativo do pack.
//!
//! Único ponto de escrita da telemetria. O acesso é sincronizado por um
//! `Mutex`; quem está fora só enxerga cópias via [`StateStore::snapshot`].

use crate::types::{PackSnapshot, ParsedRecord, StoreCounters};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// O que `apply` fez com um registro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Slot ou escalar sobrescrito
    Stored,
    /// Índice fora dos limites, nada alterado
    OutOfBounds,
    /// `HandshakeAck`: pertence ao gerenciador de conexão
    Handshake,
    /// `Unrecognized`: nada a fazer
    Ignored,
}

/// Store de última leitura por slot.
#[derive(Debug, Default)]
pub struct StateStore {
    state: Mutex<PackSnapshot>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PackSnapshot> {
        // Um panic em outra thread não invalida os grids: cada escrita é
        // atômica do ponto de vista do slot.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Aplica um registro. Nunca falha: descartes só entram nos contadores.
    pub fn apply(&self, record: ParsedRecord) -> ApplyOutcome {
        let mut state = self.lock();
        apply_locked(&mut state, record)
    }

    /// Aplica um lote inteiro com uma única aquisição do lock, na ordem dada.
    ///
    /// Um snapshot concorrente vê o lote todo ou nada dele.
    pub fn apply_batch<I>(&self, records: I) -> StoreCounters
    where
        I: IntoIterator<Item = ParsedRecord>,
    {
        let mut state = self.lock();
        let mut delta = StoreCounters::default();
        for record in records {
            match apply_locked(&mut state, record) {
                ApplyOutcome::Stored => delta.applied += 1,
                ApplyOutcome::OutOfBounds => delta.out_of_bounds += 1,
                ApplyOutcome::Handshake | ApplyOutcome::Ignored => delta.ignored += 1,
            }
        }
        delta
    }

    /// Cópia consistente de todo o estado.
    pub fn snapshot(&self) -> PackSnapshot {
        self.lock().clone()
    }

    /// Tensão atual do slot, ou `-1.0` se nunca atualizado.
    pub fn voltage(&self, segment: usize, cell: usize) -> f32 {
        self.lock().voltage(segment, cell)
    }

    /// Temperatura atual do slot, ou `-1` se nunca atualizada.
    pub fn temperature(&self, segment: usize, cell: usize) -> i16 {
        self.lock().temperature(segment, cell)
    }

    /// Contadores acumulados desde a criação.
    pub fn counters(&self) -> StoreCounters {
        self.lock().counters
    }
}

fn apply_locked(state: &mut PackSnapshot, record: ParsedRecord) -> ApplyOutcome {
    if !record.in_bounds() {
        state.counters.out_of_bounds += 1;
        debug!("Registro fora dos limites descartado: {record:?}");
        return ApplyOutcome::OutOfBounds;
    }

    let outcome = match record {
        ParsedRecord::VoltageReading { segment, cell, volts } => {
            state.voltages[segment][cell] = Some(volts);
            ApplyOutcome::Stored
        }
        ParsedRecord::TemperatureReading { segment, cell, celsius } => {
            state.temperatures[segment][cell] = Some(celsius);
            ApplyOutcome::Stored
        }
        ParsedRecord::PackCurrentReading { amps } => {
            state.pack.traction_current = Some(amps);
            ApplyOutcome::Stored
        }
        ParsedRecord::ChargeCurrentReading { amps } => {
            state.pack.charge_current = Some(amps);
            ApplyOutcome::Stored
        }
        ParsedRecord::PackVoltageReading { volts } => {
            state.pack.pack_voltage = Some(volts);
            ApplyOutcome::Stored
        }
        ParsedRecord::ChargerStatusReading { connected } => {
            state.pack.charger_connected = Some(connected);
            ApplyOutcome::Stored
        }
        ParsedRecord::HandshakeAck => ApplyOutcome::Handshake,
        ParsedRecord::Unrecognized => ApplyOutcome::Ignored,
    };

    match outcome {
        ApplyOutcome::Stored => state.counters.applied += 1,
        ApplyOutcome::Handshake | ApplyOutcome::Ignored => state.counters.ignored += 1,
        ApplyOutcome::OutOfBounds => {}
    }
    outcome
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_csv;
    use crate::types::{
        SEGMENTS, TEMPERATURE_CELLS, TEMPERATURE_SENTINEL, VOLTAGE_CELLS, VOLTAGE_SENTINEL,
    };

    #[test]
    fn decoded_csv_voltage_lands_in_slot() {
        let store = StateStore::new();
        for s in 1..=SEGMENTS {
            for c in 1..=VOLTAGE_CELLS {
                let value = 3.0 + (s * 100 + c) as f32 / 1000.0;
                let line = format!("V,{s},{c},{value}");
                let record = decode_csv(line.as_bytes()).unwrap();
                assert_eq!(store.apply(record), ApplyOutcome::Stored);
                assert_eq!(store.voltage(s - 1, c - 1), value);
            }
        }
        assert_eq!(store.counters().applied, (SEGMENTS * VOLTAGE_CELLS) as u64);
    }

    #[test]
    fn untouched_slots_keep_sentinel() {
        let store = StateStore::new();
        store.apply(ParsedRecord::VoltageReading { segment: 0, cell: 0, volts: 3.9 });
        store.apply(ParsedRecord::TemperatureReading { segment: 0, cell: 0, celsius: 22 });
        assert_eq!(store.voltage(0, 1), VOLTAGE_SENTINEL);
        assert_eq!(store.voltage(11, 11), VOLTAGE_SENTINEL);
        assert_eq!(store.temperature(0, 1), TEMPERATURE_SENTINEL);
        assert_eq!(store.temperature(11, TEMPERATURE_CELLS - 1), TEMPERATURE_SENTINEL);
        assert!(store.snapshot().pack.traction_current.is_none());
    }

    #[test]
    fn last_write_wins() {
        let store = StateStore::new();
        store.apply(decode_csv(b"V,1,1,3.70").unwrap());
        store.apply(decode_csv(b"V,1,1,3.90").unwrap());
        assert_eq!(store.voltage(0, 0), 3.90);

        store.apply_batch([
            ParsedRecord::PackCurrentReading { amps: 10.0 },
            ParsedRecord::PackCurrentReading { amps: -4.5 },
        ]);
        assert_eq!(store.snapshot().pack.traction_current, Some(-4.5));
    }

    #[test]
    fn out_of_bounds_is_a_counted_no_op() {
        let store = StateStore::new();
        let before = store.snapshot();
        let outcome = store.apply(ParsedRecord::VoltageReading {
            segment: SEGMENTS,
            cell: 0,
            volts: 4.0,
        });
        assert_eq!(outcome, ApplyOutcome::OutOfBounds);
        let outcome = store.apply(ParsedRecord::TemperatureReading {
            segment: 0,
            cell: TEMPERATURE_CELLS,
            celsius: 30,
        });
        assert_eq!(outcome, ApplyOutcome::OutOfBounds);

        let after = store.snapshot();
        assert_eq!(after.voltages, before.voltages);
        assert_eq!(after.temperatures, before.temperatures);
        assert_eq!(after.counters.out_of_bounds, 2);
    }

    #[test]
    fn scalars_and_control_records() {
        let store = StateStore::new();
        let delta = store.apply_batch([
            ParsedRecord::ChargeCurrentReading { amps: 4.0 },
            ParsedRecord::PackVoltageReading { volts: 540.0 },
            ParsedRecord::ChargerStatusReading { connected: true },
            ParsedRecord::HandshakeAck,
            ParsedRecord::Unrecognized,
        ]);
        assert_eq!(delta.applied, 3);
        assert_eq!(delta.ignored, 2);

        let pack = store.snapshot().pack;
        assert_eq!(pack.charge_current, Some(4.0));
        assert_eq!(pack.pack_voltage, Some(540.0));
        assert_eq!(pack.charger_connected, Some(true));
        assert_eq!(store.apply(ParsedRecord::HandshakeAck), ApplyOutcome::Handshake);
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let store = StateStore::new();
        store.apply(ParsedRecord::VoltageReading { segment: 2, cell: 3, volts: 3.8 });
        let snap = store.snapshot();
        store.apply(ParsedRecord::VoltageReading { segment: 2, cell: 3, volts: 4.0 });
        assert_eq!(snap.voltage(2, 3), 3.8);
        assert_eq!(store.voltage(2, 3), 4.0);
    }

    #[test]
    fn concurrent_writer_and_reader() {
        use std::sync::Arc;

        let store = Arc::new(StateStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    let volts = 3.5 + (i % 50) as f32 / 100.0;
                    // Segmento inteiro no mesmo valor, em lote
                    store.apply_batch((0..VOLTAGE_CELLS).map(|cell| {
                        ParsedRecord::VoltageReading { segment: 0, cell, volts }
                    }));
                }
            })
        };

        for _ in 0..200 {
            let snap = store.snapshot();
            let first = snap.voltages[0][0];
            assert!(snap.voltages[0].iter().all(|v| *v == first), "tick parcial observado");
        }
        writer.join().unwrap();
    }
}
