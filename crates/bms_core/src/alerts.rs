//! Sistema de alertas – flags por célula, segmento e pack.
//!
//! Função pura de um [`PackSnapshot`]: sem estado entre ticks, pode ser
//! chamada quantas vezes for preciso.

use crate::config::AlertThresholds;
use crate::types::{PackSnapshot, SEGMENTS, TEMPERATURE_CELLS, VOLTAGE_CELLS};
use serde::{Deserialize, Serialize};

/// Flags de uma célula de tensão. Leitura ausente → tudo `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAlert {
    pub within_nominal: bool,
    pub deviates_from_segment_mean: bool,
    pub out_of_absolute_range: bool,
}

/// Resumo de um segmento.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentAlert {
    /// Média das tensões válidas; `None` se o segmento não tem leitura.
    pub mean_voltage: Option<f32>,
}

/// Flags do pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackAlert {
    pub overcurrent: bool,
}

/// Resultado completo de uma avaliação.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFlags {
    pub cells: [[CellAlert; VOLTAGE_CELLS]; SEGMENTS],
    pub temperatures: [[bool; TEMPERATURE_CELLS]; SEGMENTS],
    pub segments: [SegmentAlert; SEGMENTS],
    pub pack: PackAlert,
}

/// Nível de alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Um alerta disparado, pronto para log ou apresentação.
#[derive(Debug, Clone)]
pub struct Alert {
    pub metric: String,
    pub label: String,
    pub value: f32,
    pub unit: String,
    pub level: AlertLevel,
}

/// Avalia um snapshot contra os thresholds.
pub fn evaluate(snapshot: &PackSnapshot, thresholds: &AlertThresholds) -> AlertFlags {
    let mut flags = AlertFlags::default();

    for (seg, row) in snapshot.voltages.iter().enumerate() {
        let mean = segment_mean(row);
        flags.segments[seg].mean_voltage = mean.map(|m| m as f32);

        for (cell, reading) in row.iter().enumerate() {
            let Some(volts) = *reading else { continue };

            let deviates = mean
                .is_some_and(|m| (volts as f64 - m).abs() > thresholds.deviation_volts as f64);
            let out_of_range =
                volts < thresholds.min_cell_volts || volts > thresholds.max_cell_volts;

            flags.cells[seg][cell] = CellAlert {
                within_nominal: !deviates && !out_of_range,
                deviates_from_segment_mean: deviates,
                out_of_absolute_range: out_of_range,
            };
        }
    }

    for (seg, row) in snapshot.temperatures.iter().enumerate() {
        for (cell, reading) in row.iter().enumerate() {
            // Comparação mantida como no firmware de bancada (`< 59`).
            flags.temperatures[seg][cell] =
                reading.is_some_and(|t| t < thresholds.temperature_alert_below_celsius);
        }
    }

    flags.pack.overcurrent = snapshot
        .pack
        .traction_current
        .is_some_and(|amps| amps > thresholds.overcurrent_amps);

    flags
}

fn segment_mean(row: &[Option<f32>]) -> Option<f64> {
    let (sum, count) = row
        .iter()
        .flatten()
        .fold((0.0f64, 0usize), |(sum, n), &v| (sum + v as f64, n + 1));
    (count > 0).then(|| sum / count as f64)
}

impl AlertFlags {
    /// Alguma flag levantada.
    pub fn any(&self) -> bool {
        self.pack.overcurrent
            || self.temperatures.iter().flatten().any(|&t| t)
            || self
                .cells
                .iter()
                .flatten()
                .any(|c| c.deviates_from_segment_mean || c.out_of_absolute_range)
    }

    /// Lista os alertas ativos com os valores do snapshot avaliado.
    pub fn active_alerts(&self, snapshot: &PackSnapshot) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if self.pack.overcurrent {
            alerts.push(Alert {
                metric: "pack_overcurrent".into(),
                label: "Corrente de tração".into(),
                value: snapshot.pack.traction_current.unwrap_or_default(),
                unit: "A".into(),
                level: AlertLevel::Critical,
            });
        }

        for (seg, row) in self.cells.iter().enumerate() {
            for (cell, flag) in row.iter().enumerate() {
                let value = snapshot.voltage(seg, cell);
                if flag.out_of_absolute_range {
                    alerts.push(Alert {
                        metric: format!("seg{}_cell{}_range", seg + 1, cell + 1),
                        label: format!("Seg {} Célula {} fora da faixa", seg + 1, cell + 1),
                        value,
                        unit: "V".into(),
                        level: AlertLevel::Critical,
                    });
                } else if flag.deviates_from_segment_mean {
                    alerts.push(Alert {
                        metric: format!("seg{}_cell{}_deviation", seg + 1, cell + 1),
                        label: format!("Seg {} Célula {} desvio da média", seg + 1, cell + 1),
                        value,
                        unit: "V".into(),
                        level: AlertLevel::Warning,
                    });
                }
            }
        }

        for (seg, row) in self.temperatures.iter().enumerate() {
            for (cell, &raised) in row.iter().enumerate() {
                if raised {
                    alerts.push(Alert {
                        metric: format!("seg{}_temp{}", seg + 1, cell + 1),
                        label: format!("Seg {} Temp {}", seg + 1, cell + 1),
                        value: snapshot.temperature(seg, cell) as f32,
                        unit: "°C".into(),
                        level: AlertLevel::Warning,
                    });
                }
            }
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackSnapshot;

    fn with_segment(voltages: &[f32]) -> PackSnapshot {
        let mut snap = PackSnapshot::default();
        for (cell, &v) in voltages.iter().enumerate() {
            snap.voltages[0][cell] = Some(v);
        }
        snap
    }

    #[test]
    fn empty_snapshot_raises_nothing() {
        let flags = evaluate(&PackSnapshot::default(), &AlertThresholds::default());
        assert!(!flags.any());
        assert!(flags.segments.iter().all(|s| s.mean_voltage.is_none()));
        assert!(flags.cells.iter().flatten().all(|c| !c.within_nominal));
    }

    #[test]
    fn segment_mean_ignores_missing_cells() {
        let snap = with_segment(&[4.00, 4.00, 4.00]);
        let flags = evaluate(&snap, &AlertThresholds::default());
        let mean = flags.segments[0].mean_voltage.unwrap();
        assert!((mean - 4.00).abs() < 1e-6);
        assert!(flags.segments[1].mean_voltage.is_none());
        assert!(flags.cells[0][0].within_nominal);
    }

    #[test]
    fn lone_low_cell_deviates_but_is_in_range() {
        let snap = with_segment(&[4.00, 4.00, 4.00, 3.80]);
        let flags = evaluate(&snap, &AlertThresholds::default());
        let low = flags.cells[0][3];
        assert!(low.deviates_from_segment_mean);
        assert!(!low.out_of_absolute_range);
        assert!(!low.within_nominal);
        assert!(flags.cells[0][0].within_nominal);
    }

    #[test]
    fn absolute_range_boundaries() {
        let thresholds = AlertThresholds {
            // Desvio desligado para isolar a faixa absoluta
            deviation_volts: 10.0,
            ..Default::default()
        };
        let snap = with_segment(&[3.52, 4.09, 3.51, 4.10]);
        let flags = evaluate(&snap, &thresholds);
        assert!(!flags.cells[0][0].out_of_absolute_range);
        assert!(!flags.cells[0][1].out_of_absolute_range);
        assert!(flags.cells[0][2].out_of_absolute_range);
        assert!(flags.cells[0][3].out_of_absolute_range);
    }

    #[test]
    fn overcurrent_boundary() {
        let mut snap = PackSnapshot::default();
        let thresholds = AlertThresholds::default();

        snap.pack.traction_current = Some(225.0);
        assert!(!evaluate(&snap, &thresholds).pack.overcurrent);

        snap.pack.traction_current = Some(225.01);
        assert!(evaluate(&snap, &thresholds).pack.overcurrent);

        snap.pack.traction_current = None;
        assert!(!evaluate(&snap, &thresholds).pack.overcurrent);
    }

    #[test]
    fn temperature_alert_uses_below_threshold() {
        let mut snap = PackSnapshot::default();
        snap.temperatures[0][0] = Some(25);
        snap.temperatures[0][1] = Some(59);
        snap.temperatures[0][2] = Some(70);
        let flags = evaluate(&snap, &AlertThresholds::default());
        assert!(flags.temperatures[0][0]);
        assert!(!flags.temperatures[0][1]);
        assert!(!flags.temperatures[0][2]);
        // Sem leitura não alerta
        assert!(!flags.temperatures[0][3]);
    }

    #[test]
    fn active_alerts_lists_raised_flags() {
        let mut snap = with_segment(&[4.00, 4.00, 4.00, 3.80, 4.20]);
        snap.pack.traction_current = Some(300.0);
        let flags = evaluate(&snap, &AlertThresholds::default());
        let alerts = flags.active_alerts(&snap);

        assert_eq!(alerts[0].metric, "pack_overcurrent");
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(alerts.iter().any(|a| a.metric == "seg1_cell4_deviation"));
        let high = alerts.iter().find(|a| a.metric == "seg1_cell5_range").unwrap();
        assert_eq!(high.level, AlertLevel::Critical);
        assert_eq!(high.value, 4.20);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let snap = with_segment(&[3.9, 3.7, 4.1]);
        let thresholds = AlertThresholds::default();
        assert_eq!(evaluate(&snap, &thresholds), evaluate(&snap, &thresholds));
    }
}
