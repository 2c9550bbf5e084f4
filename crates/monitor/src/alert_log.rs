//! Registro de alertas no log, só nas transições.

use bms_core::alerts::{Alert, AlertLevel};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Lembra quais alertas estavam ativos no tick anterior.
#[derive(Debug, Default)]
pub struct AlertTracker {
    active: BTreeMap<String, AlertLevel>,
}

/// Mudanças entre dois ticks de alerta.
#[derive(Debug, Default, PartialEq)]
pub struct AlertChanges {
    pub raised: Vec<String>,
    pub cleared: Vec<String>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Atualiza com os alertas do tick e loga o que mudou.
    pub fn update(&mut self, alerts: &[Alert]) -> AlertChanges {
        let mut changes = AlertChanges::default();
        let mut current = BTreeMap::new();

        for alert in alerts {
            if !self.active.contains_key(&alert.metric) {
                match alert.level {
                    AlertLevel::Critical => error!(
                        "ALERTA {}: {:.3} {}",
                        alert.label, alert.value, alert.unit
                    ),
                    AlertLevel::Warning => warn!(
                        "Alerta {}: {:.3} {}",
                        alert.label, alert.value, alert.unit
                    ),
                }
                changes.raised.push(alert.metric.clone());
            }
            current.insert(alert.metric.clone(), alert.level);
        }

        for metric in self.active.keys() {
            if !current.contains_key(metric) {
                info!("Alerta normalizado: {metric}");
                changes.cleared.push(metric.clone());
            }
        }

        self.active = current;
        changes
    }

    /// Esquece tudo (desconexão).
    pub fn reset(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(metric: &str, level: AlertLevel) -> Alert {
        Alert {
            metric: metric.into(),
            label: metric.into(),
            value: 1.0,
            unit: "V".into(),
            level,
        }
    }

    #[test]
    fn reports_only_transitions() {
        let mut tracker = AlertTracker::new();
        let first = tracker.update(&[
            alert("pack_overcurrent", AlertLevel::Critical),
            alert("seg1_cell2_deviation", AlertLevel::Warning),
        ]);
        assert_eq!(first.raised.len(), 2);
        assert!(first.cleared.is_empty());

        // Mesmo conjunto: nada a reportar
        let same = tracker.update(&[
            alert("pack_overcurrent", AlertLevel::Critical),
            alert("seg1_cell2_deviation", AlertLevel::Warning),
        ]);
        assert_eq!(same, AlertChanges::default());

        let next = tracker.update(&[alert("seg1_cell2_deviation", AlertLevel::Warning)]);
        assert!(next.raised.is_empty());
        assert_eq!(next.cleared, vec!["pack_overcurrent".to_string()]);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn reset_raises_again() {
        let mut tracker = AlertTracker::new();
        tracker.update(&[alert("seg3_temp1", AlertLevel::Warning)]);
        tracker.reset();
        let changes = tracker.update(&[alert("seg3_temp1", AlertLevel::Warning)]);
        assert_eq!(changes.raised, vec!["seg3_temp1".to_string()]);
    }
}
