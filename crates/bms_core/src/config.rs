//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável serve monitor e simulador.

use crate::protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Falha ao ler ou gravar o `config.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML inválido em {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Falha ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Link serial com o adaptador / BMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Porta padrão para `connect` sem argumento
    pub port: String,
    /// Baud rate (9600 no CANdapter antigo, 115200 no firmware atual)
    pub baud_rate: u32,
    /// Formato de linha: "csv" ou "legacy"
    pub protocol: WireFormat,
    /// Timeout de leitura da porta (ms)
    pub read_timeout_ms: u64,
    /// Espera entre leituras ociosas (ms)
    pub poll_interval_ms: u64,
    /// Espera entre os frames do handshake legacy (ms)
    pub handshake_settle_ms: u64,
    /// Capacidade da fila entre a thread serial e o tick
    pub queue_capacity: usize,
    /// Linhas maiores que isso são descartadas
    pub max_line_len: usize,
    /// Conecta na porta padrão ao iniciar
    pub auto_connect: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "COM3".into(),
            baud_rate: 115_200,
            protocol: WireFormat::Csv,
            read_timeout_ms: 100,
            poll_interval_ms: 10,
            handshake_settle_ms: 1000,
            queue_capacity: 4096,
            max_line_len: 256,
            auto_connect: false,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_settle(&self) -> Duration {
        Duration::from_millis(self.handshake_settle_ms)
    }
}

/// Thresholds do motor de alertas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Desvio máximo da média do segmento (V)
    pub deviation_volts: f32,
    /// Tensão mínima de célula (V)
    pub min_cell_volts: f32,
    /// Tensão máxima de célula (V)
    pub max_cell_volts: f32,
    /// Temperaturas abaixo deste valor alertam (°C)
    pub temperature_alert_below_celsius: i16,
    /// Corrente de tração máxima (A)
    pub overcurrent_amps: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            deviation_volts: 0.1,
            min_cell_volts: 3.52,
            max_cell_volts: 4.09,
            temperature_alert_below_celsius: 59,
            overcurrent_amps: 225.0,
        }
    }
}

/// Publicação UDP do snapshot para uma camada de apresentação externa.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    /// Destino `ip:porta`
    pub dest_addr: String,
    /// IP local para bind (vazio = auto)
    pub bind_ip: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dest_addr: "127.0.0.1:5006".into(),
            bind_ip: String::new(),
        }
    }
}

/// Ticks do monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Intervalo de drenagem da fila (ms)
    pub drain_interval_ms: u64,
    /// Intervalo de recálculo dos alertas (ms)
    pub alert_interval_ms: u64,
    pub publish: PublishConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: 200,
            alert_interval_ms: 1000,
            publish: PublishConfig::default(),
        }
    }
}

/// Configuração do simulador de pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub port: String,
    pub baud_rate: u32,
    pub protocol: WireFormat,
    /// Intervalo entre varreduras completas do pack (s)
    pub interval_secs: f64,
    /// Injeta uma linha corrompida a cada N linhas (0 = nunca)
    pub noise_every: u32,
}

impl SimulatorConfig {
    /// Intervalo entre varreduras; valores não representáveis caem em 1 s.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs).unwrap_or(Duration::from_secs(1))
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: "COM4".into(),
            baud_rate: 115_200,
            protocol: WireFormat::Csv,
            interval_secs: 1.0,
            noise_every: 0,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub monitor: MonitorConfig,
    pub alerts: AlertThresholds,
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Lê e interpreta o arquivo, sem fallback.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Carrega o arquivo; ausente ou inválido vira configuração padrão.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("{} não existe, usando configuração padrão", path.display());
            return Self::default();
        }
        match Self::read(path) {
            Ok(config) => {
                info!("Configuração carregada de {}", path.display());
                config
            }
            Err(e) => {
                warn!("{e}; usando configuração padrão");
                Self::default()
            }
        }
    }

    /// Como [`AppConfig::load`], gravando os padrões se o arquivo não existe.
    pub fn load_or_create(path: &Path) -> Self {
        let config = Self::load(path);
        if !path.exists() {
            if let Err(e) = config.save(path) {
                warn!("Não foi possível salvar config padrão: {e}");
            }
        }
        config
    }

    /// Grava em TOML legível.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// `config.toml` no diretório do executável, ou no diretório atual.
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.serial.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }
        if self.serial.queue_capacity == 0 {
            errors.push("Capacidade da fila não pode ser 0".into());
        }
        if self.serial.max_line_len < crate::protocol::LEGACY_MIN_LEN {
            errors.push(format!(
                "max_line_len muito pequeno: {} (mínimo {})",
                self.serial.max_line_len,
                crate::protocol::LEGACY_MIN_LEN
            ));
        }
        if self.monitor.drain_interval_ms == 0 || self.monitor.alert_interval_ms == 0 {
            errors.push("Intervalos do monitor devem ser maiores que 0".into());
        }
        if self.alerts.min_cell_volts >= self.alerts.max_cell_volts {
            errors.push(format!(
                "Faixa de tensão inválida: {}–{} V",
                self.alerts.min_cell_volts, self.alerts.max_cell_volts
            ));
        }
        if self.alerts.deviation_volts <= 0.0 {
            errors.push("deviation_volts deve ser positivo".into());
        }
        if !(0.01..=60.0).contains(&self.simulator.interval_secs) {
            errors.push(format!(
                "Intervalo do simulador inválido: {} (0.01–60.0)",
                self.simulator.interval_secs
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.serial.port, parsed.serial.port);
        assert_eq!(config.serial.protocol, parsed.serial.protocol);
        assert_eq!(config.alerts.overcurrent_amps, parsed.alerts.overcurrent_amps);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 9600
protocol = "legacy"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.protocol, WireFormat::Legacy);
        // Outros campos devem ter valor padrão
        assert_eq!(config.serial.queue_capacity, 4096);
        assert_eq!(config.monitor.drain_interval_ms, 200);
        assert_eq!(config.alerts.temperature_alert_below_celsius, 59);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = AppConfig::default();
        config.serial.baud_rate = 0;
        config.alerts.min_cell_volts = 4.2;
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.serial.port = "/dev/ttyACM1".into();
        config.monitor.publish.enabled = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.serial.port, "/dev/ttyACM1");
        assert!(loaded.monitor.publish.enabled);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "serial = [não é toml").unwrap();
        assert!(matches!(AppConfig::read(&path), Err(ConfigError::Parse { .. })));
        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.serial.port, SerialConfig::default().port);
    }

    #[test]
    fn load_or_create_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(AppConfig::read(&path), Err(ConfigError::Io { .. })));

        let created = AppConfig::load_or_create(&path);
        assert!(path.exists());
        assert_eq!(created.serial.port, AppConfig::read(&path).unwrap().serial.port);
    }

    #[test]
    fn non_finite_simulator_interval_is_rejected() {
        for bad in [f64::INFINITY, f64::NAN, 1e300, 0.0, -1.0] {
            let mut config = AppConfig::default();
            config.simulator.interval_secs = bad;
            assert_eq!(config.validate().len(), 1, "interval_secs = {bad}");
            // Mesmo sem validar, o conversor não entra em panic
            let _ = config.simulator.interval();
        }
        assert_eq!(SimulatorConfig::default().interval(), Duration::from_secs(1));
    }
}
