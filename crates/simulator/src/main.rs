//! # BMS Simulator
//!
//! Emula o pack na outra ponta de uma serial (par virtual ou cabo
//! null-modem): responde ao handshake, aceita o comando de corrente de
//! carga e envia varreduras completas de telemetria no formato da config.
//!
//! ## Uso
//! ```bash
//! bms_simulator                         # porta da seção [simulator]
//! bms_simulator /dev/pts/5              # porta explícita
//! bms_simulator --config outro.toml
//! ```

mod pack_model;

use bms_core::WireFormat;
use bms_core::config::AppConfig;
use bms_core::protocol::{encode_csv_record, encode_legacy_record};
use bms_core::reader::LineFramer;
use clap::Parser;
use pack_model::{HostCommand, PackModel, handshake_reply, parse_host_command};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Linhas corrompidas injetadas quando `noise_every > 0`.
const CSV_NOISE: [&str; 3] = ["V,1,1\n", "X,9,9,zz\n", "V,13,1,3.9\n"];
const LEGACY_NOISE: [&str; 2] = ["t7008\r", "t70080D05zz90\r"];

/// Emulador de pack BMS na serial.
#[derive(Parser, Debug)]
#[command(name = "bms_simulator")]
#[command(about = "Emula o pack e envia telemetria pela serial", long_about = None)]
#[command(version)]
struct Args {
    /// Porta serial (padrão: `simulator.port` da config)
    #[arg(value_name = "PORT")]
    port: Option<String>,

    /// Arquivo de configuração (padrão: config.toml ao lado do executável)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn noise_line(format: WireFormat, n: u64) -> &'static str {
    match format {
        WireFormat::Csv => CSV_NOISE[n as usize % CSV_NOISE.len()],
        WireFormat::Legacy => LEGACY_NOISE[n as usize % LEGACY_NOISE.len()],
    }
}

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_create(&config_path);

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Config: {problem}");
        }
        std::process::exit(2);
    }

    let sim = &config.simulator;
    let port_name = args.port.unwrap_or_else(|| sim.port.clone());
    let interval = sim.interval();
    let format = sim.protocol;

    // ── Porta serial ──
    let mut port = match serialport::new(&port_name, sim.baud_rate)
        .timeout(Duration::from_millis(50))
        .open()
    {
        Ok(port) => port,
        Err(e) => {
            error!("Falha ao abrir {port_name}: {e}");
            std::process::exit(1);
        }
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🔋 BMS SIMULATOR – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Porta:     {port_name} @ {} baud", sim.baud_rate);
    println!("  Protocolo: {format}");
    println!("  Intervalo: {:.1}s", sim.interval_secs);
    if sim.noise_every > 0 {
        println!("  Ruído:     1 linha a cada {}", sim.noise_every);
    }
    println!("══════════════════════════════════════════════");
    println!();

    let mut model = PackModel::new();
    let mut framer = LineFramer::new(format.terminator(), config.serial.max_line_len);
    // CSV só transmite depois do HELLO, legacy depois de abrir o canal
    let mut streaming = false;
    let mut lines_sent: u64 = 0;
    let mut buf = [0u8; 512];
    let mut next_sweep = Instant::now();

    // ── Loop principal ──
    loop {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    let text = String::from_utf8_lossy(&line);
                    match parse_host_command(format, &text) {
                        Some(HostCommand::Hello) => {
                            info!("HELLO recebido, respondendo ACK");
                            if let Err(e) = port.write_all(handshake_reply().as_bytes()) {
                                error!("Erro ao responder handshake: {e}");
                            }
                            streaming = true;
                        }
                        Some(HostCommand::OpenChannel) => {
                            info!("Canal CAN aberto");
                            streaming = true;
                        }
                        Some(HostCommand::AdapterSetup) => debug!("Setup do adaptador: {text}"),
                        Some(HostCommand::ChargeCurrent(amps)) => {
                            model.set_charge_current(amps);
                            info!("Corrente de carga → {:.1} A", model.charge_setpoint());
                        }
                        None => warn!("Comando desconhecido do host: {text:?}"),
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) => {
                error!("Erro de leitura na serial: {e}");
                std::process::exit(1);
            }
        }

        if !streaming || Instant::now() < next_sweep {
            continue;
        }
        next_sweep += interval;
        if next_sweep < Instant::now() {
            next_sweep = Instant::now() + interval;
        }

        let mut out = String::new();
        for record in model.sweep() {
            let encoded = match format {
                WireFormat::Csv => encode_csv_record(&record),
                WireFormat::Legacy => encode_legacy_record(&record),
            };
            let Some(line) = encoded else { continue };
            out.push_str(&line);
            lines_sent += 1;
            if sim.noise_every > 0 && lines_sent % u64::from(sim.noise_every) == 0 {
                out.push_str(noise_line(format, lines_sent / u64::from(sim.noise_every)));
            }
        }

        match port.write_all(out.as_bytes()).and_then(|()| port.flush()) {
            Ok(()) => debug!("→ {} bytes ({lines_sent} linhas no total)", out.len()),
            Err(e) => {
                error!("Erro ao enviar telemetria: {e}");
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_positional() {
        let args = Args::try_parse_from(["bms_simulator", "/dev/pts/5"]).unwrap();
        assert_eq!(args.port.as_deref(), Some("/dev/pts/5"));
        assert!(args.config.is_none());

        let args = Args::try_parse_from(["bms_simulator", "-c", "sim.toml"]).unwrap();
        assert!(args.port.is_none());
        assert_eq!(args.config, Some(PathBuf::from("sim.toml")));
    }

    #[test]
    fn noise_lines_never_decode() {
        for n in 0..6 {
            for format in [WireFormat::Csv, WireFormat::Legacy] {
                let line = noise_line(format, n);
                let body = &line.as_bytes()[..line.len() - 1];
                assert!(bms_core::decode(format, body).is_err(), "{line:?}");
            }
        }
    }
}
