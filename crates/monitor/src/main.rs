//! # BMS Monitor
//!
//! Console headless que conecta ao pack pela serial, drena a telemetria,
//! avalia alertas e opcionalmente publica o snapshot via UDP.
//!
//! ## Uso
//! ```bash
//! bms_monitor                          # config padrão
//! bms_monitor --port /dev/ttyUSB0      # conecta na partida
//! bms_monitor --config outro.toml
//! ```
//!
//! Comandos no console: `connect [porta]`, `disconnect`, `charge <A>`,
//! `status`, `ports`, `help`, `quit`.

mod alert_log;
mod console;
mod publisher;

use alert_log::AlertTracker;
use bms_core::config::AppConfig;
use bms_core::publish::SnapshotFrame;
use bms_core::transport::list_ports;
use bms_core::{BmsSession, ConnectionState, SerialOpener, evaluate};
use clap::Parser;
use console::{HELP, OperatorCommand};
use publisher::SnapshotPublisher;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Console headless do monitor de BMS.
#[derive(Parser, Debug)]
#[command(name = "bms_monitor")]
#[command(about = "Conecta ao pack pela serial e acompanha telemetria e alertas", long_about = None)]
#[command(version)]
struct Args {
    /// Arquivo de configuração (padrão: config.toml ao lado do executável)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Porta serial para conectar na partida
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,
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

    // ── Config ──
    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_create(&config_path);
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    // ── Sessão ──
    let opener = SerialOpener::from_config(&config.serial);
    let mut session = BmsSession::new(config.serial.clone(), Box::new(opener));

    let publisher = if config.monitor.publish.enabled {
        match SnapshotPublisher::new(&config.monitor.publish) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Falha ao criar socket UDP: {e}");
                None
            }
        }
    } else {
        None
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🔋 BMS MONITOR – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Porta:     {} @ {} baud", config.serial.port, config.serial.baud_rate);
    println!("  Protocolo: {}", config.serial.protocol);
    println!("  Config:    {}", config_path.display());
    if publisher.is_some() {
        println!("  Publica:   {}", config.monitor.publish.dest_addr);
    }
    println!("══════════════════════════════════════════════");
    println!("{HELP}");
    println!();

    let startup_port = args
        .port
        .or_else(|| config.serial.auto_connect.then(|| config.serial.port.clone()));
    if let Some(port) = startup_port {
        connect(&mut session, &port);
    }

    let commands = console::spawn_console_thread();
    let drain_interval = Duration::from_millis(config.monitor.drain_interval_ms.max(1));
    let alert_interval = Duration::from_millis(config.monitor.alert_interval_ms.max(1));
    let mut alerts = AlertTracker::new();
    let mut last_alert_tick = Instant::now();

    // ── Loop principal ──
    loop {
        let cycle_start = Instant::now();

        while let Ok(cmd) = commands.try_recv() {
            if !handle_command(&mut session, cmd, &config, &alerts) {
                session.disconnect();
                info!("Encerrando monitor");
                return;
            }
        }

        let report = session.drain();
        if report.handshake_completed {
            info!("Handshake confirmado, recebendo telemetria");
        }
        if let Some(reason) = &report.link_lost {
            error!("Conexão com o BMS perdida: {reason}. Use `connect` para reconectar.");
            alerts.reset();
        }

        if last_alert_tick.elapsed() >= alert_interval {
            last_alert_tick = Instant::now();
            let state = session.state();
            let snapshot = session.snapshot();
            let flags = evaluate(&snapshot, &config.alerts);
            if state == ConnectionState::Connected {
                let active = if flags.any() {
                    flags.active_alerts(&snapshot)
                } else {
                    Vec::new()
                };
                alerts.update(&active);
            }
            if let Some(publisher) = &publisher {
                publisher.publish(&SnapshotFrame {
                    state,
                    snapshot,
                    alerts: flags,
                    link: session.link_stats(),
                });
            }
        }

        // Dormir pelo tempo restante do intervalo
        let elapsed = cycle_start.elapsed();
        if elapsed < drain_interval {
            std::thread::sleep(drain_interval - elapsed);
        }
    }
}

fn connect(session: &mut BmsSession, port: &str) {
    info!("Conectando em {port}...");
    if let Err(e) = session.connect(port) {
        error!("Falha ao conectar em {port}: {e}");
    }
}

/// Executa um comando. Retorna `false` para sair.
fn handle_command(
    session: &mut BmsSession,
    cmd: OperatorCommand,
    config: &AppConfig,
    alerts: &AlertTracker,
) -> bool {
    match cmd {
        OperatorCommand::Connect(port) => {
            let port = port.unwrap_or_else(|| config.serial.port.clone());
            connect(session, &port);
        }
        OperatorCommand::Disconnect => {
            session.disconnect();
            info!("Desconectado");
        }
        OperatorCommand::Charge(amps) => {
            if let Err(e) = session.set_charge_current(amps) {
                warn!("Comando de carga rejeitado: {e}");
            }
        }
        OperatorCommand::Status => print_status(session, alerts),
        OperatorCommand::Ports => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("Nenhuma porta serial encontrada");
            }
            for port in ports {
                println!("  {port}");
            }
        }
        OperatorCommand::Help => println!("{HELP}"),
        OperatorCommand::Quit => return false,
    }
    true
}

fn print_status(session: &BmsSession, alerts: &AlertTracker) {
    let (state, port, last_error) = session.status();
    let snapshot = session.snapshot();
    let stats = session.link_stats();
    let reported = snapshot.voltage_readings();
    let temps = snapshot.temperature_readings();

    println!("── Status ──────────────────────────────────");
    println!(
        "  Estado:    {state} ({}, {})",
        port.as_deref().unwrap_or("-"),
        session.format()
    );
    if let Some(e) = last_error {
        println!("  Último erro: {e}");
    }
    println!("  Células:   {reported} tensões, {temps} temperaturas");
    println!("  Alertas:   {} ativos", alerts.active_count());
    let fmt = |v: Option<f32>, unit: &str| v.map_or("-".to_string(), |v| format!("{v:.2} {unit}"));
    println!(
        "  Pack:      {} | tração {} | carga {} | carregador {}",
        fmt(snapshot.pack.pack_voltage, "V"),
        fmt(snapshot.pack.traction_current, "A"),
        fmt(snapshot.pack.charge_current, "A"),
        match snapshot.pack.charger_connected {
            Some(true) => "conectado",
            Some(false) => "desconectado",
            None => "-",
        }
    );
    println!(
        "  Linhas:    {} recebidas, {} erros, {} descartadas, {} fila cheia",
        stats.lines_received,
        stats.decode_errors(),
        stats.discarded_not_connected,
        stats.queue_overflow
    );
    println!("────────────────────────────────────────────");
}
