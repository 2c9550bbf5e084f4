//! Thread de console que lê comandos do operador e envia ao loop principal.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io::BufRead;
use tracing::{debug, warn};

/// Comando digitado pelo operador.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Conecta na porta dada ou na porta padrão da config
    Connect(Option<String>),
    Disconnect,
    /// Corrente de carga em A
    Charge(f64),
    Status,
    Ports,
    Help,
    Quit,
}

pub const HELP: &str = "\
comandos:
  connect [porta]   conecta ao BMS (padrão: porta da config)
  disconnect        encerra a conexão
  charge <A>        ajusta a corrente de carga (0–10 A)
  status            estado do link e contadores
  ports             lista portas seriais
  help              esta ajuda
  quit              sai";

/// Interpreta uma linha. Linha vazia retorna `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<OperatorCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("argumentos demais para `{verb}`"));
    }

    let cmd = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("connect", port) => OperatorCommand::Connect(port.map(str::to_string)),
        ("disconnect", None) => OperatorCommand::Disconnect,
        ("charge", Some(value)) => {
            let amps = value
                .parse::<f64>()
                .map_err(|_| format!("corrente inválida: {value:?}"))?;
            OperatorCommand::Charge(amps)
        }
        ("charge", None) => return Err("uso: charge <A>".into()),
        ("status", None) => OperatorCommand::Status,
        ("ports", None) => OperatorCommand::Ports,
        ("help" | "?", None) => OperatorCommand::Help,
        ("quit" | "exit" | "q", None) => OperatorCommand::Quit,
        (other, _) => return Err(format!("comando desconhecido ou mal formado: `{other}`")),
    };
    Ok(Some(cmd))
}

/// Inicia a thread de console. Retorna o receiver do channel.
pub fn spawn_console_thread() -> Receiver<OperatorCommand> {
    let (tx, rx) = unbounded::<OperatorCommand>();

    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || console_loop(&tx))
        .expect("Falha ao criar thread de console");

    rx
}

fn console_loop(tx: &Sender<OperatorCommand>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Erro lendo stdin: {e}");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("{e}\n{HELP}"),
        }
    }
    // stdin fechado (serviço, pipe): o monitor segue rodando sem console
    debug!("Console encerrado");
}
