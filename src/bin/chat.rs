//! Chat interactivo en terminal con memoria de conversación.
//!
//! Comandos: `:source N` muestra el texto completo de la fuente N de la última
//! respuesta, `:reset` borra el historial y `:quit` sale.

use std::io::Write;

use anyhow::Context;
use langassist_rag::{
    app_state::AppState, config::AppConfig, conversation::ConversationManager,
    models::SourcePreview,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Ask(String),
    Source(usize),
    Reset,
    Quit,
    Help,
    Empty,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Ask(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit" | "q"), None) => Ok(Command::Quit),
        (Some("reset"), None) => Ok(Command::Reset),
        (Some("help"), None) => Ok(Command::Help),
        (Some("source"), Some(n)) => match n.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Command::Source(n)),
            _ => Err(format!("Número de fuente inválido: {n}")),
        },
        _ => Err(format!("Comando desconocido: {line} (prueba :help)")),
    }
}

fn print_help() {
    println!("Escribe una pregunta, o uno de estos comandos:");
    println!("  :source N   muestra el texto completo de la fuente N");
    println!("  :reset      empieza una conversación nueva");
    println!("  :quit       sale");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;
    let memory_limit = cfg.history_max_turns;
    let state = AppState::bootstrap(cfg).context("Error inicializando el estado de la aplicación")?;

    let mut memory = ConversationManager::new(memory_limit);
    let mut last_sources: Vec<SourcePreview> = Vec::new();

    println!(
        "LangAssist listo ({}). Escribe :help para ver los comandos.",
        state.collections.join(", ")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Ok(Command::Empty) => {}
            Ok(Command::Quit) => break,
            Ok(Command::Help) => print_help(),
            Ok(Command::Reset) => {
                memory.clear();
                last_sources.clear();
                println!("Conversación reiniciada.");
            }
            Ok(Command::Source(n)) => match last_sources.get(n - 1) {
                Some(source) => println!("[{n}] {}\n{}", source.source, source.full_content),
                None => println!("No hay fuente {n} en la última respuesta."),
            },
            Ok(Command::Ask(question)) => match state.ask(&question, memory.history()).await {
                Ok(result) => {
                    println!("\n{}\n", result.answer);
                    last_sources = result.sources.iter().map(SourcePreview::from).collect();
                    for (i, source) in last_sources.iter().enumerate() {
                        println!("  [{}] {}: {}", i + 1, source.source, source.preview);
                    }
                    memory.append(question, result.answer);
                }
                Err(e) => {
                    error!("Error al procesar la pregunta: {e}");
                    println!("No se pudo responder ({}): {e}", e.kind());
                }
            },
            Err(msg) => println!("{msg}"),
        }
    }

    println!("¡Hasta luego!");
    Ok(())
}
