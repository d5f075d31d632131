//! `flow`: operar runs contra el Suspension Store de Postgres.
//!
//! ```text
//! flow start  --pipeline <ID> [--input '<JSON>']
//! flow resume --run <UUID> [--payload '<JSON>']
//! flow cancel --run <UUID>
//! flow purge
//! ```
//!
//! Códigos de salida: 0 ok, 2 uso, 4 protocolo / no encontrado, 5
//! infraestructura (store, runtime).

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use flow_core::{classify_error, ErrorClass, FlowError, FlowGateway, PipelineEngine, ResumeRequest, StartRequest,
                SuspensionStore};
use flow_persistence::{build_dev_pool_from_env, PgSuspensionStore};
use log::error;
use serde_json::Value;
use uuid::Uuid;

const USAGE: &str = "Uso:
  flow start  --pipeline <ID> [--input '<JSON>']
  flow resume --run <UUID> [--payload '<JSON>']
  flow cancel --run <UUID>
  flow purge";

#[derive(Debug, PartialEq)]
enum Command {
    Start { pipeline: String, input: Value },
    Resume { run_id: Uuid, payload: Value },
    Cancel { run_id: Uuid },
    Purge,
}

/// Valor del flag `name` (la posición siguiente), si aparece.
fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn json_flag(args: &[String], name: &str) -> Result<Value, String> {
    match flag(args, name) {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("{name}: JSON inválido: {e}")),
        None => Ok(Value::Null),
    }
}

fn run_flag(args: &[String]) -> Result<Uuid, String> {
    let raw = flag(args, "--run").ok_or("falta --run <UUID>")?;
    Uuid::parse_str(raw).map_err(|e| format!("--run: {e}"))
}

fn parse(args: &[String]) -> Result<Command, String> {
    let (cmd, rest) = args.split_first().ok_or("falta el comando")?;
    match cmd.as_str() {
        "start" => {
            let pipeline = flag(rest, "--pipeline").ok_or("falta --pipeline <ID>")?.to_string();
            Ok(Command::Start { pipeline,
                                input: json_flag(rest, "--input")? })
        }
        "resume" => Ok(Command::Resume { run_id: run_flag(rest)?,
                                         payload: json_flag(rest, "--payload")? }),
        "cancel" => Ok(Command::Cancel { run_id: run_flag(rest)? }),
        "purge" => Ok(Command::Purge),
        other => Err(format!("comando desconocido '{other}'")),
    }
}

fn exit_code(e: &FlowError) -> i32 {
    match classify_error(e) {
        ErrorClass::Validation | ErrorClass::Protocol | ErrorClass::NotFound => 4,
        ErrorClass::Runtime | ErrorClass::Durability => 5,
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("[flow] no se pudo serializar la respuesta: {e}"),
    }
}

async fn execute(gateway: &FlowGateway, command: Command) -> Result<(), FlowError> {
    match command {
        Command::Start { pipeline, input } => {
            let res = gateway.start(StartRequest { pipeline_id: pipeline,
                                                   input })
                             .await?;
            print_json(&res);
        }
        Command::Resume { run_id, payload } => {
            let res = gateway.resume(ResumeRequest { run_id,
                                                     resume_payload: payload })
                             .await?;
            print_json(&res);
        }
        Command::Cancel { run_id } => {
            let status = gateway.cancel(run_id).await?;
            println!("{}", status.as_str());
        }
        Command::Purge => {
            let purged = gateway.engine().purge_expired().await?;
            print_json(&purged);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env()
                                                  .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
                             .with_writer(std::io::stderr)
                             .init();
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("[flow] {msg}\n{USAGE}");
            exit(2);
        }
    };

    let pool = match build_dev_pool_from_env() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[flow] requiere DATABASE_URL y un Postgres accesible: {e}");
            exit(5);
        }
    };
    let store: Arc<dyn SuspensionStore> = Arc::new(PgSuspensionStore::from_pool(pool));
    let engine = match PipelineEngine::builder(store).build() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("[flow] engine: {e}");
            exit(5);
        }
    };
    if let Err(e) = flow_adapters::register_all(&engine, Duration::from_secs(1)) {
        eprintln!("[flow] registro de pipelines: {e}");
        exit(5);
    }

    let gateway = FlowGateway::new(engine);
    if let Err(e) = execute(&gateway, command).await {
        error!("command failed: {e}");
        eprintln!("[flow] {e}");
        exit(exit_code(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_start_with_json_input() {
        let cmd = parse(&args(&["start", "--pipeline", "approval-workflow", "--input", r#"{"details":"x"}"#])).expect("parse");
        assert_eq!(cmd,
                   Command::Start { pipeline: "approval-workflow".into(),
                                    input: json!({"details": "x"}) });
    }

    #[test]
    fn resume_requires_a_valid_run_id() {
        assert!(parse(&args(&["resume", "--run", "nope"])).is_err());
        let id = Uuid::new_v4().to_string();
        let cmd = parse(&args(&["resume", "--run", &id])).expect("parse");
        assert!(matches!(cmd, Command::Resume { payload: Value::Null, .. }));
    }

    #[test]
    fn usage_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&args(&["start"])).is_err());
        assert!(parse(&args(&["frobnicate"])).is_err());
        assert_eq!(parse(&args(&["purge"])), Ok(Command::Purge));
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let id = Uuid::new_v4();
        assert_eq!(exit_code(&FlowError::UnknownRun(id)), 4);
        assert_eq!(exit_code(&FlowError::ConcurrentResume(id)), 4);
        assert_eq!(exit_code(&FlowError::Durability("down".into())), 5);
    }
}
