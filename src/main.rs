//! Demo de punta a punta: aprobación con intervención humana, revisión de un
//! plan vía tool del cliente y un productor anidado.

use std::time::Duration;

use flow_adapters::payloads::GenerateTaskStepsArgs;
use flow_adapters::StepSelection;
use flow_core::{EventFrame, FlowGateway, ResumeRequest, StartRequest};
use futures::StreamExt;
use log::info;
use serde_json::json;
use suspendflow_rust::{build_gateway, AppError, CONFIG};
use uuid::Uuid;

fn print_frame(frame: &EventFrame) {
    println!("  [{}#{}] {} {}", &frame.scope_id.to_string()[..8], frame.sequence, frame.kind, frame.data);
}

async fn approval(gateway: &FlowGateway) -> Result<(), AppError> {
    println!("== approval-workflow ==");
    let started = gateway.start(StartRequest { pipeline_id: "approval-workflow".into(),
                                               input: json!({"requestType": "expense", "amount": 100, "details": "flight"}) })
                         .await?;
    println!("run {} -> {}", started.run_id, started.status.as_str());
    let state = gateway.engine().state(started.run_id).await?;
    if let Some(prompt) = &state.suspended_payload {
        println!("prompt: {}", prompt["message"]);
    }
    let resumed = gateway.resume(ResumeRequest { run_id: started.run_id,
                                                 resume_payload: json!({"approved": true, "approverName": "Alice"}) })
                         .await?;
    println!("resumed -> {}", serde_json::to_string(&resumed)?);
    let mut frames = gateway.engine().subscribe(started.run_id).await?;
    while let Some(frame) = frames.next().await {
        print_frame(&frame);
    }
    Ok(())
}

async fn plan_review(gateway: &FlowGateway) -> Result<(), AppError> {
    println!("== plan-review ==");
    let engine = gateway.engine().clone();
    let handle = engine.start("plan-review",
                              json!({
                                  "goal": "ship release",
                                  "steps": [
                                      {"description": "run tests", "status": "enabled"},
                                      {"description": "bump version", "status": "enabled"},
                                      {"description": "publish", "status": "enabled"}
                                  ]
                              }))?;
    let mut frames = handle.subscribe()?;
    let mut selection = StepSelection::new();
    let mut invocation: Option<Uuid> = None;
    while let Some(frame) = frames.next().await {
        print_frame(&frame);
        if frame.kind == "tool-call-issued" || frame.kind == "tool-call-args" {
            invocation = frame.data["invocationId"].as_str().and_then(|s| Uuid::parse_str(s).ok());
            let args: GenerateTaskStepsArgs = serde_json::from_value(frame.data["args"].clone())?;
            let complete = args.steps.len() == 3;
            selection.on_stream(args);
            if complete {
                break;
            }
        }
    }
    if let Some(invocation_id) = invocation {
        // el usuario desmarca "bump version" y confirma
        selection.toggle(1);
        gateway.provide_tool_result(flow_core::ToolResultRequest { invocation_id,
                                                                   result: serde_json::to_value(selection.confirm())? })?;
    }
    let done = handle.settled().await;
    println!("plan-review -> {} {}", done.status.as_str(), done.terminal_output.unwrap_or_default());
    Ok(())
}

async fn fulfilment(gateway: &FlowGateway) -> Result<(), AppError> {
    println!("== order-fulfilment ==");
    let started = gateway.start(StartRequest { pipeline_id: "order-fulfilment".into(),
                                               input: json!({"orderId": "A-1", "items": ["book", "pen"]}) })
                         .await?;
    let mut frames = gateway.engine().subscribe(started.run_id).await?;
    while let Some(frame) = frames.next().await {
        print_frame(&frame);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env()
                                                  .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
                             .init();

    let gateway = match build_gateway(&CONFIG, Duration::from_millis(50)) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("bootstrap: {e}");
            std::process::exit(5);
        }
    };
    info!("pipelines={:?}", gateway.engine().pipeline_ids());

    for result in [approval(&gateway).await, plan_review(&gateway).await, fulfilment(&gateway).await] {
        if let Err(e) = result {
            eprintln!("demo: {e}");
            std::process::exit(if e.is_caller_error() { 4 } else { 5 });
        }
    }
}
