mod config;
mod logging;
mod loopback;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::info;

use config::SmokeConfig;
use engine_core::{ConnectionPhase, EngineCommand, EngineEvent, EventStream};
use engine_sync::{EngineHandle, spawn_engine};
use loopback::LoopbackGateway;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();
    info!("starting engine-smoke");

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    info!(
        gateway_url = %config.gateway_url,
        user_id = %config.engine.user_id,
        page_size = config.engine.page_size,
        "config loaded; running against the in-process loopback gateway"
    );

    let gateway = Arc::new(LoopbackGateway::new());
    let handle = spawn_engine(gateway, config.engine);
    let mut events = handle.subscribe();

    drive(&handle, EngineCommand::Connect).await;
    await_event(&mut events, "stream connect", |event| {
        matches!(
            event,
            EngineEvent::ConnectionChanged { status } if status.phase == ConnectionPhase::Connected
        )
    })
    .await;
    println!("Connected to the loopback gateway.");

    drive(
        &handle,
        EngineCommand::OpenChannel {
            channel_id: "town-square".to_owned(),
        },
    )
    .await;
    let timeline = await_event(&mut events, "first history page", |event| {
        matches!(
            event,
            EngineEvent::TimelineUpdated { channel_id, posts, .. }
                if channel_id == "town-square" && !posts.is_empty()
        )
    })
    .await;
    if let EngineEvent::TimelineUpdated { posts, .. } = &timeline {
        println!("Opened #town-square with {} posts.", posts.len());
    }

    let body = "engine smoke check-in";
    drive(
        &handle,
        EngineCommand::SendMessage {
            channel_id: "town-square".to_owned(),
            body: body.to_owned(),
            root_id: None,
        },
    )
    .await;
    await_event(&mut events, "send confirmation", |event| {
        matches!(
            event,
            EngineEvent::TimelineUpdated { posts, .. }
                if posts.iter().any(|p| p.body == body && !p.is_pending && p.id.is_some())
        )
    })
    .await;
    println!("Sent a message and saw it confirmed in the timeline.");

    drive(
        &handle,
        EngineCommand::OpenThread {
            root_id: "m-2".to_owned(),
        },
    )
    .await;
    let thread = await_event(&mut events, "thread replies", |event| {
        matches!(
            event,
            EngineEvent::ThreadUpdated { root_id, replies } if root_id == "m-2" && !replies.is_empty()
        )
    })
    .await;
    if let EngineEvent::ThreadUpdated { replies, .. } = &thread {
        println!("Opened the m-2 thread with {} replies.", replies.len());
    }

    drive(
        &handle,
        EngineCommand::MarkRead {
            channel_id: "town-square".to_owned(),
        },
    )
    .await;
    await_event(&mut events, "read-mark acknowledgement", |event| {
        matches!(
            event,
            EngineEvent::ChannelListUpdated { channels } if channels
                .iter()
                .any(|c| c.channel_id == "town-square" && c.unread_count == 0)
        )
    })
    .await;
    println!("Marked #town-square read.");

    drive(&handle, EngineCommand::Shutdown).await;
    await_event(&mut events, "engine shutdown", |event| {
        matches!(
            event,
            EngineEvent::ConnectionChanged { status } if status.phase == ConnectionPhase::Terminated
        )
    })
    .await;
    println!("Engine smoke run complete.");
}

async fn drive(handle: &EngineHandle, command: EngineCommand) {
    if let Err(err) = handle.send(command).await {
        eprintln!("Engine rejected a command: {err}");
        std::process::exit(1);
    }
}

async fn await_event<F>(events: &mut EventStream, step: &str, mut matches: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    let waited = timeout(STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    info!(skipped, "event stream lagged during the smoke run");
                }
                Err(RecvError::Closed) => {
                    eprintln!("Engine event stream closed while waiting for {step}");
                    std::process::exit(1);
                }
            }
        }
    })
    .await;

    match waited {
        Ok(event) => event,
        Err(_) => {
            eprintln!("Timed out waiting for {step}");
            std::process::exit(1);
        }
    }
}
