//! Weather conversation against a simulated dialogue engine.
//!
//! Run with `VOXFLOW_LOG_LEVEL=debug` to see admission decisions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;
use voxflow_dialog_flow::{action_fn, Dialog, DialogConfig, FlowReply, StartSession};
use voxflow_infra_common::events::{Delivery, EventBus, EventPayload, LocalEventBus};
use voxflow_infra_common::logging::{log_welcome, setup_logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DialogConfig::from_env()?;
    setup_logging(&config.logging)?;
    log_welcome(&config.service_name, env!("CARGO_PKG_VERSION"));

    let bus = LocalEventBus::new();
    let dialog = Dialog::builder(Arc::new(bus.clone()))
        .config(config)
        .build();

    // Stand-in for the dialogue engine's text-to-speech side.
    for topic in ["continue_session", "end_session"] {
        bus.subscribe(
            topic,
            Box::new(move |payload: EventPayload| {
                info!("[{}] {}", topic, payload);
                Delivery::Keep
            }),
        );
    }

    let forecast = action_fn(|message, flow| async move {
        let city = message["slots"]["city"].as_str().unwrap_or("your area").to_string();
        flow.end();
        Ok(FlowReply::text(format!("It will be sunny in {} tomorrow", city)))
    });
    dialog.flow(
        "weather",
        action_fn(move |_message, flow| {
            let forecast = forecast.clone();
            async move {
                flow.continue_with("city", forecast);
                Ok(FlowReply::text("Which city?"))
            }
        }),
    );

    dialog.session_flow(
        "reminder-7",
        action_fn(|_message, _flow| async move { Ok(FlowReply::text("Time to water the plants")) }),
    );

    let mut outcomes = dialog.outcomes();

    bus.publish("intent/weather", json!({"session_id": "kitchen-1"})).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.publish(
        "intent/city",
        json!({"session_id": "kitchen-1", "slots": {"city": "Paris"}}),
    )
    .await?;

    dialog.start_session(StartSession::action(None, "reminder-7")).await?;
    bus.publish(
        "session_started",
        json!({"session_id": "garden-1", "custom_data": "reminder-7"}),
    )
    .await?;

    for _ in 0..2 {
        let finished = outcomes.recv().await?;
        info!("Session {} {}", finished.session_id, finished.outcome);
    }

    dialog.destroy();
    bus.shutdown();
    Ok(())
}
