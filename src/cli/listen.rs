use super::ui;
use crate::bus::RedisBus;
use crate::core::config::AppConfig;
use crate::events::{BusEnvelope, BusEvent};
use anyhow::Result;
use futures::StreamExt;
use tracing::{info, warn};

/// Prints every bus event on the configured channel until Ctrl-C.
pub async fn run(config: &AppConfig) -> Result<()> {
    let bus = RedisBus::new(&config.bus.url)?;
    let stream = bus.subscribe(&config.bus.channel).await?;
    tokio::pin!(stream);
    info!(channel = %config.bus.channel, "Listening for currency updates");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            payload = stream.next() => {
                let Some(payload) = payload else {
                    warn!("Message bus subscription ended");
                    break;
                };
                match serde_json::from_slice::<BusEnvelope>(&payload) {
                    Ok(envelope) => println!("{}", describe(&envelope)),
                    Err(e) => println!(
                        "{}",
                        ui::style_text(
                            &format!("Unreadable message ({e}): {}", String::from_utf8_lossy(&payload)),
                            ui::StyleType::Error
                        )
                    ),
                }
            }
        }
    }
    Ok(())
}

pub fn describe(envelope: &BusEnvelope) -> String {
    let stamp = envelope.timestamp.format("%H:%M:%S");
    let action = envelope.event.action().to_string().to_uppercase();
    match &envelope.event {
        BusEvent::Created(record) | BusEvent::Updated(record) => format!(
            "[{stamp}] {action:<8} {}/{} = {}",
            record.base_currency, record.target_currency, record.rate
        ),
        BusEvent::Deleted(pair) => format!("[{stamp}] {action:<8} {pair}"),
    }
}
