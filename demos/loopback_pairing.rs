//! In-process pairing walkthrough
//!
//! A simulated phone and laptop pair through the loopback rendezvous: the
//! phone shows its pairing link, the laptop dials it, the phone flips to the
//! front camera mid-call, and both sides shut down in order.

use camlink::{
    DebugLogger, Event, GlobalConfig, LoopbackRendezvous, PairingContext, SimulatedDevices,
};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    DebugLogger::new()
        .with_debug(GlobalConfig::from_env().debug_logging)
        .install()?;

    let rendezvous = LoopbackRendezvous::new();
    let phone = PairingContext::loopback(&rendezvous, &SimulatedDevices::phone());
    let laptop = PairingContext::loopback(&rendezvous, &SimulatedDevices::laptop());

    println!("📱 Starting phone sender...");
    let sender = phone.sender().start();
    let mut sender_events = sender
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("sender events already taken"))?;
    let state = sender.wait_for(|s| s.is_ready() || s.is_terminal()).await;
    println!("   {} ({})", state, sender.status_indicator());

    let affordance = sender
        .affordance()
        .ok_or_else(|| anyhow::anyhow!("sender failed to start: {:?}", sender.last_error()))?;
    println!("   Pairing link: {}", affordance.url());

    println!("💻 Starting laptop viewer...");
    let viewer = laptop.viewer().start().await?;
    let consumer = viewer.dial(affordance.url()).await?;
    println!(
        "   {} ← {} ({})",
        consumer.session_id(),
        consumer.remote(),
        consumer.status_indicator()
    );
    if let Some(stream) = consumer.remote_stream() {
        for track in &stream.tracks {
            println!("     {} track: {}", track.kind, track.label);
        }
    }

    println!("🔄 Switching to the front camera...");
    let outcome = sender.controls().switch_facing().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("   {:?}", outcome);
    if let Some(stream) = consumer.remote_stream() {
        for track in &stream.tracks {
            println!("     {} track: {}", track.kind, track.label);
        }
    }

    println!("🛑 Shutting down...");
    let steps = viewer.shutdown().await?;
    info!("Viewer teardown: {:?}", steps);
    let steps = sender.shutdown().await?;
    info!("Sender teardown: {:?}", steps);

    println!("📋 Sender events:");
    for event in sender_events.drain() {
        match event {
            Event::StateChanged { from, to } => println!("   {} → {}", from, to),
            Event::Error { report } => println!("   ⚠️ {}: {}", report.code, report.message),
            other => println!("   {}", other.event_type()),
        }
    }

    println!("✅ Done ({})", sender.status_indicator());
    Ok(())
}
