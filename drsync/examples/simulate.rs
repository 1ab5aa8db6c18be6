//! In-memory simulation of a primary/DR session

use std::error::Error;

use chrono::{Duration, Utc};
use drsync::{
    Application, DiffOptions, InMemoryMirror, Node, StatusLog, SyncSession,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    println!("DR Sync Simulation");
    println!("==================");

    let now = Utc::now();
    let earlier = now - Duration::hours(6);

    let mirror = InMemoryMirror::new(
        "/srv/primary",
        vec![
            Node::file("/srv/primary", "report.xlsx", 20_480u64, now),
            Node::directory(
                "/srv/primary",
                "config",
                earlier,
                vec![Node::file("/srv/primary", "config/app.toml", 512u64, now)],
            ),
        ],
        "/srv/dr",
        vec![
            Node::file("/srv/dr", "report.xlsx", 20_480u64, earlier),
            Node::directory("/srv/dr", "config", earlier, vec![]),
            Node::file("/srv/dr", "scratch.tmp", 64u64, earlier),
        ],
    );

    let (log, mut channel) = StatusLog::with_channel();
    let mut session = SyncSession::new(
        Application::new("finance", "/srv/primary", "/srv/dr"),
        mirror.clone(),
        mirror.clone(),
        DiffOptions::default(),
    )
    .with_log(log);

    let comparison = session.load().await?;
    println!();
    println!("Differences:");
    for difference in &comparison.differences {
        println!("  {:<16} {:<13} {}", difference.path, difference.status.to_string(), difference.summary);
    }

    let report = session
        .sync_all(|counts| {
            println!();
            println!("About to sync: {}", counts);
            true
        })
        .await?;

    if let Some(report) = report {
        println!("{} succeeded, {} failed", report.succeeded, report.failed);
    }

    println!();
    println!("Log:");
    while let Some(entry) = channel.try_recv() {
        println!("  [{}] {}", entry.severity, entry.message);
    }

    Ok(())
}
