// System status display — DB size, event log size, consumer lag.

use anyhow::Result;

use crate::bus::EventBus;
use crate::events::EventLog;

/// Display system status to the terminal.
pub async fn show(
    log: &dyn EventLog,
    bus: &dyn EventBus,
    group: &str,
    db_display_path: &str,
) -> Result<()> {
    let file_size = std::fs::metadata(db_display_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_display_path, file_size);

    println!("Logged events: {}", log.count().await?);

    let mut total_lag = 0;
    println!("Consumer group '{}':", group);
    for partition in 0..bus.partitions() {
        let lag = bus.lag(group, partition).await?;
        total_lag += lag;
        println!("  partition {}: {} pending", partition, lag);
    }
    if total_lag > 0 {
        println!("  Run `fanout consume` to deliver pending events");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
