use super::ui;
use crate::core::config::AppConfig;
use crate::core::store::TaskLogEntry;
use crate::store::open_disk_store;
use anyhow::Result;
use comfy_table::{Cell, Table};

pub async fn run(config: &AppConfig, limit: usize) -> Result<()> {
    let store = open_disk_store(config)?;
    let logs = store.task_logs(limit).await?;

    println!("\n{}", ui::style_text("Task Log", ui::StyleType::Title));
    if logs.is_empty() {
        println!(
            "{}",
            ui::style_text("No task runs recorded.", ui::StyleType::Subtle)
        );
        return Ok(());
    }
    println!("{}", logs_table(&logs));
    Ok(())
}

pub fn logs_table(logs: &[TaskLogEntry]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Time"),
        ui::header_cell("Task"),
        ui::header_cell("Status"),
        ui::header_cell("Details"),
    ]);
    for entry in logs {
        table.add_row(vec![
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&entry.task_name),
            ui::status_cell(entry.status),
            Cell::new(&entry.details),
        ]);
    }
    table
}
