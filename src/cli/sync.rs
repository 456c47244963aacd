use super::ui;
use crate::app;
use crate::core::config::AppConfig;
use crate::core::rate::RateChange;
use anyhow::Result;
use comfy_table::{Cell, Table};

pub async fn run(config: &AppConfig) -> Result<()> {
    let pb = ui::new_spinner(&format!(
        "Fetching {} rates",
        config.source.base_currency
    ));
    let result = app::sync_once(config).await;
    pb.finish_and_clear();
    let changes = result?;

    println!(
        "\n{}",
        ui::style_text("Currency Sync", ui::StyleType::Title)
    );
    if changes.is_empty() {
        println!(
            "{}",
            ui::style_text("All rates are up to date.", ui::StyleType::Subtle)
        );
        return Ok(());
    }

    println!("{}", changes_table(&changes));
    println!(
        "{} {}",
        ui::style_text("Records changed:", ui::StyleType::TotalLabel),
        changes.len()
    );
    Ok(())
}

fn change_percent(change: &RateChange) -> Option<f64> {
    match (&change.before, &change.after) {
        (Some(before), Some(after)) if before.rate != 0.0 => {
            Some((after.rate - before.rate) / before.rate * 100.0)
        }
        _ => None,
    }
}

pub fn changes_table(changes: &[RateChange]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Action"),
        ui::header_cell("Pair"),
        ui::header_cell("Before"),
        ui::header_cell("After"),
        ui::header_cell("Change"),
    ]);

    for change in changes {
        let pair = change
            .pair()
            .map(|p| p.to_string())
            .unwrap_or_default();
        table.add_row(vec![
            ui::action_cell(change.action),
            Cell::new(pair),
            ui::format_optional_cell(change.before.as_ref(), |r| format!("{:.6}", r.rate)),
            ui::format_optional_cell(change.after.as_ref(), |r| format!("{:.6}", r.rate)),
            match change_percent(change) {
                Some(pct) => ui::change_cell(pct),
                None => ui::na_cell(false),
            },
        ]);
    }
    table
}
