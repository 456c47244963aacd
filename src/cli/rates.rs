use super::ui;
use crate::core::config::AppConfig;
use crate::core::rate::RateRecord;
use crate::store::open_disk_store;
use anyhow::Result;
use comfy_table::{Cell, Table};

/// Prints stored rates, optionally only those quoted against `base`.
pub async fn run(config: &AppConfig, base: Option<&str>) -> Result<()> {
    let store = open_disk_store(config)?;
    let mut rates = store.list_all().await?;
    if let Some(base) = base {
        let base = base.to_uppercase();
        rates.retain(|r| r.base_currency == base);
    }

    println!(
        "\n{}",
        ui::style_text("Stored Rates", ui::StyleType::Title)
    );
    if rates.is_empty() {
        println!(
            "{}",
            ui::style_text("No rates stored yet.", ui::StyleType::Subtle)
        );
        return Ok(());
    }
    println!("{}", rates_table(rates));
    Ok(())
}

pub fn rates_table(mut rates: Vec<RateRecord>) -> Table {
    rates.sort_by(|a, b| {
        (&a.base_currency, &a.target_currency).cmp(&(&b.base_currency, &b.target_currency))
    });

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Base"),
        ui::header_cell("Target"),
        ui::header_cell("Rate"),
        ui::header_cell("Last Updated"),
    ]);
    for record in &rates {
        table.add_row(vec![
            Cell::new(&record.base_currency),
            Cell::new(&record.target_currency),
            ui::rate_cell(record.rate),
            Cell::new(record.last_updated.format("%Y-%m-%d %H:%M:%S UTC")),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate::RatePair;
    use chrono::Utc;

    #[test]
    fn test_rates_table_is_sorted() {
        let now = Utc::now();
        let table = rates_table(vec![
            RateRecord::new(&RatePair::new("USD", "RUB"), 92.5, now),
            RateRecord::new(&RatePair::new("USD", "EUR"), 0.92, now),
        ]);
        let rendered = table.to_string();
        let eur = rendered.find("EUR").unwrap();
        let rub = rendered.find("RUB").unwrap();
        assert!(eur < rub);
        assert!(rendered.contains("92.500000"));
    }
}
