//! `status`: geocoding coverage and recent runs.

use rota_sync::config::SyncConfig;

use super::{CommandError, connect};

const RECENT_RUNS: i64 = 5;

#[allow(clippy::print_stdout)]
pub async fn show(config: &SyncConfig) -> Result<(), CommandError> {
    let store = connect(config).await?;
    let stats = store.geocoding_stats().await?;
    let runs = store.recent_syncs(RECENT_RUNS).await?;

    println!("Geocoding coverage");
    println!("  {:<36}{:>10}", "Customers", stats.total);
    println!(
        "  {:<36}{:>10}  ({:.1}%)",
        "Geocoded",
        stats.geocoded,
        stats.geocoded_percent()
    );
    println!("  {:<36}{:>10}", "Pending", stats.pending);
    println!("  {:<36}{:>10}", "Failed", stats.failed);
    println!("  {:<36}{:>10}", "Without coordinates", stats.without_coordinates);
    println!(
        "  {:<36}{:>10}",
        "  with postal code", stats.with_cep_without_coordinates
    );
    println!(
        "  {:<36}{:>10}",
        "  without postal code", stats.without_cep_without_coordinates
    );

    if runs.is_empty() {
        return Ok(());
    }

    println!();
    println!("Recent runs");
    println!(
        "  {:<12}{:<22}{:>9}{:>9}{:>8}  {}",
        "Type", "Started", "Fetched", "Updated", "Errors", "Status"
    );
    for run in runs {
        println!(
            "  {:<12}{:<22}{:>9}{:>9}{:>8}  {}",
            run.sync_type.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.records_fetched,
            run.records_updated,
            run.errors,
            run.error_message.as_deref().unwrap_or(run.status.as_str()),
        );
    }
    Ok(())
}
