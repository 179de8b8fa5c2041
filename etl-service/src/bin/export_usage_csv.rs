use std::{env, fs};

use anyhow::{bail, Context, Result};
use etl_service::{config::AppConfig, observability, sources, transform};

/// Parse a local usage feed and write the projected rows to CSV, without
/// touching the warehouse. Useful for eyeballing a bulk download.
fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: export_usage_csv <feed_xml_path> <output_csv_path>");
    }

    let cfg = AppConfig::load()?;
    let xml = fs::read_to_string(&args[1]).with_context(|| format!("reading {}", args[1]))?;
    let raw = sources::parse_usage_feed(&xml)?;
    let rows = transform::project_usage(raw, cfg.usage.tz())?;

    let mut writer = csv::Writer::from_path(&args[2])?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::info!(rows = rows.len(), output = %args[2], "wrote usage CSV");
    Ok(())
}
