//! `kiln stats`: print statistics of the stored ledger.

use kiln_ledger::LedgerStats;

use crate::session::Session;
use crate::{GlobalArgs, OutputFormat};

/// Runs the `kiln stats` command.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let session = Session::open(global)?;
    let stats = session.tracker.previous_stats();
    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => print!("{}", render_text(&stats)),
    }
    Ok(0)
}

fn render_text(stats: &LedgerStats) -> String {
    format!(
        "items             {}\n\
         dependency links  {}\n\
         payload bytes     {}\n\
         shards            {} ({} occupied, longest {})\n",
        stats.items,
        stats.dependency_links,
        stats.payload_bytes,
        stats.shards,
        stats.occupied_shards,
        stats.longest_shard,
    )
}
