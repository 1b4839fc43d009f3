//! `kiln status`: report which outputs need rebuilding.

use std::path::PathBuf;

use kiln_ledger::{QueryMode, QueryReport, QueryRequest};
use serde::Serialize;

use crate::session::{extra_hash, Session};
use crate::{GlobalArgs, OutputFormat, StatusArgs};

#[derive(Debug, Serialize)]
struct StatusLine {
    item: PathBuf,
    #[serde(flatten)]
    report: QueryReport,
}

/// Runs the `kiln status` command.
///
/// Returns exit code 0 if every output is up to date, 1 otherwise. The
/// ledger is only read.
pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let session = Session::open(global)?;
    let entries = session.load_entries(&args.depfiles)?;
    let extra = extra_hash(args.extra.as_deref());
    let extra = extra.as_ref().map(|h| h.as_bytes().as_slice());

    let requests: Vec<QueryRequest<'_>> = entries
        .iter()
        .map(|e| QueryRequest {
            item: &e.item,
            extra,
        })
        .collect();
    let verdicts = session.tracker.query_many(&requests);

    let mode = if args.all {
        QueryMode::VerifyAll
    } else {
        QueryMode::StopAtFirst
    };
    let lines: Vec<StatusLine> = entries
        .iter()
        .zip(verdicts)
        .map(|(entry, up_to_date)| StatusLine {
            item: entry.item.clone(),
            report: if up_to_date {
                QueryReport {
                    up_to_date,
                    stale: Vec::new(),
                }
            } else {
                session.tracker.query_report(&entry.item, extra, mode)
            },
        })
        .collect();

    let stale = lines.iter().filter(|l| !l.report.up_to_date).count();
    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
        OutputFormat::Text => {
            if !global.quiet {
                for line in &lines {
                    print_line(line);
                }
                eprintln!("{} of {} outputs need rebuilding", stale, lines.len());
            }
        }
    }
    Ok(i32::from(stale > 0))
}

fn print_line(line: &StatusLine) {
    if line.report.up_to_date {
        println!("  fresh  {}", line.item.display());
        return;
    }
    println!("  stale  {}", line.item.display());
    for cause in line.report.stale.iter().filter(|c| **c != line.item) {
        println!("         changed: {}", cause.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_json_is_flat() {
        let line = StatusLine {
            item: PathBuf::from("/obj/a.o"),
            report: QueryReport {
                up_to_date: false,
                stale: vec![PathBuf::from("/src/a.h")],
            },
        };
        let json: serde_json::Value = serde_json::to_value(&line).unwrap();
        assert_eq!(json["item"], "/obj/a.o");
        assert_eq!(json["up_to_date"], false);
        assert_eq!(json["stale"][0], "/src/a.h");
    }
}
