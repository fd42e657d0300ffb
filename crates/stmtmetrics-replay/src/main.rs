//! stmtmetrics-replay — replays recorded statement polls through a sampler.
//!
//! Input is JSON lines, one poll per line, either a bare array of rows or
//! `{"collected_at": <unix secs>, "rows": [...]}`. Each poll runs one
//! collection cycle and the reported rows are printed.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

use stmtmetrics_core::{DiffStats, Row, SampleError, SamplerConfig, StatementSampler, top_rows_by};

#[derive(Parser)]
#[command(
    name = "stmtmetrics-replay",
    about = "Replay recorded statement polls through the sampler",
    version
)]
struct Cli {
    /// JSON-lines file with one poll per line.
    polls: PathBuf,

    /// Sampler configuration (JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Cap reported rows per cycle, ordered by --sort-by.
    #[arg(long, value_name = "N")]
    max_rows: Option<usize>,

    /// Metric used for --max-rows. Defaults to the limiter's primary metric.
    #[arg(long, value_name = "METRIC")]
    sort_by: Option<String>,

    /// Output as JSON lines.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug)]
enum ReplayError {
    Io(io::Error),
    Json { line: usize, source: serde_json::Error },
    Sample { cycle: usize, source: SampleError },
    Encode(serde_json::Error),
    Usage(String),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Io(e) => write!(f, "I/O error: {}", e),
            ReplayError::Json { line, source } => write!(f, "line {}: {}", line, source),
            ReplayError::Sample { cycle, source } => write!(f, "cycle {}: {}", cycle, source),
            ReplayError::Encode(e) => write!(f, "cannot encode output: {}", e),
            ReplayError::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<io::Error> for ReplayError {
    fn from(e: io::Error) -> Self {
        ReplayError::Io(e)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PollLine {
    Bare(Vec<Row>),
    Stamped {
        collected_at: Option<i64>,
        rows: Vec<Row>,
    },
}

#[derive(Debug)]
struct Poll {
    collected_at: Option<i64>,
    rows: Vec<Row>,
}

#[derive(Debug, Serialize)]
struct CycleOutput {
    cycle: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    collected_at: Option<i64>,
    observed: usize,
    emitted: usize,
    resets: usize,
    dropped: usize,
    rows: Vec<Row>,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["stmtmetrics_replay", "stmtmetrics_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<SamplerConfig, ReplayError> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ReplayError::Usage(format!("{}: {}", path.display(), e)))
}

fn parse_polls<R: BufRead>(reader: R) -> Result<Vec<Poll>, ReplayError> {
    let mut polls = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: PollLine = serde_json::from_str(&line).map_err(|source| ReplayError::Json {
            line: idx + 1,
            source,
        })?;
        polls.push(match parsed {
            PollLine::Bare(rows) => Poll {
                collected_at: None,
                rows,
            },
            PollLine::Stamped { collected_at, rows } => Poll { collected_at, rows },
        });
    }
    Ok(polls)
}

fn replay(
    sampler: &mut StatementSampler,
    polls: &[Poll],
    max_rows: Option<(usize, &str)>,
) -> Result<Vec<CycleOutput>, ReplayError> {
    let mut out = Vec::with_capacity(polls.len());
    for (cycle, poll) in polls.iter().enumerate() {
        let sample_err = |source: SampleError| ReplayError::Sample { cycle, source };
        let mut rows = sampler.sample(&poll.rows).map_err(sample_err)?;
        if let Some((max, metric)) = max_rows {
            rows = top_rows_by(&rows, metric, max).map_err(sample_err)?;
        }
        let DiffStats {
            observed,
            emitted,
            resets,
            dropped,
            ..
        } = sampler.differ().last_stats();
        debug!(cycle, reported = rows.len(), "replayed poll");
        out.push(CycleOutput {
            cycle,
            collected_at: poll.collected_at,
            observed,
            emitted,
            resets,
            dropped,
            rows,
        });
    }
    Ok(out)
}

fn fmt_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn print_text(cycles: &[CycleOutput]) -> Result<(), ReplayError> {
    for c in cycles {
        let when = c.collected_at.map(fmt_ts).unwrap_or_else(|| "-".to_string());
        println!(
            "cycle {:>4}  {}  observed={} emitted={} resets={} dropped={} reported={}",
            c.cycle,
            when,
            c.observed,
            c.emitted,
            c.resets,
            c.dropped,
            c.rows.len()
        );
        for row in &c.rows {
            let line = serde_json::to_string(row).map_err(ReplayError::Encode)?;
            println!("    {}", line);
        }
    }
    Ok(())
}

fn print_json(cycles: &[CycleOutput]) -> Result<(), ReplayError> {
    for c in cycles {
        let line = serde_json::to_string(c).map_err(ReplayError::Encode)?;
        println!("{}", line);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), ReplayError> {
    let config = load_config(&cli.config)?;
    let mut sampler = config
        .build()
        .map_err(|e| ReplayError::Usage(format!("{}: {}", cli.config.display(), e)))?;

    let sort_by = match (&cli.sort_by, sampler.limiter()) {
        (Some(metric), _) => Some(metric.clone()),
        (None, Some(limiter)) => Some(limiter.tie_break().primary_metric.clone()),
        (None, None) => None,
    };
    let max_rows = match (cli.max_rows, sort_by.as_deref()) {
        (Some(max), Some(metric)) => Some((max, metric)),
        (Some(_), None) => {
            return Err(ReplayError::Usage(
                "--max-rows needs --sort-by when no limits are configured".to_string(),
            ));
        }
        (None, _) => None,
    };

    let polls = parse_polls(BufReader::new(File::open(&cli.polls)?))?;
    info!(polls = polls.len(), path = %cli.polls.display(), "replaying");

    let cycles = replay(&mut sampler, &polls, max_rows)?;
    if cli.json {
        print_json(&cycles)
    } else {
        print_text(&cycles)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"{
        "metrics": ["count", "time"],
        "key_fields": ["query", "db", "user"],
        "limits": {
            "primary_metric": "time",
            "quotas": { "count": { "top": 1 }, "time": { "top": 1 } }
        }
    }"#;

    fn poll_line(rows: &[(&str, i64, i64)]) -> String {
        let rows: Vec<String> = rows
            .iter()
            .map(|(q, c, t)| {
                format!(
                    r#"{{"query":"{}","db":"puppies","user":"dog","count":{},"time":{}}}"#,
                    q, c, t
                )
            })
            .collect();
        format!("[{}]", rows.join(","))
    }

    fn sampler() -> StatementSampler {
        serde_json::from_str::<SamplerConfig>(CONFIG)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn parse_polls_accepts_bare_and_stamped_lines() {
        let input = format!(
            "{}\n\n{{\"collected_at\": 1700000000, \"rows\": {}}}\n",
            poll_line(&[("COMMIT", 1, 10)]),
            poll_line(&[("COMMIT", 2, 20)])
        );
        let polls = parse_polls(input.as_bytes()).unwrap();
        assert_eq!(polls.len(), 2);
        assert_eq!(polls[0].collected_at, None);
        assert_eq!(polls[1].collected_at, Some(1_700_000_000));
        assert_eq!(polls[1].rows.len(), 1);
    }

    #[test]
    fn parse_polls_reports_line_number() {
        let input = format!("{}\nnot json\n", poll_line(&[("COMMIT", 1, 10)]));
        match parse_polls(input.as_bytes()) {
            Err(ReplayError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn replay_reports_limited_deltas_per_cycle() {
        let input = [
            poll_line(&[("COMMIT", 13, 2005), ("ROLLBACK", 25, 105), ("SELECT", 1, 5)]),
            poll_line(&[("COMMIT", 14, 2006), ("ROLLBACK", 30, 110), ("SELECT", 2, 500)]),
            poll_line(&[("COMMIT", 1, 1), ("ROLLBACK", 30, 110)]),
        ]
        .join("\n");
        let polls = parse_polls(input.as_bytes()).unwrap();
        let cycles = replay(&mut sampler(), &polls, None).unwrap();

        assert_eq!(cycles.len(), 3);
        assert!(cycles[0].rows.is_empty());
        // count top -> ROLLBACK (+5), time top -> SELECT (+495); ordered by time desc.
        let queries: Vec<&str> = cycles[1]
            .rows
            .iter()
            .map(|r| r.get("query").and_then(|v| v.as_str()).unwrap())
            .collect();
        assert_eq!(queries, vec!["SELECT", "ROLLBACK"]);
        assert_eq!(cycles[2].resets, 1);
        assert_eq!(cycles[2].dropped, 1);
        assert!(cycles[2].rows.is_empty());
    }

    #[test]
    fn replay_caps_rows_with_max_rows() {
        let input = [
            poll_line(&[("A", 1, 1), ("B", 1, 1)]),
            poll_line(&[("A", 5, 2), ("B", 2, 9)]),
        ]
        .join("\n");
        let polls = parse_polls(input.as_bytes()).unwrap();
        let cycles = replay(&mut sampler(), &polls, Some((1, "time"))).unwrap();
        assert_eq!(cycles[1].rows.len(), 1);
        assert_eq!(
            cycles[1].rows[0].get("query").and_then(|v| v.as_str()),
            Some("B")
        );
    }

    #[test]
    fn replay_surfaces_sample_errors_with_cycle() {
        let input = [
            poll_line(&[("A", 1, 1)]),
            r#"[{"query":"A","db":"puppies","user":"dog","count":2}]"#.to_string(),
        ]
        .join("\n");
        let polls = parse_polls(input.as_bytes()).unwrap();
        match replay(&mut sampler(), &polls, None) {
            Err(ReplayError::Sample { cycle, source }) => {
                assert_eq!(cycle, 1);
                assert_eq!(source, SampleError::MissingField("time".to_string()));
            }
            other => panic!("unexpected {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn run_reads_config_and_polls_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sampler.json");
        let polls_path = dir.path().join("polls.jsonl");
        std::fs::write(&config_path, CONFIG).unwrap();
        let mut f = File::create(&polls_path).unwrap();
        writeln!(f, "{}", poll_line(&[("A", 1, 1)])).unwrap();
        writeln!(f, "{}", poll_line(&[("A", 2, 3)])).unwrap();

        let cli = Cli {
            polls: polls_path,
            config: config_path,
            max_rows: Some(10),
            sort_by: None,
            json: true,
            verbose: 0,
            quiet: true,
        };
        run(&cli).unwrap();
    }

    #[test]
    fn max_rows_without_sort_metric_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sampler.json");
        std::fs::write(&config_path, r#"{"metrics": ["count"], "key_fields": ["query"]}"#)
            .unwrap();
        let cli = Cli {
            polls: dir.path().join("missing.jsonl"),
            config: config_path,
            max_rows: Some(1),
            sort_by: None,
            json: false,
            verbose: 0,
            quiet: true,
        };
        assert!(matches!(run(&cli), Err(ReplayError::Usage(_))));
    }

    #[test]
    fn fmt_ts_formats_utc() {
        assert_eq!(fmt_ts(0), "1970-01-01 00:00:00");
    }
}
