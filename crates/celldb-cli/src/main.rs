mod script;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use celldb_core::{Config, Engine, OutputRow, Result};

#[derive(Parser, Debug)]
#[command(name = "celldb")]
#[command(about = "celldb script runner")]
struct Cli {
    /// Log at debug level regardless of RUST_LOG.
    #[arg(long, global = true)]
    verbose: bool,

    /// Base directory for relative artifact URLs.
    #[arg(long, global = true)]
    artifact_root: Option<PathBuf>,

    #[arg(long, global = true)]
    max_query_rows: Option<usize>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a JSON script, printing each step's result.
    Run { script: PathBuf },
    /// Execute a script silently, then run one SELECT against its state.
    Sql { script: PathBuf, query: String },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error ({:?}): {e}", e.kind());
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = Config::default();
    if let Some(root) = cli.artifact_root {
        cfg.artifact_root = Some(root);
    }
    if let Some(v) = cli.max_query_rows {
        cfg.max_query_rows = v;
    }
    let engine = Engine::new(cfg)?;

    match cli.cmd {
        Command::Run { script } => {
            let steps = script::parse_script(&std::fs::read_to_string(&script)?)?;
            for (i, step) in steps.into_iter().enumerate() {
                let started = Instant::now();
                let result = script::apply_step(&engine, step)?;
                tracing::debug!("step {i} took {:.3}ms", started.elapsed().as_secs_f64() * 1e3);
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Command::Sql { script, query } => {
            let steps = script::parse_script(&std::fs::read_to_string(&script)?)?;
            for step in steps {
                script::apply_step(&engine, step)?;
            }
            let started = Instant::now();
            let rows = engine.sql(&query)?;
            print_rows(&rows);
            eprintln!("({:.3} ms)", started.elapsed().as_secs_f64() * 1e3);
        }
    }
    Ok(())
}

fn print_rows(rows: &[OutputRow]) {
    if rows.is_empty() {
        println!("(0 rows)");
        return;
    }
    let columns = celldb_core::sql::format::column_header(rows);
    let mut headers = vec![celldb_core::sql::format::ROW_NAME_HEADER.to_string()];
    headers.extend(columns.iter().cloned());
    let data: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.row_name.clone()];
            cells.extend(columns.iter().map(|c| match row.columns.get(c) {
                Some(v) => v.to_string(),
                None => String::new(),
            }));
            cells
        })
        .collect();
    print_ascii_table(&headers, &data);
}

fn print_ascii_table(headers: &[String], rows: &[Vec<String>]) {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(display_width(cell));
            }
        }
    }

    let rule = table_rule(&widths);
    println!("{rule}");
    print_table_row(headers, &widths);
    println!("{rule}");
    for row in rows {
        print_table_row(row, &widths);
    }
    println!("{rule}");
    println!("({} rows)", rows.len());
}

fn table_rule(widths: &[usize]) -> String {
    let mut out = String::from("+");
    for width in widths {
        out.push_str(&"-".repeat(*width + 2));
        out.push('+');
    }
    out
}

fn print_table_row(cells: &[String], widths: &[usize]) {
    let mut line = String::from("|");
    for (i, width) in widths.iter().enumerate() {
        let raw = cells.get(i).cloned().unwrap_or_default();
        let cell = raw.replace('\n', "\\n");
        let cell_width = display_width(&cell);
        line.push(' ');
        line.push_str(&cell);
        if *width > cell_width {
            line.push_str(&" ".repeat(*width - cell_width));
        }
        line.push(' ');
        line.push('|');
    }
    println!("{line}");
}

fn display_width(s: &str) -> usize {
    s.chars().count()
}
