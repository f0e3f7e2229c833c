use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;
use pagedb::{
    ColumnScheme, ConditionGroup, Database, DatabaseError, EngineConfig, PageRow, RecordError,
    ScanError, ScanQuery, TableScheme,
};
use prettytable::{Cell, Row, Table};
use thiserror::Error;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Inspect and edit a paged record database", long_about = None)]
struct Args {
    #[clap(short, long, help = "JSON engine configuration file")]
    config: Option<PathBuf>,
    #[clap(long, help = "Root directory holding the databases")]
    data_dir: Option<PathBuf>,
    #[clap(short, long, help = "Database name under the data directory")]
    database: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tables
    Tables,
    /// Create a table from `.def` style column lines, e.g. "id INTEGER PK AI"
    Create {
        table: String,
        #[clap(required = true)]
        columns: Vec<String>,
    },
    /// Read rows in page order
    Scan {
        table: String,
        #[clap(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        #[clap(long)]
        limit: Option<u32>,
        #[clap(long = "where", value_name = "CONDITION")]
        condition: Option<String>,
    },
    /// Insert one row; the literal NULL stores a null
    Insert {
        table: String,
        #[clap(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,
        #[clap(long, value_delimiter = ',', required = true)]
        values: Vec<String>,
    },
    /// Bulk insert a CSV file whose header row names the columns
    Load { table: String, csv: PathBuf },
    /// Set columns on matching rows, every row without --where; NULL stores a null
    Update {
        table: String,
        #[clap(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,
        #[clap(long, value_delimiter = ',', required = true)]
        values: Vec<String>,
        #[clap(long = "where", value_name = "CONDITION")]
        condition: Option<String>,
    },
    /// Free matching rows, every row without --where
    Delete {
        table: String,
        #[clap(long = "where", value_name = "CONDITION")]
        condition: Option<String>,
    },
    /// Dump the page headers of a table
    Pages { table: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0} ({kind:?})", kind = .0.kind())]
    Database(#[from] DatabaseError),

    #[error("Invalid column definition: {0}")]
    Definition(#[from] RecordError),

    #[error("Invalid condition: {0}")]
    Condition(#[from] ScanError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(#[from] pagedb::ConfigError),
}

type CliResult<T> = Result<T, CliError>;

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(database) = args.database {
        config.database = database;
    }

    let db = Database::open(config)?;

    match args.command {
        Command::Tables => {
            let mut table = Table::new();
            table.set_titles(Row::new(vec![Cell::new("table"), Cell::new("columns")]));
            for name in db.tables() {
                let scheme = db.scheme(&name)?;
                let columns: Vec<String> = scheme.columns().iter().map(|c| c.to_string()).collect();
                table.add_row(Row::new(vec![Cell::new(&name), Cell::new(&columns.join(", "))]));
            }
            table.printstd();
        }
        Command::Create { table, columns } => {
            let columns = columns
                .iter()
                .map(|line| ColumnScheme::from_definition(line))
                .collect::<Result<Vec<_>, _>>()?;
            db.create_table(TableScheme::new(&table, columns))?;
            println!("Created table {}", table);
        }
        Command::Scan {
            table,
            columns,
            limit,
            condition,
        } => {
            let titles = match &columns {
                Some(columns) => columns.clone(),
                None => db
                    .scheme(&table)?
                    .columns()
                    .iter()
                    .map(|c| c.name.clone())
                    .collect(),
            };

            let mut query = ScanQuery::new(&table);
            if let Some(columns) = columns {
                query = query.columns(columns);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if let Some(condition) = condition {
                query = query.filter(condition.parse::<ConditionGroup>()?);
            }

            let rows = db.scan(&query)?;
            print_rows(&titles, &rows);
            println!("{} rows", rows.len());
        }
        Command::Insert {
            table,
            columns,
            values,
        } => {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let values = null_literals(&values);
            let outcome = db.insert(&table, &columns, &values)?;
            println!(
                "Inserted row {} into page {} ({:?})",
                outcome.row_id, outcome.page, outcome.option
            );
        }
        Command::Load { table, csv } => {
            let count = load_csv(&db, &table, &csv)?;
            println!("Loaded {} rows into {}", count, table);
        }
        Command::Update {
            table,
            columns,
            values,
            condition,
        } => {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let values = null_literals(&values);
            let condition = condition.map(|c| c.parse::<ConditionGroup>()).transpose()?;
            let updated = db.update(&table, &columns, &values, condition.as_ref())?;
            println!("Updated {} rows", updated);
        }
        Command::Delete { table, condition } => {
            let condition = condition.map(|c| c.parse::<ConditionGroup>()).transpose()?;
            let deleted = db.delete(&table, condition.as_ref())?;
            println!("Deleted {} rows", deleted);
        }
        Command::Pages { table } => {
            let mut out = Table::new();
            out.set_titles(Row::new(
                ["file", "page id", "rows", "free rows", "bytes"]
                    .iter()
                    .map(|t| Cell::new(t))
                    .collect(),
            ));
            for (page, header) in db.page_headers(&table)? {
                let free: Vec<String> = header.free_rows.iter().map(|id| id.to_string()).collect();
                let size = page.size().map_err(DatabaseError::from)?;
                out.add_row(Row::new(vec![
                    Cell::new(&page.path().display().to_string()),
                    Cell::new(&header.page_id.to_string()),
                    Cell::new(&header.rows_count.to_string()),
                    Cell::new(&free.join(",")),
                    Cell::new(&size.to_string()),
                ]));
            }
            out.printstd();
        }
    }

    Ok(())
}

/// The literal NULL, in any case, is a null value
fn null_literals(values: &[String]) -> Vec<Option<&str>> {
    values
        .iter()
        .map(|v| if v.eq_ignore_ascii_case("NULL") { None } else { Some(v.as_str()) })
        .collect()
}

fn print_rows(titles: &[String], rows: &[PageRow]) {
    let mut table = Table::new();
    table.set_titles(Row::new(titles.iter().map(|t| Cell::new(t)).collect()));
    for row in rows {
        table.add_row(Row::new(
            row.values
                .iter()
                .map(|v| match v {
                    Some(v) => Cell::new(&v.to_string()),
                    None => Cell::new("NULL"),
                })
                .collect(),
        ));
    }
    table.printstd();
}

/// Insert every CSV record; an empty field is NULL
fn load_csv(db: &Database, table: &str, path: &Path) -> CliResult<usize> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let columns: Vec<&str> = headers.iter().collect();

    let mut count = 0;
    for record in reader.records() {
        let record = record?;
        let values: Vec<Option<&str>> = record
            .iter()
            .map(|field| if field.is_empty() { None } else { Some(field) })
            .collect();
        db.insert(table, &columns, &values)?;
        count += 1;
    }

    info!("Loaded {} rows from {}", count, path.display());
    Ok(count)
}
