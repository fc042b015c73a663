use clap::{Parser, Subcommand, ValueEnum};
use ledgerdb::{
    IndexCache, ListParams, ModelData, Outcome, SortOrder, Store, StoreConfig, ViewParams,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// LedgerDB CLI: inspect and edit a LedgerDB data directory from the command line
#[derive(Parser)]
#[command(name = "ledgerdb", version, about)]
struct Cli {
    /// Path to the data directory (default: $LEDGERDB_DATA_DIR, then ./data)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Schema file (default: $LEDGERDB_SCHEMA, then schema.json or schema.yaml in the data directory)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Command {
    /// List records of a model class
    List {
        /// Model class
        model: String,
        /// Field filters; values are parsed as JSON when possible (e.g. --filter tags='["1"]')
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Sort field
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// Foreign-key fields to hydrate
        #[arg(long = "include")]
        include: Vec<String>,
        /// Require every filter to match instead of any
        #[arg(long)]
        match_all: bool,
    },

    /// Show a single record
    View {
        model: String,
        id: String,
        #[arg(long = "include")]
        include: Vec<String>,
    },

    /// Create a record
    Create {
        model: String,
        /// Field values (e.g. --field name="Acme Ltd")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update fields of an existing record
    Update {
        model: String,
        id: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Remove a record nothing references
    Remove {
        model: String,
        id: String,
        /// Show the record that would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Dump a model class's raw records
    Export { model: String },

    /// Replace a model class's records from a JSON file (id -> record), bypassing validation
    Import {
        model: String,
        /// Input file; reads stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Dump the index cache
    ExportIndexes,

    /// Replace the index cache from a JSON file
    ImportIndexes {
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Recompute every index from the stored records
    RebuildIndexes,

    /// Show record counts per model class
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("ERROR:{e}");
            process::exit(1);
        }
    }
}

/// Returns whether the command succeeded; the store is dropped (and its
/// writes drained) before the caller exits.
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = store_config(&cli, StoreConfig::from_env());
    log::debug!("Opening store at {}", config.data_dir().display());
    let mut store = Store::open(config)?;
    let format = &cli.format;

    match cli.command {
        Command::List {
            model,
            filters,
            sort,
            desc,
            offset,
            limit,
            include,
            match_all,
        } => {
            let mut params = ListParams::default();
            for (field, value) in &filters {
                params = params.filter(field, parse_value(value));
            }
            if let Some(field) = &sort {
                let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
                params = params.sort_by(field, order);
            }
            if let (Some(offset), Some(limit)) = (offset, limit) {
                params = params.page(offset, limit);
            }
            for field in &include {
                params = params.include(field);
            }
            if match_all {
                params = params.match_all();
            }
            print_output(&store.list(&model, &params)?, format)?;
        }

        Command::View { model, id, include } => {
            let result = store.view(&model, &id, &ViewParams { include })?;
            print_output(&result, format)?;
        }

        Command::Create { model, fields } => {
            let outcome = Outcome::from_mutation(&store.create(&model, fields_to_record(&fields)));
            print_output(&outcome, format)?;
            return Ok(outcome.success);
        }

        Command::Update { model, id, fields } => {
            let outcome =
                Outcome::from_mutation(&store.update(&model, &id, fields_to_record(&fields)));
            print_output(&outcome, format)?;
            return Ok(outcome.success);
        }

        Command::Remove { model, id, dry_run } => {
            if dry_run {
                let record = store.view(&model, &id, &ViewParams::default())?.record;
                print_output(
                    &serde_json::json!({
                        "dry_run": true,
                        "would_remove": { "model": model, "id": id },
                        "record": record,
                    }),
                    format,
                )?;
            } else {
                let outcome = Outcome::from_mutation(&store.remove(&model, &id));
                print_output(&outcome, format)?;
                return Ok(outcome.success);
            }
        }

        Command::Export { model } => {
            print_output(&store.download(&model)?, format)?;
        }

        Command::Import { model, file } => {
            let records: ModelData = serde_json::from_str(&read_input(file)?)?;
            let count = records.len();
            store.upload(&model, records)?;
            print_output(
                &serde_json::json!({ "ok": true, "model": model, "imported": count }),
                format,
            )?;
        }

        Command::ExportIndexes => {
            print_output(&store.download_indexes(), format)?;
        }

        Command::ImportIndexes { file } => {
            let indexes: IndexCache = serde_json::from_str(&read_input(file)?)?;
            store.upload_indexes(indexes);
            print_output(&serde_json::json!({ "ok": true }), format)?;
        }

        Command::RebuildIndexes => {
            store.rebuild_indexes()?;
            print_output(&serde_json::json!({ "ok": true, "rebuilt": true }), format)?;
        }

        Command::Status => {
            print_output(&store.status(), format)?;
        }
    }

    Ok(true)
}

/// Flags override whatever the environment configured.
fn store_config(cli: &Cli, mut config: StoreConfig) -> StoreConfig {
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(schema) = &cli.schema {
        config = config.with_schema_path(schema);
    }
    config
}

fn print_output<T: Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Numbers, booleans, arrays and objects are taken as JSON; anything else is a string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn fields_to_record(fields: &[(String, String)]) -> ledgerdb::Record {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), parse_value(value)))
        .collect()
}

fn read_input(file: Option<PathBuf>) -> Result<String, Box<dyn std::error::Error>> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()).into()),
        None => {
            use std::io::Read;
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            Ok(content)
        }
    }
}
