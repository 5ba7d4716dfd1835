use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::Parser;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, subscriber};
use tracing_log::LogTracer;
use tracing_subscriber::filter::EnvFilter;

use userdb::{
    backend::{DmlOutcome, ExecutionMode},
    config::{context::build_service, schema::load_config},
    context::RequestContext,
    data_types::{BackendDatabaseId, DatabaseId, TableId},
    error::{Error, Result},
    schema::{Row, TableSpec},
    service::{AlterRequest, DatabaseService, RowOperation},
};

const DEFAULT_CONFIG_PATH: &str = "userdb.toml";

#[derive(Debug, Parser)]
#[clap(about, version, name = "userdb")]
struct Args {
    #[clap(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[clap(long, global = true, help = "Enable JSON logging")]
    json_logs: bool,

    #[clap(long, global = true, default_value = "anonymous", help = "Principal issuing the request")]
    uid: String,

    #[clap(long, global = true, help = "Tenant space (omit for personal databases)")]
    space_id: Option<i64>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Create a database
    CreateDatabase {
        name: String,
        #[clap(long)]
        description: Option<String>,
    },
    /// Change the description of a database
    UpdateDatabase {
        id: DatabaseId,
        description: String,
    },
    DeleteDatabase {
        id: DatabaseId,
    },
    /// Copy a database with all its tables and data
    CopyDatabase {
        id: DatabaseId,
    },
    ListDatabases {
        #[clap(long)]
        search: Option<String>,
        #[clap(long, default_value = "1")]
        page_num: u64,
        #[clap(long, default_value = "10")]
        page_size: u64,
    },
    GetDatabase {
        id: DatabaseId,
    },
    /// Show a database with its tables and their fields
    DatabaseTree {
        id: DatabaseId,
    },
    /// Create a table from a JSON table specification
    CreateTable {
        database_id: DatabaseId,
        spec: PathBuf,
    },
    /// Read field definitions (name, type, required, default, description)
    /// from a CSV file and print them as the fields of a table specification
    ImportFields {
        file: PathBuf,
    },
    /// Alter a table from a JSON file with the new name, description and field changes
    AlterTable {
        table_id: TableId,
        request: PathBuf,
    },
    DropTable {
        table_id: TableId,
    },
    CopyTable {
        table_id: TableId,
    },
    ListTables {
        database_id: DatabaseId,
    },
    ListFields {
        table_id: TableId,
        #[clap(long, default_value = "1")]
        page_num: u64,
        #[clap(long, default_value = "20")]
        page_size: u64,
    },
    /// Insert, update or delete a single row read from a JSON file
    Row {
        table_id: TableId,
        operation: RowOperation,
        row: PathBuf,
        #[clap(long, default_value = "test")]
        mode: ExecutionMode,
    },
    SelectRows {
        table_id: TableId,
        #[clap(long, default_value = "1")]
        page_num: u64,
        #[clap(long, default_value = "10")]
        page_size: u64,
        #[clap(long, default_value = "test")]
        mode: ExecutionMode,
    },
    /// Import the rows of a CSV file
    Import {
        table_id: TableId,
        file: PathBuf,
        #[clap(long, default_value = "test")]
        mode: ExecutionMode,
    },
    /// Export rows as CSV, either the given ids or the first rows of the table
    Export {
        table_id: TableId,
        #[clap(long, use_value_delimiter = true)]
        ids: Vec<String>,
        #[clap(long, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,
        #[clap(long, default_value = "test")]
        mode: ExecutionMode,
    },
    /// Write a header-only CSV to fill in and import
    Template {
        table_id: TableId,
        #[clap(long, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Record that a flow uses a table
    AddFlowReference {
        db_id: BackendDatabaseId,
        table_name: String,
        flow_id: String,
    },
}

fn prepare_tracing(json_logs: bool) {
    // Redirect all `log`'s events to our subscriber, to collect the ones from `sqlx`
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to set up the log bridge: {e}");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr);

    let result = if json_logs {
        subscriber::set_global_default(builder.json().finish())
    } else {
        subscriber::set_global_default(builder.finish())
    };
    if let Err(e) = result {
        eprintln!("Failed to set up tracing: {e}");
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::invalid(format!("invalid JSON in {}: {e}", path.display())))
}

fn output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    })
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("can't serialize the result: {e}")))?;
    println!("{text}");
    Ok(())
}

fn print_outcome(outcome: DmlOutcome) -> Result<()> {
    match outcome {
        DmlOutcome::Rows(rows) => print(&rows),
        DmlOutcome::Count(count) => print(&json!({ "affected": count })),
    }
}

async fn run(service: &DatabaseService, context: &RequestContext, command: Command) -> Result<()> {
    match command {
        Command::CreateDatabase { name, description } => print(
            &service
                .create_database(context, &name, description.as_deref())
                .await?,
        ),
        Command::UpdateDatabase { id, description } => {
            print(&service.update_database(context, id, &description).await?)
        }
        Command::DeleteDatabase { id } => {
            service.delete_database(context, id).await?;
            print(&json!({ "deleted": id }))
        }
        Command::CopyDatabase { id } => print(&service.copy_database(context, id).await?),
        Command::ListDatabases {
            search,
            page_num,
            page_size,
        } => print(
            &service
                .list_databases(context, search.as_deref(), page_num, page_size)
                .await?,
        ),
        Command::GetDatabase { id } => print(&service.get_database(context, id).await?),
        Command::DatabaseTree { id } => print(&service.database_tree(context, id).await?),
        Command::CreateTable { database_id, spec } => {
            let spec: TableSpec = read_json(&spec)?;
            print(&service.create_table(context, database_id, spec).await?)
        }
        Command::ImportFields { file } => {
            let input = BufReader::new(File::open(&file)?);
            print(&service.import_field_specs(input)?)
        }
        Command::AlterTable { table_id, request } => {
            let request: AlterRequest = read_json(&request)?;
            print(&service.alter_table(context, table_id, request).await?)
        }
        Command::DropTable { table_id } => {
            service.drop_table(context, table_id).await?;
            print(&json!({ "dropped": table_id }))
        }
        Command::CopyTable { table_id } => print(&service.copy_table(context, table_id).await?),
        Command::ListTables { database_id } => {
            print(&service.list_tables(context, database_id).await?)
        }
        Command::ListFields {
            table_id,
            page_num,
            page_size,
        } => print(
            &service
                .list_fields(context, table_id, page_num, page_size)
                .await?,
        ),
        Command::Row {
            table_id,
            operation,
            row,
            mode,
        } => {
            let row: Row = read_json(&row)?;
            print_outcome(
                service
                    .operate_row(context, table_id, operation, &row, mode)
                    .await?,
            )
        }
        Command::SelectRows {
            table_id,
            page_num,
            page_size,
            mode,
        } => print(
            &service
                .select_rows(context, table_id, page_num, page_size, mode)
                .await?,
        ),
        Command::Import {
            table_id,
            file,
            mode,
        } => {
            let input = BufReader::new(File::open(&file)?);
            print(&service.import_rows(context, table_id, input, mode).await?)
        }
        Command::Export {
            table_id,
            ids,
            output: path,
            mode,
        } => {
            let ids: Vec<Value> = ids.into_iter().map(Value::String).collect();
            let count = service
                .export_rows(
                    context,
                    table_id,
                    Some(ids.as_slice()),
                    output(path.as_deref())?,
                    mode,
                )
                .await?;
            info!("Exported {count} row(s)");
            Ok(())
        }
        Command::Template {
            table_id,
            output: path,
        } => {
            service
                .write_template(context, table_id, output(path.as_deref())?)
                .await
        }
        Command::AddFlowReference {
            db_id,
            table_name,
            flow_id,
        } => {
            let id = service
                .add_flow_reference(context, db_id, &table_name, &flow_id)
                .await?;
            print(&json!({ "id": id }))
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    prepare_tracing(args.json_logs);

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading the config from {}: {e}", args.config.display());
            exit(2);
        }
    };

    let service = match build_service(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Error setting up the service: {e}");
            exit(2);
        }
    };

    let context = RequestContext::new(args.uid, args.space_id);
    if let Err(e) = run(&service, &context, args.command).await {
        let mut report = json!({ "error": e.kind().to_string(), "message": e.to_string() });
        if let Error::PartialImportFailure(summary) = &e {
            report["summary"] = json!(summary);
        }
        eprintln!("{report}");
        exit(1);
    }
}
