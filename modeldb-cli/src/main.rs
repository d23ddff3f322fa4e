use clap::{Parser, Subcommand, ValueEnum};
use modeldb::{
    ConnectionManager, DbConfig, DbResponse, DbServiceFactory, FindOptions, ModelService,
    PaginationOptions, Sort, UpdateOptions,
};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// ModelDB CLI - run model operations against a document store
#[derive(Parser)]
#[command(name = "modeldb", version, about)]
struct Cli {
    /// Connection URI (sqlite::memory: or sqlite://<path>)
    #[arg(long, env = "MODELDB_URI")]
    uri: Option<String>,

    /// YAML file with a `models:` map to register
    #[arg(long, env = "MODELDB_SCHEMA")]
    schema: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List registered models
    Models,

    /// Connect and report the connection status
    Status,

    /// Create a document
    Create {
        model: String,
        /// Field values (e.g. --field username=alice)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Whole document as JSON
        #[arg(long, value_parser = parse_json)]
        json: Option<Value>,
    },

    /// Find documents
    Find {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Option<Value>,
        #[arg(long, value_parser = parse_json)]
        projection: Option<Value>,
        /// Sort document, e.g. '{"createdAt": -1}'
        #[arg(long, value_parser = parse_json)]
        sort: Option<Value>,
        #[arg(long)]
        skip: Option<u64>,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Find the first matching document
    FindOne {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Option<Value>,
        #[arg(long, value_parser = parse_json)]
        projection: Option<Value>,
    },

    /// Get a document by ID
    Get { model: String, id: String },

    /// Fetch one page of documents
    Page {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Option<Value>,
        #[arg(long)]
        page: Option<u64>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long, value_parser = parse_json)]
        sort: Option<Value>,
    },

    /// Update a document by ID
    Update {
        model: String,
        id: String,
        /// Field values to set (e.g. --field role=admin)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Update document as JSON, e.g. '{"$inc": {"logins": 1}}'
        #[arg(long, value_parser = parse_json)]
        json: Option<Value>,
        /// Print the document as it was before the update
        #[arg(long)]
        original: bool,
    },

    /// Update every matching document
    UpdateMany {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Option<Value>,
        #[arg(long, value_parser = parse_json)]
        json: Value,
        /// Insert a document seeded from the filter when nothing matches
        #[arg(long)]
        upsert: bool,
    },

    /// Delete a document by ID
    Delete {
        model: String,
        id: String,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every matching document
    DeleteMany {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Value,
    },

    /// Count matching documents
    Count {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Option<Value>,
    },

    /// Check whether any document matches
    Exists {
        model: String,
        #[arg(long, value_parser = parse_json)]
        filter: Option<Value>,
    },

    /// Run an aggregation pipeline given as a JSON array
    Aggregate {
        model: String,
        #[arg(value_parser = parse_json)]
        pipeline: Value,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {e}"))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("ERROR:{e}");
            process::exit(2);
        }
    }
}

/// Returns whether the operation succeeded.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = DbConfig::from_env();
    if let Some(uri) = &cli.uri {
        config = config.with_uri(uri.clone());
    }

    let mut builder = DbServiceFactory::builder().with_user_schema();
    if let Some(path) = &cli.schema {
        builder = builder.schema_file(path)?;
    }
    let factory = builder.build(Arc::new(ConnectionManager::sqlite(config)))?;

    if let Command::Models = cli.command {
        let models: Vec<Value> = factory
            .model_names()
            .into_iter()
            .filter_map(|name| {
                let schema = factory.schema(&name)?;
                let mut fields: Vec<&String> = schema.fields.keys().collect();
                fields.sort();
                Some(serde_json::json!({ "name": name, "fields": fields }))
            })
            .collect();
        print_output(&models, &cli.format)?;
        return Ok(true);
    }

    factory.initialize(None).await?;

    let success = match cli.command {
        Command::Models => true,

        Command::Status => {
            let manager = factory.manager();
            print_output(
                &serde_json::json!({
                    "status": manager.status(),
                    "connected": manager.is_connected(),
                    "models": factory.model_names(),
                }),
                &cli.format,
            )?;
            true
        }

        Command::Create { model, fields, json } => {
            let data = json.unwrap_or_else(|| fields_to_value(&fields));
            let service = factory.get_service(&model)?;
            emit(service.create(data).await, &cli.format)?
        }

        Command::Find {
            model,
            filter,
            projection,
            sort,
            skip,
            limit,
        } => {
            let options = FindOptions {
                sort: sort.map(|s| Sort::parse(&s)).transpose()?,
                skip,
                limit,
            };
            let service = factory.get_service(&model)?;
            emit(
                service
                    .find(&or_all(filter), projection.as_ref(), &options)
                    .await,
                &cli.format,
            )?
        }

        Command::FindOne {
            model,
            filter,
            projection,
        } => {
            let service = factory.get_service(&model)?;
            emit(
                service.find_one(&or_all(filter), projection.as_ref()).await,
                &cli.format,
            )?
        }

        Command::Get { model, id } => {
            let service = factory.get_service(&model)?;
            emit(service.find_by_id(&id, None).await, &cli.format)?
        }

        Command::Page {
            model,
            filter,
            page,
            limit,
            sort,
        } => {
            let options = PaginationOptions {
                page,
                limit,
                sort: sort.map(|s| Sort::parse(&s)).transpose()?,
            };
            let service = factory.get_service(&model)?;
            emit(
                service
                    .find_with_pagination(&or_all(filter), &options, None)
                    .await,
                &cli.format,
            )?
        }

        Command::Update {
            model,
            id,
            fields,
            json,
            original,
        } => {
            let update = json.unwrap_or_else(|| fields_to_value(&fields));
            let options = UpdateOptions {
                upsert: false,
                return_original: original,
            };
            let service = factory.get_service(&model)?;
            emit(service.update_by_id(&id, &update, options).await, &cli.format)?
        }

        Command::UpdateMany {
            model,
            filter,
            json,
            upsert,
        } => {
            let options = UpdateOptions {
                upsert,
                return_original: false,
            };
            let service = factory.get_service(&model)?;
            emit(
                service.update_many(&or_all(filter), &json, options).await,
                &cli.format,
            )?
        }

        Command::Delete { model, id, dry_run } => {
            let service = factory.get_service(&model)?;
            if dry_run {
                dry_run_delete(&service, &id, &cli.format).await?
            } else {
                emit(service.delete_by_id(&id).await, &cli.format)?
            }
        }

        Command::DeleteMany { model, filter } => {
            let service = factory.get_service(&model)?;
            emit(service.delete_many(&filter).await, &cli.format)?
        }

        Command::Count { model, filter } => {
            let service = factory.get_service(&model)?;
            emit(service.count(&or_all(filter)).await, &cli.format)?
        }

        Command::Exists { model, filter } => {
            let service = factory.get_service(&model)?;
            emit(service.exists(&or_all(filter)).await, &cli.format)?
        }

        Command::Aggregate { model, pipeline } => {
            let Value::Array(stages) = pipeline else {
                return Err("Pipeline must be a JSON array of stages".into());
            };
            let service = factory.get_service(&model)?;
            emit(service.aggregate(&stages).await, &cli.format)?
        }
    };

    factory.disconnect().await?;
    Ok(success)
}

async fn dry_run_delete(
    service: &ModelService,
    id: &str,
    format: &OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
    let found = service.find_by_id(id, None).await;
    if !found.success {
        return emit(found, format);
    }
    print_output(
        &serde_json::json!({
            "dry_run": true,
            "would_delete": { "model": service.name(), "id": id },
            "document": found.data.flatten(),
        }),
        format,
    )?;
    Ok(true)
}

/// Print an envelope and report its success flag.
fn emit<T: Serialize>(
    response: DbResponse<T>,
    format: &OutputFormat,
) -> Result<bool, Box<dyn std::error::Error>> {
    print_output(&response, format)?;
    Ok(response.success)
}

fn print_output<T: Serialize + ?Sized>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn or_all(filter: Option<Value>) -> Value {
    filter.unwrap_or_else(|| Value::Object(serde_json::Map::new()))
}

fn fields_to_value(fields: &[(String, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        // Numbers, booleans, arrays and objects parse as JSON; anything else is a string
        let json_val = serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_to_value() {
        let value = fields_to_value(&[
            ("username".into(), "alice".into()),
            ("age".into(), "30".into()),
            ("tags".into(), r#"["a"]"#.into()),
        ]);
        assert_eq!(value, serde_json::json!({ "username": "alice", "age": 30, "tags": ["a"] }));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("email=a=b@x.com").unwrap(),
            ("email".to_string(), "a=b@x.com".to_string())
        );
        assert!(parse_key_value("nope").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "modeldb",
            "--uri",
            "sqlite::memory:",
            "find",
            "User",
            "--filter",
            r#"{"role": "admin"}"#,
            "--limit",
            "5",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Find { limit: Some(5), .. }));
    }
}
