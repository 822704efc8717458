use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};

use scim_engine::config::AppConfig;
use scim_engine::error::AppResult;
use scim_engine::logging;
use scim_engine::patch::{PatchEngine, PatchRequest};
use scim_engine::schema::{DocumentValidator, HttpMethod, SchemaRegistry};

#[derive(Parser, Debug)]
#[command(name = "scim-engine")]
#[command(about = "Validates SCIM 2.0 resources and applies PATCH requests against registered schemas")]
struct Args {
    /// Configuration file path (default: config.yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a resource document in request or response direction
    Validate {
        /// Resource type name, e.g. User
        #[arg(short = 't', long, default_value = "User")]
        resource_type: String,

        #[arg(short, long, value_enum, default_value_t = Direction::Request)]
        direction: Direction,

        /// HTTP method of the request (request direction only)
        #[arg(short, long, value_enum, default_value_t = Method::Post)]
        method: Method,

        /// Comma separated `attributes` parameter (response direction only)
        #[arg(long)]
        attributes: Option<String>,

        /// Comma separated `excludedAttributes` parameter (response direction only)
        #[arg(long)]
        excluded_attributes: Option<String>,

        /// JSON file holding the resource
        file: String,
    },
    /// Apply a PATCH request to a resource and print the patched resource
    Patch {
        #[arg(short = 't', long, default_value = "User")]
        resource_type: String,

        /// JSON file holding the current resource
        resource: String,

        /// JSON file holding the PatchOp request
        request: String,
    },
    /// List the registered resource types with their schemas
    ResourceTypes,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Direction {
    Request,
    Response,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    Post,
    Put,
    Patch,
}

impl From<Method> for HttpMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Post => HttpMethod::Post,
            Method::Put => HttpMethod::Put,
            Method::Patch => HttpMethod::Patch,
        }
    }
}

fn read_json(path: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path, e))?;
    let value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {}", path, e))?;
    Ok(value)
}

fn split_params(params: Option<&str>) -> Vec<String> {
    params
        .map(|p| {
            p.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn run(
    command: &Command,
    registry: &SchemaRegistry,
    app_config: &AppConfig,
) -> Result<AppResult<Value>, Box<dyn std::error::Error>> {
    let result = match command {
        Command::Validate {
            resource_type,
            direction,
            method,
            attributes,
            excluded_attributes,
            file,
        } => {
            let document = read_json(file)?;
            let validator = match direction {
                Direction::Request => DocumentValidator::for_request(registry, (*method).into()),
                Direction::Response => DocumentValidator::for_response(registry)
                    .with_attribute_params(
                        &split_params(attributes.as_deref()),
                        &split_params(excluded_attributes.as_deref()),
                    ),
            };
            validator.validate_resource(resource_type, &document)
        }
        Command::Patch {
            resource_type,
            resource,
            request,
        } => {
            let resource = read_json(resource)?;
            let request = read_json(request)?;
            PatchRequest::from_json(&request).and_then(|request| {
                let engine = PatchEngine::new(registry, resource_type, app_config.compatibility)?;
                let outcome = engine.apply(&resource, &request)?;
                debug!("Patch changed the resource: {}", outcome.changed);
                Ok(outcome.resource)
            })
        }
        Command::ResourceTypes => registry
            .resource_types()
            .iter()
            .map(|rt| {
                registry.resource_schema(&rt.name).map(|resolved| {
                    json!({
                        "name": rt.name,
                        "endpoint": rt.endpoint,
                        "schema": resolved.main.id,
                        "schemaExtensions": resolved
                            .extensions
                            .iter()
                            .map(|(ext, _)| json!({"schema": ext.schema, "required": ext.required}))
                            .collect::<Vec<_>>(),
                    })
                })
            })
            .collect::<AppResult<Vec<_>>>()
            .map(Value::Array),
    };
    Ok(result)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let using_defaults = args.config == "config.yaml" && !Path::new("config.yaml").exists();
    let app_config = if using_defaults {
        AppConfig::default_config()
    } else {
        AppConfig::load_from_file(&args.config)
            .map_err(|e| format!("Failed to load configuration: {}", e))?
    };

    logging::init(&app_config.logging.level, args.verbose)?;
    if using_defaults {
        info!("No config.yaml found, using the built-in User and Group resource types");
    } else {
        info!("Configuration loaded from {}", args.config);
    }

    let registry = app_config.build_registry()?;

    match run(&args.command, &registry, &app_config)? {
        Ok(document) => {
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_error_document())?);
            std::process::exit(1);
        }
    }
}
