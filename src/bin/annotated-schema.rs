//! Annotated Schema CLI
//!
//! Command-line interface for inspecting model files and running their
//! schemas against JSON payloads.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use annotated_schema::{load_json, load_model, validate, Model, Schema, ValidateError};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "annotated-schema")]
#[command(about = "Derive and run schemas from annotated class models")]
#[command(version)]
struct Cli {
    /// Log registration and conversion steps to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Model file declaring types, classes and schemas
    model: PathBuf,

    /// Schema to use
    #[arg(long, short)]
    schema: String,
}

#[derive(Args)]
struct Output {
    /// Output file (stdout if not specified)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the fields generated for a schema
    Fields {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        output: Output,
    },

    /// Export a schema as JSON Schema (draft 2020-12)
    JsonSchema {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        output: Output,
    },

    /// Serialize an object with a schema
    Dump {
        #[command(flatten)]
        target: Target,

        /// Object to serialize
        payload: PathBuf,

        #[command(flatten)]
        output: Output,
    },

    /// Deserialize and validate a payload with a schema
    Load {
        #[command(flatten)]
        target: Target,

        /// Payload to deserialize
        payload: PathBuf,

        #[command(flatten)]
        output: Output,
    },

    /// Validate a payload against a schema's JSON Schema export
    Validate {
        #[command(flatten)]
        target: Target,

        /// Payload to validate
        payload: PathBuf,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .compact()
            .init();
    }

    let result = match cli.command {
        Commands::Fields { target, output } => run_fields(&target, &output),
        Commands::JsonSchema { target, output } => run_json_schema(&target, &output),
        Commands::Dump {
            target,
            payload,
            output,
        } => run_transform(&target, &payload, &output, Schema::dump),
        Commands::Load {
            target,
            payload,
            output,
        } => run_transform(&target, &payload, &output, Schema::load),
        Commands::Validate {
            target,
            payload,
            json,
        } => run_validate(&target, &payload, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn open_schema(target: &Target) -> Result<(Model, Arc<Schema>), u8> {
    let model = load_model(&target.model).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let schema = match model.schema(&target.schema) {
        Some(schema) => Arc::clone(schema),
        None => {
            let known: Vec<&str> = model.schemas().map(|s| s.name()).collect();
            eprintln!(
                "Error: no schema named {} in {} (known: {})",
                target.schema,
                target.model.display(),
                known.join(", ")
            );
            return Err(2);
        }
    };
    Ok((model, schema))
}

fn run_fields(target: &Target, output: &Output) -> Result<(), u8> {
    let (_model, schema) = open_schema(target)?;
    write_output(&schema.describe(), output)
}

fn run_json_schema(target: &Target, output: &Output) -> Result<(), u8> {
    let (_model, schema) = open_schema(target)?;
    let document = schema.json_schema().map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    write_output(&document, output)
}

fn run_transform(
    target: &Target,
    payload_path: &Path,
    output: &Output,
    transform: fn(&Schema, &Value) -> Result<Value, ValidateError>,
) -> Result<(), u8> {
    let (_model, schema) = open_schema(target)?;
    let payload = load_json(payload_path).map_err(|e| {
        eprintln!("Error loading payload: {}", e);
        e.exit_code() as u8
    })?;

    match transform(&schema, &payload) {
        Ok(value) => write_output(&value, output),
        Err(ValidateError::Invalid { errors }) => {
            eprintln!("Validation failed:");
            for error in errors {
                eprintln!("  {}", error);
            }
            Err(1)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Err(e.exit_code() as u8)
        }
    }
}

fn run_validate(target: &Target, payload_path: &Path, json_output: bool) -> Result<(), u8> {
    let (_model, schema) = open_schema(target)?;
    let payload = load_json(payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    match validate(&schema, &payload) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid { errors }) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn write_output(value: &Value, output: &Output) -> Result<(), u8> {
    let text = if output.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match &output.output {
        Some(path) => {
            std::fs::write(path, &text).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", text);
        }
    }

    Ok(())
}
