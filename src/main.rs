use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value as JsonValue, json};

use refract::{Environment, NetworkFn, ROOT_ID, ReadOutcome, Variables, load_entrypoint, load_variables, resolve};

#[derive(Parser)]
#[command(name = "refract", version, about = "Normalized cache runtime tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an entrypoint against a canned response and print the typed output
    Run {
        /// Entrypoint artifact JSON emitted by the compiler
        #[arg(long)]
        entrypoint: PathBuf,
        /// Canned network response JSON
        #[arg(long)]
        response: PathBuf,
        /// Variable bindings as a flat JSON object
        #[arg(long)]
        variables: Option<PathBuf>,
    },
    /// Normalize a canned response and dump the resulting store records
    Records {
        /// Entrypoint artifact JSON emitted by the compiler
        #[arg(long)]
        entrypoint: PathBuf,
        /// Canned network response JSON
        #[arg(long)]
        response: PathBuf,
        /// Variable bindings as a flat JSON object
        #[arg(long)]
        variables: Option<PathBuf>,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            entrypoint,
            response,
            variables,
        } => cmd_run(&entrypoint, response, variables.as_deref()),
        Command::Records {
            entrypoint,
            response,
            variables,
        } => cmd_records(&entrypoint, &response, variables.as_deref()),
    }
}

fn cmd_run(
    entrypoint_path: &Path,
    response_path: PathBuf,
    variables_path: Option<&Path>,
) -> Result<()> {
    let entrypoint = load_entrypoint(entrypoint_path)?;
    let variables = load_optional_variables(variables_path)?;
    let environment = Environment::new(canned_network(response_path));

    match resolve(&environment, &entrypoint, &variables)? {
        ReadOutcome::Complete(value) => {
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
        }
        ReadOutcome::Missing(missing) => {
            let report = json!({
                "missing": {
                    "recordId": missing.record_id,
                    "fieldName": missing.field_name,
                    "fieldKey": missing.field_key,
                }
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn cmd_records(
    entrypoint_path: &Path,
    response_path: &Path,
    variables_path: Option<&Path>,
) -> Result<()> {
    let entrypoint = load_entrypoint(entrypoint_path)?;
    let variables = load_optional_variables(variables_path)?;
    let response = load_response(response_path)?;

    let environment = Environment::offline();
    environment.normalize_response(&entrypoint.normalization, &response, &variables, ROOT_ID)?;
    let dump = environment.with_store(|store| store.to_json());
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

fn load_optional_variables(path: Option<&Path>) -> Result<Variables> {
    match path {
        Some(path) => load_variables(path),
        None => Ok(Variables::new()),
    }
}

fn load_response(path: &Path) -> Result<JsonValue> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read response file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("malformed response file {}", path.display()))
}

/// A network function serving one canned response file, re-read per fetch.
fn canned_network(path: PathBuf) -> NetworkFn {
    Box::new(move |_, _| load_response(&path))
}
