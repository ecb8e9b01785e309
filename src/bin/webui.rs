use std::fmt::Write as FmtWrite;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use refract::{
    Entrypoint, Environment, ROOT_ID, ReadOutcome, RecordState, Variables, digest_hex,
    load_entrypoint, load_variables, query_cache_key,
};

const SEGMENT_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?');

#[derive(Parser, Debug)]
#[command(name = "refract-webui", about = "Read-only inspector for a normalized store")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Entrypoint artifact JSON emitted by the compiler
    #[arg(long)]
    entrypoint: PathBuf,

    /// Canned network response JSON to normalize at startup
    #[arg(long)]
    response: PathBuf,

    /// Variable bindings as a flat JSON object
    #[arg(long)]
    variables: Option<PathBuf>,
}

struct Inspector {
    environment: Environment,
    entrypoint: Entrypoint,
    variables: Variables,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let entrypoint = load_entrypoint(&args.entrypoint)?;
    let variables = match &args.variables {
        Some(path) => load_variables(path)?,
        None => Variables::new(),
    };
    let response_text = std::fs::read_to_string(&args.response)?;
    let response = serde_json::from_str(&response_text)?;

    let environment = Environment::offline();
    environment.normalize_response(&entrypoint.normalization, &response, &variables, ROOT_ID)?;

    let inspector = Arc::new(Inspector {
        environment,
        entrypoint,
        variables,
    });

    let server = Server::http(&args.listen)
        .map_err(|err| anyhow!("failed to bind {}: {err}", args.listen))?;
    println!("store inspector listening on http://{}", args.listen);

    for request in server.incoming_requests() {
        let inspector = Arc::clone(&inspector);
        if let Err(err) = handle_request(&inspector, request) {
            eprintln!("error handling request: {err}");
        }
    }
    Ok(())
}

fn handle_request(inspector: &Inspector, request: Request) -> Result<()> {
    if *request.method() != Method::Get {
        let response = Response::from_string("Only GET supported")
            .with_status_code(StatusCode(405))
            .with_header(content_type("text/plain"));
        request.respond(response)?;
        return Ok(());
    }

    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("");
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let response = match segments.as_slice() {
        [] | [""] => match build_index_html(inspector) {
            Ok(html) => html_response(html),
            Err(err) => error_response(500, err),
        },
        ["api", "records"] => {
            let ids: Vec<String> = inspector
                .environment
                .with_store(|store| store.record_ids().cloned().collect());
            json_response(serde_json::to_string_pretty(&ids)?)
        }
        ["api", "record", encoded] => match decode_segment(encoded) {
            Ok(record_id) => match record_json(inspector, &record_id) {
                Ok(body) => json_response(body),
                Err(err) => error_response(404, err),
            },
            Err(err) => error_response(400, err),
        },
        ["api", "read"] => match read_json(inspector) {
            Ok(body) => json_response(body),
            Err(err) => error_response(500, err),
        },
        ["api", "store"] => {
            let dump = inspector.environment.with_store(|store| store.to_json());
            json_response(serde_json::to_string_pretty(&dump)?)
        }
        _ => error_response(404, anyhow!("unrecognised path")),
    };

    request.respond(response)?;
    Ok(())
}

fn decode_segment(encoded: &str) -> Result<String> {
    Ok(percent_decode_str(encoded).decode_utf8()?.into_owned())
}

fn record_json(inspector: &Inspector, record_id: &str) -> Result<String> {
    inspector.environment.with_store(|store| match store.get(record_id) {
        RecordState::Missing => Err(anyhow!("record `{record_id}` not found")),
        RecordState::Deleted => Ok(serde_json::to_string_pretty(&json!(null))?),
        RecordState::Present(record) => {
            let mut fields = serde_json::Map::new();
            for (field_key, value) in record {
                fields.insert(field_key.clone(), value.to_json());
            }
            Ok(serde_json::to_string_pretty(&fields)?)
        }
    })
}

fn read_json(inspector: &Inspector) -> Result<String> {
    let outcome = inspector
        .environment
        .read_entrypoint(&inspector.entrypoint, &inspector.variables)?;
    let body = match outcome {
        ReadOutcome::Complete(value) => value.to_json(),
        ReadOutcome::Missing(missing) => json!({
            "missing": {
                "recordId": missing.record_id,
                "fieldName": missing.field_name,
                "fieldKey": missing.field_key,
            }
        }),
    };
    Ok(serde_json::to_string_pretty(&body)?)
}

fn build_index_html(inspector: &Inspector) -> Result<String> {
    let query_key = query_cache_key(&inspector.entrypoint.query_text, &inspector.variables)?;

    let mut html = String::new();
    html.push_str(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\" /><title>Store inspector</title>",
    );
    html.push_str(
        "<style>body{font-family:sans-serif;margin:2rem;}table.grid{border-collapse:collapse;margin-bottom:1.5rem;}table.grid th,table.grid td{border:1px solid #ccc;padding:0.35rem 0.6rem;text-align:left;}section{margin-bottom:2rem;}code{background:#f4f4f4;padding:0.15rem 0.35rem;border-radius:4px;}</style>",
    );
    html.push_str("</head><body><h1>Store inspector</h1>");

    html.push_str("<section><h2>Entrypoint</h2><table class=\"grid\">");
    writeln!(
        html,
        "<tr><th>Name</th><td><code>{}</code></td></tr>",
        escape_html(&inspector.entrypoint.name)
    )?;
    writeln!(
        html,
        "<tr><th>Query key</th><td><code>{}</code></td></tr>",
        digest_hex(&query_key)
    )?;
    writeln!(
        html,
        "<tr><th>Output</th><td><a href=\"/api/read\">/api/read</a></td></tr>"
    )?;
    html.push_str("</table></section>");

    html.push_str("<section><h2>Records</h2><table class=\"grid\"><tr><th>Record id</th><th>Fields</th></tr>");
    let rows: Vec<(String, usize)> = inspector.environment.with_store(|store| {
        store
            .record_ids()
            .map(|record_id| {
                let fields = match store.get(record_id) {
                    RecordState::Present(record) => record.len(),
                    _ => 0,
                };
                (record_id.clone(), fields)
            })
            .collect()
    });
    for (record_id, fields) in rows {
        let href = utf8_percent_encode(&record_id, SEGMENT_ENCODE).to_string();
        writeln!(
            html,
            "<tr><td><a href=\"/api/record/{href}\"><code>{}</code></a></td><td>{fields}</td></tr>",
            escape_html(&record_id)
        )?;
    }
    html.push_str("</table></section>");

    html.push_str("</body></html>");
    Ok(html)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn content_type(value: &str) -> Header {
    Header::from_bytes("Content-Type", value).expect("static content type is valid")
}

fn html_response(body: String) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body).with_header(content_type("text/html; charset=utf-8"))
}

fn json_response(body: String) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body).with_header(content_type("application/json"))
}

fn error_response(status: u16, err: anyhow::Error) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(format!("error: {err}"))
        .with_status_code(StatusCode(status))
        .with_header(content_type("text/plain"))
}
