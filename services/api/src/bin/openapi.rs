//! services/api/src/bin/openapi.rs
//!
//! Writes the residency API's OpenAPI document for client generation.
//! Usage: `openapi [output-path]`, defaulting to `openapi.json`.

use api_lib::{error::ApiError, web::rest::ApiDoc};
use std::path::PathBuf;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn main() -> Result<(), ApiError> {
    let output = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let doc = ApiDoc::openapi();
    let route_count = doc.paths.paths.len();
    std::fs::write(&output, doc.to_pretty_json()?)?;

    println!("Wrote {} routes to {}", route_count, output.display());
    Ok(())
}
