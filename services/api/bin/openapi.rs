use parley_api::router::ApiDoc;
use utoipa::OpenApi;

/// Writes the OpenAPI document of the service to `path`.
fn write_spec(
    api_doc: utoipa::openapi::OpenApi,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = api_doc.to_pretty_json()?;
    std::fs::write(path, json)?;
    println!("Wrote {}", path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    write_spec(ApiDoc::openapi(), &path)?;
    Ok(())
}
