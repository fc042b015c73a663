use crate::error::Result;
use super::types::SchemaDefinition;
use std::path::Path;

/// Parse a schema file into a SchemaDefinition.
/// `.json` files are read as JSON, anything else as YAML.
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_schema_json(&content),
        _ => parse_schema_str(&content),
    }
}

/// Parse a schema YAML string into a SchemaDefinition
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_yaml::from_str(content)?;
    Ok(schema)
}

/// Parse a schema JSON string into a SchemaDefinition
pub fn parse_schema_json(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_json::from_str(content)?;
    Ok(schema)
}
