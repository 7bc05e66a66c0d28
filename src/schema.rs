use anyhow::Result;

use crate::model::definition::StrategyDefinition;

/// Print the canonical strategy definition JSON Schema. The API service
/// vendors this into its request validation.
pub fn run() -> Result<()> {
    let schema = schemars::schema_for!(StrategyDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
