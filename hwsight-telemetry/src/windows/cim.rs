//! CIM queries through PowerShell, decoded from `ConvertTo-Json` output.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use tracing::warn;

/// `ConvertTo-Json` prints a single object bare and several as an array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// PowerShell pipeline selecting `properties` of every `class` instance.
pub fn cim_command(class: &str, properties: &[&str]) -> String {
    format!(
        "Get-CimInstance -ClassName {} | Select-Object {} | ConvertTo-Json -Compress",
        class,
        properties.join(",")
    )
}

/// Decode `ConvertTo-Json` output. Empty or malformed output yields no rows.
pub fn parse_cim_json<T: DeserializeOwned>(lines: &[String]) -> Vec<T> {
    let text = lines.join("\n");
    if text.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<OneOrMany<T>>(&text) {
        Ok(OneOrMany::Many(rows)) => rows,
        Ok(OneOrMany::One(row)) => vec![row],
        Err(e) => {
            warn!("Unparseable CIM output: {}", e);
            Vec::new()
        }
    }
}

/// Unsigned counters arrive as numbers or, for 64-bit properties on some
/// hosts, as strings.
pub fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Signed(i64),
        Float(f64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Signed(n)) => u64::try_from(n).ok(),
        Some(Raw::Float(f)) if f >= 0.0 => Some(f as u64),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
