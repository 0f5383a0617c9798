use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// A bus message contract: topic plus its JSON schema. Loaded from
/// `contracts/mqtt/*.json` so the dashboard and gateway-sim share one source
/// of truth for the wire shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub topic: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ContractRegistry {
    contracts: HashMap<String, Contract>, // "live@v1" -> Contract
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self { contracts: HashMap::new() }
    }

    pub async fn load_contracts_from_dir<P: AsRef<Path>>(
        contracts_dir: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut registry = Self::new();
        let mut entries = fs::read_dir(contracts_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Contract>(&content) {
                        Ok(contract) => {
                            let name = contract_name(&contract.topic);
                            registry.contracts.insert(name, contract);
                        }
                        Err(e) => warn!("invalid contract JSON in {:?}: {}", path, e),
                    },
                    Err(e) => warn!("failed to read {:?}: {}", path, e),
                }
            }
        }

        Ok(registry)
    }

    /// Cheap conformance check for a payload on a contracted topic.
    pub fn validate_message(&self, topic: &str, payload: &str) -> Result<(), String> {
        let name = contract_name(topic);
        self.contracts
            .get(&name)
            .ok_or_else(|| format!("contract '{}' not found", name))?;

        serde_json::from_str::<serde_json::Value>(payload)
            .map_err(|e| format!("invalid JSON: {}", e))?;
        Ok(())
    }

    pub fn list_contracts(&self) -> Vec<String> {
        self.contracts.keys().cloned().collect()
    }

    pub fn get_contract(&self, name: &str) -> Option<&Contract> {
        self.contracts.get(name)
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// "solwatch/telemetry/live@v1" -> "live@v1"
fn contract_name(topic: &str) -> String {
    topic.split('/').next_back().unwrap_or(topic).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_name_takes_last_segment() {
        assert_eq!(contract_name("solwatch/telemetry/live@v1"), "live@v1");
        assert_eq!(contract_name("live@v1"), "live@v1");
        assert_eq!(contract_name("solwatch/history/query@v1"), "query@v1");
    }

    #[test]
    fn validate_rejects_unknown_contract_and_bad_json() {
        let mut registry = ContractRegistry::new();
        registry.contracts.insert(
            "live@v1".into(),
            Contract {
                topic: "solwatch/telemetry/live@v1".into(),
                schema: serde_json::json!({}),
            },
        );

        assert!(registry.validate_message("solwatch/telemetry/live@v1", "{}").is_ok());
        assert!(registry.validate_message("solwatch/other/thing@v1", "{}").is_err());
        assert!(registry.validate_message("solwatch/telemetry/live@v1", "not json").is_err());
    }
}
