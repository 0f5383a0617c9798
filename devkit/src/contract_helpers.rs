/*!
Helpers for loading and working with the bus contract files

Eases development by providing utilities to:
- load contracts from the `contracts/` JSON files
- build events conforming to a contract
- generate example payloads from a schema
*/

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Contract {
    pub name: String,
    pub version: String,
    pub topic: String,
    pub contract_type: String,
    pub schema: Value,
    pub description: Option<String>,
}

/// Loads and indexes contracts from the JSON files
pub struct ContractLoader {
    contracts: HashMap<String, Contract>,
    contracts_dir: PathBuf,
}

impl ContractLoader {
    pub fn new<P: AsRef<Path>>(contracts_dir: P) -> Self {
        Self {
            contracts: HashMap::new(),
            contracts_dir: contracts_dir.as_ref().to_path_buf(),
        }
    }

    /// Load every MQTT contract under `<dir>/mqtt`
    pub fn load_mqtt_contracts(&mut self) -> Result<usize> {
        let mqtt_dir = self.contracts_dir.join("mqtt");
        self.load_contracts_from_dir(&mqtt_dir)
    }

    fn load_contracts_from_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            log::warn!("contracts directory not found: {}", dir.display());
            return Ok(0);
        }

        let mut count = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                match self.load_contract(&path) {
                    Ok(contract) => {
                        log::info!("loaded contract: {}", contract.name);
                        self.contracts.insert(contract.name.clone(), contract);
                        count += 1;
                    }
                    Err(e) => {
                        log::warn!("failed to load contract {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(count)
    }

    fn load_contract(&self, path: &Path) -> Result<Contract> {
        let content = std::fs::read_to_string(path)?;
        let json: Value = serde_json::from_str(&content)?;

        // Solwatch contract files carry topic + schema; name falls back to
        // the file stem, version to the @vN suffix of the topic.
        let topic = json.get("topic").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let version = topic
            .rsplit('@')
            .next()
            .filter(|v| v.starts_with('v'))
            .unwrap_or("v1")
            .to_string();

        let contract = Contract {
            name: json
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_else(|| path.file_stem().unwrap().to_str().unwrap())
                .to_string(),
            version,
            topic,
            contract_type: json
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("event")
                .to_string(),
            schema: json.get("schema").unwrap_or(&Value::Object(Map::new())).clone(),
            description: json
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };

        Ok(contract)
    }

    /// Contract by name
    pub fn get_contract(&self, name: &str) -> Option<&Contract> {
        self.contracts.get(name)
    }

    /// All loaded contracts
    pub fn list_contracts(&self) -> Vec<&Contract> {
        self.contracts.values().collect()
    }

    /// Contract whose topic matches exactly
    pub fn contract_for_topic(&self, topic: &str) -> Option<&Contract> {
        self.contracts.values().find(|c| c.topic == topic)
    }
}

/// Builds events conforming to a contract
pub struct EventBuilder {
    contract: Contract,
}

impl EventBuilder {
    pub fn new(contract: Contract) -> Self {
        Self { contract }
    }

    /// New empty event on the contract's topic
    pub fn build(&self) -> EventInstance {
        EventInstance {
            topic: self.contract.topic.clone(),
            payload: Value::Object(Map::new()),
            contract_name: self.contract.name.clone(),
        }
    }

    /// Required field names per the contract schema
    pub fn required_fields(&self) -> Vec<String> {
        if let Some(props) = self.contract.schema.get("properties").and_then(|p| p.as_object()) {
            if let Some(required) = self.contract.schema.get("required").and_then(|r| r.as_array())
            {
                return required
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
            }
            // No "required" list: every field is optional
            return props.keys().cloned().collect();
        }
        vec![]
    }

    /// Example event with placeholder values from the schema
    pub fn build_example(&self) -> Result<EventInstance> {
        let mut payload = Map::new();

        if let Some(props) = self.contract.schema.get("properties").and_then(|p| p.as_object()) {
            for (field, field_schema) in props {
                let example_value = self.generate_example_value(field_schema)?;
                payload.insert(field.clone(), example_value);
            }
        }

        Ok(EventInstance {
            topic: self.contract.topic.clone(),
            payload: Value::Object(payload),
            contract_name: self.contract.name.clone(),
        })
    }

    fn generate_example_value(&self, schema: &Value) -> Result<Value> {
        match schema.get("type").and_then(|t| t.as_str()) {
            Some("string") => {
                if let Some(example) = schema.get("example") {
                    Ok(example.clone())
                } else {
                    Ok(Value::String("example_string".to_string()))
                }
            }
            Some("number") => Ok(Value::Number(serde_json::Number::from(42))),
            Some("integer") => Ok(Value::Number(serde_json::Number::from(42))),
            Some("boolean") => Ok(Value::Bool(true)),
            Some("array") => Ok(Value::Array(vec![Value::String("example_item".to_string())])),
            Some("object") => Ok(Value::Object(Map::new())),
            _ => Ok(Value::String("unknown_type".to_string())),
        }
    }
}

/// Event instance with its topic and payload
#[derive(Debug, Clone)]
pub struct EventInstance {
    pub topic: String,
    pub payload: Value,
    pub contract_name: String,
}

impl EventInstance {
    /// Set a payload field
    pub fn set_field<S: Into<String>>(mut self, field: S, value: Value) -> Self {
        if let Value::Object(ref mut obj) = self.payload {
            obj.insert(field.into(), value);
        }
        self
    }

    /// Set a string field
    pub fn set_string<S: Into<String>, V: Into<String>>(self, field: S, value: V) -> Self {
        self.set_field(field, Value::String(value.into()))
    }

    /// Set a number field
    pub fn set_number<S: Into<String>>(self, field: S, value: f64) -> Self {
        self.set_field(field, Value::Number(serde_json::Number::from_f64(value).unwrap()))
    }

    /// Set a boolean field
    pub fn set_bool<S: Into<String>>(self, field: S, value: bool) -> Self {
        self.set_field(field, Value::Bool(value))
    }

    /// JSON bytes for an MQTT publish
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }

    /// Stamp the payload with the current time (ISO format)
    pub fn with_timestamp(self) -> Self {
        self.set_string("timestamp", chrono::Utc::now().to_rfc3339())
    }
}
