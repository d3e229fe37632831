/// A tool the application exposes to the remote agent, advertised in
/// `session.start`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSchema {
    /// The name of the tool
    name: String,

    /// The description of the tool
    description: String,

    /// The parameters of the tool in JSON Schema format
    parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(name: String, description: String, parameters: serde_json::Value) -> Self {
        Self {
            name,
            description,
            parameters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }
}

/// A single remote-initiated tool invocation. The `call_id` correlates the
/// eventual `tool.result`; each id is settled exactly once.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRequest {
    call_id: String,

    /// The name of the tool being invoked
    name: String,

    /// Opaque argument map, forwarded to the registered handler as-is
    arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(call_id: String, name: String, arguments: serde_json::Value) -> Self {
        Self {
            call_id,
            name,
            arguments,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &serde_json::Value {
        &self.arguments
    }
}
