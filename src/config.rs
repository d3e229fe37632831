use std::time::Duration;

use secrecy::SecretString;

use crate::consts;

pub struct EngineConfig {
    endpoint: String,
    api_token: SecretString,
    voice: String,
    input_device: Option<String>,
    output_device: Option<String>,
    channel_capacity: usize,
    handshake_timeout: Duration,
    tool_warn_timeout: Duration,
}

pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = endpoint.to_string();
        self
    }

    pub fn with_api_token(mut self, api_token: &str) -> Self {
        self.config.api_token = SecretString::from(api_token.to_string());
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.config.voice = voice.to_string();
        self
    }

    pub fn with_input_device(mut self, device_name: &str) -> Self {
        self.config.input_device = Some(device_name.to_string());
        self
    }

    pub fn with_output_device(mut self, device_name: &str) -> Self {
        self.config.output_device = Some(device_name.to_string());
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn with_tool_warn_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_warn_timeout = timeout;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            endpoint: consts::DEFAULT_ENDPOINT.to_string(),
            api_token: std::env::var(consts::API_TOKEN_ENV)
                .unwrap_or_else(|_| "".to_string())
                .into(),
            voice: consts::DEFAULT_VOICE.to_string(),
            input_device: None,
            output_device: None,
            channel_capacity: consts::EVENT_CHANNEL_CAPACITY,
            handshake_timeout: consts::DEFAULT_HANDSHAKE_TIMEOUT,
            tool_warn_timeout: consts::DEFAULT_TOOL_WARN_TIMEOUT,
        }
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_token(&self) -> &SecretString {
        &self.api_token
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn input_device(&self) -> Option<&str> {
        self.input_device.as_deref()
    }

    pub fn output_device(&self) -> Option<&str> {
        self.output_device.as_deref()
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn tool_warn_timeout(&self) -> Duration {
        self.tool_warn_timeout
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
