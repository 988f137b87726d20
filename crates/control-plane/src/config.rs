use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "ARMADA_CP";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub operator: OperatorAuthConfig,
    pub enrollment: EnrollmentConfig,
    pub events: EventsConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorAuthConfig {
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub tokens: Vec<String>,
    pub header_name: String,
}

fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(value) => Ok(value.split(',').map(|s| s.to_string()).collect()),
        StringOrVec::Vec(values) => Ok(values),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentConfig {
    /// Validity window for minted tokens when the request does not set one.
    pub default_ttl_secs: u64,
    /// Upper bound an operator may request.
    pub max_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Broadcast ring size per observer; slow observers lag past this.
    pub buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Outbound queue depth per agent connection.
    pub outbound_buffer: usize,
}

impl EnrollmentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_ttl_secs == 0 {
            anyhow::bail!("enrollment.default_ttl_secs must be > 0");
        }
        if self.max_ttl_secs < self.default_ttl_secs {
            anyhow::bail!("enrollment.max_ttl_secs must be >= default_ttl_secs");
        }
        Ok(())
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric token strings are not coerced.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(env)
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("operator.tokens", vec!["dev-operator-token"])?
        .set_default("operator.header_name", "authorization")?
        .set_default("enrollment.default_ttl_secs", 15 * 60u64)?
        .set_default("enrollment.max_ttl_secs", 24 * 60 * 60u64)?
        .set_default("events.buffer", 256i64)?
        .set_default("agent.outbound_buffer", 32i64)?;

    let cfg = builder.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    app.server.host = app.server.host.trim().to_string();
    app.operator.header_name = app.operator.header_name.trim().to_string();
    if app.operator.header_name.is_empty() {
        anyhow::bail!("operator.header_name cannot be empty");
    }
    if app.events.buffer == 0 {
        anyhow::bail!("events.buffer must be > 0");
    }
    if app.agent.outbound_buffer == 0 {
        anyhow::bail!("agent.outbound_buffer must be > 0");
    }
    app.enrollment.validate()?;
    Ok(app)
}
