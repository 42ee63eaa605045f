use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use x402::price::parse_price;
use x402::{ChainConfig, X402Error};

use crate::error::ServerError;

/// Query type whose route fans out to every configured source.
pub const REPORT_QUERY: &str = "report";

/// Prefix of the payment-gated query routes.
pub const QUERY_PATH_PREFIX: &str = "/api/query/";

/// One upstream data source: `query_type=provider@url` in `QUERY_SOURCES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub query_type: String,
    pub provider: String,
    pub url: String,
}

/// Server configuration, read from the environment.
///
/// `EVM_PRIVATE_KEY` is not held here; see [`load_signer_key`].
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Receiver override. Defaults to the signer's address.
    pub pay_to: Option<Address>,
    /// Authoritative ledger. Unset means fallback-only.
    pub ledger_db_path: Option<String>,
    /// Persistent replay set. Unset means in-memory.
    pub replay_db_path: Option<String>,
    pub chain: ChainConfig,
    pub query_price: String,
    pub report_price: String,
    pub sources: Vec<SourceSpec>,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
    pub admin_token: Option<String>,
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("pay_to", &self.pay_to)
            .field("ledger_db_path", &self.ledger_db_path)
            .field("replay_db_path", &self.replay_db_path)
            .field("chain", &self.chain)
            .field("query_price", &self.query_price)
            .field("report_price", &self.report_price)
            .field("sources", &self.sources)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field("admin_token", &redact(&self.admin_token))
            .field("metrics_token", &redact(&self.metrics_token))
            .field("public_metrics", &self.public_metrics)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4021,
            pay_to: None,
            ledger_db_path: None,
            replay_db_path: None,
            chain: ChainConfig::default(),
            query_price: "$0.00005".to_string(),
            report_price: "$0.00015".to_string(),
            sources: Vec::new(),
            rate_limit_rpm: 60,
            allowed_origins: Vec::new(),
            admin_token: None,
            metrics_token: None,
            public_metrics: false,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ServerError>
where
    T::Err: std::fmt::Display,
{
    match env_nonempty(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid {key} '{raw}': {e}"))),
        None => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ServerError> {
        let defaults = Self::default();
        let default_chain = ChainConfig::default();

        let pay_to = match env_nonempty("PAY_TO") {
            Some(raw) => Some(
                raw.parse::<Address>()
                    .map_err(|e| ServerError::Config(format!("invalid PAY_TO: {e}")))?,
            ),
            None => None,
        };

        let chain = ChainConfig {
            chain_id: env_parse("CHAIN_ID", default_chain.chain_id)?,
            network: env_nonempty("NETWORK").unwrap_or(default_chain.network.clone()),
            currency: env_nonempty("CURRENCY").unwrap_or(default_chain.currency.clone()),
            token_decimals: env_parse("TOKEN_DECIMALS", default_chain.token_decimals)?,
            requirement_ttl_secs: env_parse(
                "REQUIREMENT_TTL_SECS",
                default_chain.requirement_ttl_secs,
            )?,
            ..default_chain
        };
        if chain.requirement_ttl_secs == 0 {
            return Err(ServerError::Config(
                "REQUIREMENT_TTL_SECS must be positive".to_string(),
            ));
        }

        let sources = match env_nonempty("QUERY_SOURCES") {
            Some(raw) => parse_sources(&raw)?,
            None => Vec::new(),
        };

        let allowed_origins: Vec<String> = env_nonempty("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: env_parse("PORT", defaults.port)?,
            pay_to,
            ledger_db_path: env_nonempty("LEDGER_DB_PATH"),
            replay_db_path: env_nonempty("REPLAY_DB_PATH"),
            chain,
            query_price: env_nonempty("QUERY_PRICE").unwrap_or(defaults.query_price),
            report_price: env_nonempty("REPORT_PRICE").unwrap_or(defaults.report_price),
            sources,
            rate_limit_rpm: env_parse("RATE_LIMIT_RPM", defaults.rate_limit_rpm)?,
            allowed_origins,
            admin_token: env_nonempty("ADMIN_TOKEN"),
            metrics_token: env_nonempty("METRICS_TOKEN"),
            public_metrics: std::env::var("X402_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    /// Price every configured query type at `query_price`, plus the report
    /// route at `report_price` when at least one source exists.
    pub fn route_config(&self, pay_to: Address) -> Result<RouteConfig, ServerError> {
        let mut builder = RouteConfigBuilder::new(pay_to, self.chain.token_decimals);
        for source in &self.sources {
            builder = builder.route(
                "GET",
                &format!("{QUERY_PATH_PREFIX}{}", source.query_type),
                &self.query_price,
                Some(&format!("{} data from {}", source.query_type, source.provider)),
            );
        }
        if !self.sources.is_empty() {
            builder = builder.route(
                "GET",
                &format!("{QUERY_PATH_PREFIX}{REPORT_QUERY}"),
                &self.report_price,
                Some("combined report from every source"),
            );
        }
        builder.build()
    }
}

/// Read the receiver key. Never stored in [`ServerConfig`] so it cannot end up in a `Debug` dump.
pub fn load_signer_key() -> Option<String> {
    env_nonempty("EVM_PRIVATE_KEY")
}

/// Parse `type=provider@url[,type=provider@url...]`.
pub fn parse_sources(raw: &str) -> Result<Vec<SourceSpec>, ServerError> {
    let mut specs: Vec<SourceSpec> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let invalid = || ServerError::Config(format!("invalid QUERY_SOURCES entry '{entry}'"));
        let (query_type, rest) = entry.split_once('=').ok_or_else(invalid)?;
        let (provider, url) = rest.split_once('@').ok_or_else(invalid)?;
        let query_type = query_type.trim();
        if query_type.is_empty() || query_type == REPORT_QUERY || provider.trim().is_empty() {
            return Err(invalid());
        }
        if !query_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid());
        }
        if specs.iter().any(|s| s.query_type == query_type) {
            return Err(ServerError::Config(format!(
                "duplicate query type '{query_type}' in QUERY_SOURCES"
            )));
        }
        specs.push(SourceSpec {
            query_type: query_type.to_string(),
            provider: provider.trim().to_string(),
            url: url.trim().to_string(),
        });
    }
    Ok(specs)
}

/// Price of one gated route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePrice {
    /// Human-readable price, e.g. `"$0.00005"`.
    pub price: String,
    /// Minor units.
    pub amount: U256,
    pub description: Option<String>,
}

/// Priced routes, keyed by `"METHOD /path"`.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub pay_to: Address,
    pub routes: HashMap<String, RoutePrice>,
}

impl RouteConfig {
    pub fn get_route(&self, method: &str, path: &str) -> Option<&RoutePrice> {
        self.routes.get(&format!("{method} {path}"))
    }
}

/// Builder for a [`RouteConfig`]. Prices are parsed with integer-only
/// arithmetic; the first bad price is reported by [`RouteConfigBuilder::build`].
pub struct RouteConfigBuilder {
    pay_to: Address,
    decimals: u32,
    routes: HashMap<String, RoutePrice>,
    error: Option<X402Error>,
}

impl RouteConfigBuilder {
    pub fn new(pay_to: Address, decimals: u32) -> Self {
        Self {
            pay_to,
            decimals,
            routes: HashMap::new(),
            error: None,
        }
    }

    /// Register a priced route (e.g. `route("GET", "/api/query/security", "$0.00005", Some("..."))`).
    pub fn route(mut self, method: &str, path: &str, price: &str, description: Option<&str>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match parse_price(price, self.decimals) {
            Ok(amount) => {
                self.routes.insert(
                    format!("{method} {path}"),
                    RoutePrice {
                        price: price.to_string(),
                        amount: U256::from(amount),
                        description: description.map(String::from),
                    },
                );
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn build(self) -> Result<RouteConfig, ServerError> {
        if let Some(e) = self.error {
            return Err(ServerError::Config(e.to_string()));
        }
        Ok(RouteConfig {
            pay_to: self.pay_to,
            routes: self.routes,
        })
    }
}
