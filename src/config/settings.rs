use std::env;
use crate::error::AppError;
use crate::models::plan::{Plan, PlanLimits};

const MIN_HASH_SECRET_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct AppSettings {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub pdf_engine: PdfEngineConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

#[derive(Clone)]
pub struct SecurityConfig {
    pub api_key_hash_secret: String,
    pub admin_token: Option<String>,
    pub rapidapi_proxy_secret: Option<String>,
    /// `live` or `test`; embedded in issued key strings.
    pub key_environment: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("api_key_hash_secret", &"[REDACTED]")
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field("rapidapi_proxy_secret", &self.rapidapi_proxy_secret.as_ref().map(|_| "[REDACTED]"))
            .field("key_environment", &self.key_environment)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub basic: PlanLimits,
    pub pro: PlanLimits,
    pub enterprise: PlanLimits,
}

impl RateLimitConfig {
    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Basic => self.basic,
            Plan::Pro => self.pro,
            Plan::Enterprise => self.enterprise,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            basic: PlanLimits { max_requests: 100, window_secs: 3600 },
            pro: PlanLimits { max_requests: 1000, window_secs: 3600 },
            enterprise: PlanLimits { max_requests: 10000, window_secs: 3600 },
        }
    }
}

#[derive(Clone, Debug)]
pub struct PdfEngineConfig {
    pub base_url: url::Url,
    pub timeout_secs: u64,
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    expectation: &str,
) -> Result<T, AppError> {
    lookup(name)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{} must be {}", name, expectation)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        // App config
        let app_name = lookup("APP_NAME").unwrap_or_else(|| "pdf-gateway".to_string());
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        // Server config
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port: u16 = parse_var(&lookup, "SERVER_PORT", "8080", "a valid port number")?;

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_upload_size: usize =
            parse_var(&lookup, "MAX_UPLOAD_SIZE", "52428800", "a valid byte count")?;

        // Counting store
        let backend = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "redis".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => StoreBackend::Redis,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(AppError::Configuration(format!(
                    "STORE_BACKEND must be 'redis' or 'memory', got '{}'",
                    other
                )));
            }
        };

        let redis_url = non_empty(lookup("REDIS_URL"));
        if backend == StoreBackend::Redis && redis_url.is_none() {
            return Err(AppError::Configuration(
                "REDIS_URL must be set. Redis is required for rate limiting.".to_string(),
            ));
        }

        let key_prefix = lookup("REDIS_KEY_PREFIX").unwrap_or_else(|| "pdfgw".to_string());

        // Security
        let api_key_hash_secret = lookup("API_KEY_HASH_SECRET")
            .ok_or_else(|| AppError::Configuration("API_KEY_HASH_SECRET must be set".to_string()))?;
        if api_key_hash_secret.len() < MIN_HASH_SECRET_LEN {
            return Err(AppError::Configuration(format!(
                "API_KEY_HASH_SECRET must be at least {} characters long",
                MIN_HASH_SECRET_LEN
            )));
        }

        let admin_token = non_empty(lookup("ADMIN_TOKEN"));
        let rapidapi_proxy_secret = non_empty(lookup("RAPIDAPI_PROXY_SECRET"));

        let key_environment = lookup("KEY_ENVIRONMENT").unwrap_or_else(|| "test".to_string());
        if key_environment != "live" && key_environment != "test" {
            return Err(AppError::Configuration(
                "KEY_ENVIRONMENT must be 'live' or 'test'".to_string(),
            ));
        }

        // Rate limiting
        let default_window: u64 =
            parse_var(&lookup, "RATE_LIMIT_WINDOW_SECS", "3600", "a valid number")?;

        let plan_limits = |plan: Plan, default_max: &str| -> Result<PlanLimits, AppError> {
            let upper = plan.as_str().to_ascii_uppercase();
            let max_requests: u64 = parse_var(
                &lookup,
                &format!("RATE_LIMIT_{}", upper),
                default_max,
                "a valid number",
            )?;
            let window_secs: u64 = parse_var(
                &lookup,
                &format!("RATE_LIMIT_{}_WINDOW_SECS", upper),
                &default_window.to_string(),
                "a valid number",
            )?;
            if max_requests == 0 || window_secs == 0 {
                return Err(AppError::Configuration(format!(
                    "Rate limit for plan '{}' must have a positive limit and window",
                    plan
                )));
            }
            Ok(PlanLimits { max_requests, window_secs })
        };

        let rate_limit = RateLimitConfig {
            basic: plan_limits(Plan::Basic, "100")?,
            pro: plan_limits(Plan::Pro, "1000")?,
            enterprise: plan_limits(Plan::Enterprise, "10000")?,
        };

        // PDF engine
        let engine_url = lookup("PDF_ENGINE_URL")
            .ok_or_else(|| AppError::Configuration("PDF_ENGINE_URL must be set".to_string()))?;
        let base_url = url::Url::parse(&engine_url)
            .map_err(|e| AppError::Configuration(format!("PDF_ENGINE_URL is invalid: {}", e)))?;
        let timeout_secs: u64 =
            parse_var(&lookup, "PDF_ENGINE_TIMEOUT_SECS", "120", "a valid number")?;

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
                max_upload_size,
            },
            store: StoreConfig {
                backend,
                redis_url,
                key_prefix,
            },
            security: SecurityConfig {
                api_key_hash_secret,
                admin_token,
                rapidapi_proxy_secret,
                key_environment,
            },
            rate_limit,
            pdf_engine: PdfEngineConfig {
                base_url,
                timeout_secs,
            },
        })
    }
}

#[cfg(test)]
impl AppSettings {
    /// In-memory settings with optional overrides.
    pub(crate) fn for_tests(overrides: &[(&str, &str)]) -> Self {
        let mut vars: std::collections::HashMap<String, String> = [
            ("STORE_BACKEND", "memory"),
            ("API_KEY_HASH_SECRET", "0123456789abcdef0123456789abcdef"),
            ("PDF_ENGINE_URL", "http://127.0.0.1:9/"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }
        Self::from_lookup(|name| vars.get(name).cloned()).expect("test settings must be valid")
    }
}
