use std::env;

/// Environment-backed configuration, loaded once at startup.
///
/// Defaults mirror the original service's `getEnv(key, default)` fallbacks.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// "debug" or "release" — gates JSON vs. human-readable log output.
    pub app_mode: String,
    /// Base URL of the upstream session-validating auth service.
    pub auth_base_url: String,
    /// Redis connection URI (`redis://` or `rediss://`, may carry credentials).
    pub redis_uri: String,
    /// Bearer credential required on `GET /health`. `None` disables the route.
    pub admin_password: Option<String>,
    /// Allowed WebSocket/CORS origins. Empty means "allow all non-browser
    /// clients only" (i.e. requests without an `Origin` header).
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Config {
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "8080").parse().unwrap_or(8080),
            app_mode: env_or("AppMode", "debug"),
            auth_base_url: env_or("DotnetApiUrl", "http://localhost:5005"),
            redis_uri: env_or("RedisURI", "redis://localhost:6379"),
            admin_password: env::var("AdminPassword").ok().filter(|s| !s.is_empty()),
            allowed_origins: env::var("AllowedOrigins")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost".to_owned())
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_release(&self) -> bool {
        self.app_mode == "release"
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}
