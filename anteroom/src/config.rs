//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `ANTEROOM_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `ANTEROOM_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `ANTEROOM_SESSION__COOKIE_NAME=my_session` sets the `session.cookie_name` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Routes**: `routes.*` - the protected prefix, the admin sub-prefix, and the redirect targets
//! - **Session**: `session.*` - session cookie name, flags and timeout
//! - **Security**: `cors` - CORS settings for browser clients

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::auth::policy::RoutePolicy;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ANTEROOM_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL where the dashboard is accessible (e.g., "https://app.example.com")
    pub dashboard_url: Url,
    /// Guarded route layout and redirect targets
    pub routes: RoutesConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Development seed accounts for the in-memory store
    pub seed_users: Vec<SeedUser>,
}

/// The route layout the admission policy is built from.
///
/// Redirect targets must themselves be admissible for whoever is sent
/// there; `Config::load` rejects layouts where a redirect chain could loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutesConfig {
    /// Path prefix under which every route is guarded
    pub protected_prefix: String,
    /// Sub-prefix reserved for the admin role
    pub admin_prefix: String,
    /// Where unauthenticated clients are sent
    pub sign_in_path: String,
    /// Landing page for the user role
    pub user_home: String,
    /// Landing page for the admin role
    pub admin_home: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            protected_prefix: "/dashboard".to_string(),
            admin_prefix: "/dashboard/admin".to_string(),
            sign_in_path: "/auth".to_string(),
            user_home: "/dashboard/user".to_string(),
            admin_home: "/dashboard/admin".to_string(),
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Session timeout duration
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            cookie_name: "anteroom_session".to_string(),
            cookie_secure: true,
            cookie_same_site: "strict".to_string(),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<String>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
}

/// An account created in the in-memory store on startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SeedUser {
    pub email: String,
    pub username: String,
    pub password: String,
    /// Durable profile role, "user" or "admin"
    #[serde(default = "default_seed_role")]
    pub role: String,
}

fn default_seed_role() -> String {
    "user".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3005,
            dashboard_url: Url::parse("http://localhost:3005").expect("static URL is valid"),
            routes: RoutesConfig::default(),
            session: SessionConfig::default(),
            cors: CorsConfig::default(),
            seed_users: Vec::new(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("ANTEROOM_").split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, path) in [
            ("routes.protected_prefix", &self.routes.protected_prefix),
            ("routes.admin_prefix", &self.routes.admin_prefix),
            ("routes.sign_in_path", &self.routes.sign_in_path),
            ("routes.user_home", &self.routes.user_home),
            ("routes.admin_home", &self.routes.admin_home),
        ] {
            if !path.starts_with('/') {
                anyhow::bail!("{name} must be an absolute path, got {path:?}");
            }
        }

        if !matches!(self.session.cookie_same_site.as_str(), "strict" | "lax" | "none") {
            anyhow::bail!(
                "session.cookie_same_site must be one of strict, lax, none; got {:?}",
                self.session.cookie_same_site
            );
        }

        for user in &self.seed_users {
            if !matches!(user.role.as_str(), "user" | "admin") {
                anyhow::bail!("seed user {} has unknown role {:?}", user.email, user.role);
            }
        }

        // Redirect targets must not loop back into a decision that redirects again.
        RoutePolicy::new(&self.routes).validate()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_env_overrides_nested_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ANTEROOM_PORT", "9000");
            jail.set_env("ANTEROOM_SESSION__COOKIE_NAME", "sid");
            jail.set_env("ANTEROOM_ROUTES__PROTECTED_PREFIX", "/app");
            jail.set_env("ANTEROOM_ROUTES__ADMIN_PREFIX", "/app/admin");
            jail.set_env("ANTEROOM_ROUTES__USER_HOME", "/app/user");
            jail.set_env("ANTEROOM_ROUTES__ADMIN_HOME", "/app/admin");

            let args = Args {
                config: "missing.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).expect("config should load");
            assert_eq!(config.port, 9000);
            assert_eq!(config.session.cookie_name, "sid");
            assert_eq!(config.routes.protected_prefix, "/app");
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_is_merged() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
port: 4000
session:
  cookie_name: yaml_session
  timeout: 1h
seed_users:
  - email: admin@example.com
    username: admin
    password: secret
    role: admin
"#,
            )?;
            let args = Args {
                config: "config.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).expect("config should load");
            assert_eq!(config.port, 4000);
            assert_eq!(config.session.cookie_name, "yaml_session");
            assert_eq!(config.session.timeout, Duration::from_secs(3600));
            assert_eq!(config.seed_users.len(), 1);
            assert_eq!(config.seed_users[0].role, "admin");
            Ok(())
        });
    }

    #[test]
    fn test_looping_redirect_targets_rejected() {
        let mut config = Config::default();
        config.routes.sign_in_path = "/dashboard/login".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_paths_rejected() {
        let mut config = Config::default();
        config.routes.user_home = "dashboard/user".to_string();
        assert!(config.validate().is_err());
    }
}
