//! Configuration interpolation for environment variables and secrets.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::{EgressRouteConfig, RatewatchConfig};

static SERVICE: &str = "ratewatch";

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{env:([\w+_-]*)}").expect("env placeholder regex should compile"));
static SECRET_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{secret:([\w.+_-]*)}").expect("secret placeholder regex should compile"));

/// Interpolate environment variables and secrets in egress routes.
pub fn interpolate_config(config: &mut RatewatchConfig) -> Result<(), InterpolationError> {
    for (index, route) in config.egress.routes.iter_mut().enumerate() {
        interpolate_route(route)?;
        debug!(route = index, "Interpolated egress route");
    }
    Ok(())
}

fn interpolate_route(route: &mut EgressRouteConfig) -> Result<(), InterpolationError> {
    route.server = interpolate_string(&route.server)?;
    if let Some(username) = &mut route.username {
        *username = interpolate_string(username)?;
    }
    if let Some(password) = &mut route.password {
        *password = interpolate_string(password)?;
    }
    Ok(())
}

/// Interpolate a string value, replacing ${env:NAME} and ${secret:NAME} patterns.
fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut resolved = Vec::new();
    for cap in ENV_PLACEHOLDER.captures_iter(value) {
        let var_name = cap[1].to_string();
        let env_value = std::env::var(&var_name).map_err(|_| InterpolationError::MissingEnvVar { name: var_name.clone() })?;
        debug!("Interpolated env var: {} -> [REDACTED]", var_name);
        resolved.push((cap[0].to_string(), env_value));
    }

    for cap in SECRET_PLACEHOLDER.captures_iter(value) {
        let secret_name = cap[1].to_string();
        let secret_value = resolve_secret(&secret_name)?;
        debug!("Interpolated secret: {} -> [REDACTED]", secret_name);
        resolved.push((cap[0].to_string(), secret_value));
    }

    let mut result = value.to_string();
    for (placeholder, replacement) in resolved {
        result = result.replace(&placeholder, &replacement);
    }
    Ok(result)
}

/// Resolve a secret from the OS keychain.
fn resolve_secret(name: &str) -> Result<String, InterpolationError> {
    let keyring = keyring::Entry::new(SERVICE, name).map_err(|e| InterpolationError::KeyringError {
        name: name.to_string(),
        error: e.to_string(),
    })?;

    keyring.get_password().map_err(|e| InterpolationError::MissingSecret {
        name: name.to_string(),
        error: e.to_string(),
    })
}

/// Errors that can occur during interpolation.
#[derive(Debug, Error, Clone)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },

    #[error("Missing secret: {name} - {error}")]
    MissingSecret { name: String, error: String },

    #[error("Keyring error for {name}: {error}")]
    KeyringError { name: String, error: String },
}
