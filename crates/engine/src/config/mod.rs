//! Configuration management for ratewatch.
//! This module handles parsing, validation, and interpolation of the
//! ~/.config/ratewatch/config.json configuration file.

mod interpolation;
mod io;
mod model;
mod validation;

pub use interpolation::{InterpolationError, interpolate_config};
pub use io::{CONFIG_PATH_ENV, default_config_path, load_config, load_config_from_path, save_config_to_path};
pub use model::{
    BrowserConfig, BrowserDriverKind, ConfigError, DatedConfig, EgressConfig, EgressRouteConfig, InstrumentConfig, RatewatchConfig, RefresherConfig, RefresherTargetConfig,
    RetryConfig, SourceConfig, SourceKind,
};
pub use validation::{ValidationError, validate_config};
