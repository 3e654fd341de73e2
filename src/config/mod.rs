//! Configuration module for Metrica.
//!
//! Handles compiler, cache and execution settings and named data sources.

mod settings;

pub use settings::{
    expand_env_vars, parse_duration, CacheSettings, CompilerSettings, ConfigError,
    DataSourceSettings, ExecutionSettings, Settings,
};
