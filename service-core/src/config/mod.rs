use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::de::DeserializeOwned;

/// Load a service configuration from an optional `configuration.*` file
/// overlaid with `<PREFIX>__`-separated environment variables.
pub fn load<T: DeserializeOwned>(env_prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix(env_prefix).separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}
