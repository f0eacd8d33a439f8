mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{
    BrokerSettings, DiscoverySettings, HttpSettings, LogSettings, Settings, TcpSettings,
};


/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing all sections
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available, then fill the gaps with defaults
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::from_partial(partial))
}
