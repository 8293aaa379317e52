pub use config_settings::*;

mod config_settings;
