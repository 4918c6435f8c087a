//! Configuration management for Dirigent.

mod settings;

pub use settings::{
    ComputeEndpoint, ComputeSettings, GeneralSettings, LlmSettings, RetentionSettings,
    ServerSettings, Settings, StoreSettings, UsageSettings,
};
