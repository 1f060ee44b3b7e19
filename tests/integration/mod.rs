//! Integration tests for the Nexa agent runtime

mod flood_protection;
mod provider_http;
mod runtime_lifecycle;
mod settings_fallback;
