//! Narrow views of the process configuration handed to the pipeline, so nothing past
//! `main` reads the environment.

use crate::config::Config;

/// Supplies the credential for the generative-text service.
pub trait SecretProvider: Send + Sync {
    /// `None` when no credential is configured; requests then go out unauthenticated.
    fn quote_api_key(&self) -> Option<String>;
}

/// Supplies the site name used for readings that do not carry one.
pub trait SiteNameProvider: Send + Sync {
    fn site_name(&self) -> String;
}

impl SecretProvider for Config {
    fn quote_api_key(&self) -> Option<String> {
        self.quote.api_key.clone().filter(|key| !key.is_empty())
    }
}

impl SiteNameProvider for Config {
    fn site_name(&self) -> String {
        self.site_name.clone()
    }
}

/// A fixed secret, for tests and tools that already hold the key.
pub struct StaticSecret(pub Option<String>);

impl SecretProvider for StaticSecret {
    fn quote_api_key(&self) -> Option<String> {
        self.0.clone()
    }
}

impl SiteNameProvider for str {
    fn site_name(&self) -> String {
        self.to_owned()
    }
}
