use std::env;

use anyhow::{bail, Context, Result};

use crate::feed::DEFAULT_PAGE_SIZE;

pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Startup configuration, read once from the environment.
#[derive(Clone)]
pub struct AppConfig {
    pub bind: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub frontend_url: Option<String>,
    pub page_size: usize,
    pub jwt_secret: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("frontend_url", &self.frontend_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes long");
        }

        let port = match lookup("CAMPUS_PORT") {
            Some(p) => p.parse().with_context(|| format!("CAMPUS_PORT is not a port number: {p}"))?,
            None => 8080,
        };
        let page_size = match lookup("CAMPUS_PAGE_SIZE") {
            Some(n) => n.parse().with_context(|| format!("CAMPUS_PAGE_SIZE is not a number: {n}"))?,
            None => DEFAULT_PAGE_SIZE,
        };
        if page_size == 0 {
            bail!("CAMPUS_PAGE_SIZE must be positive");
        }

        Ok(Self {
            bind: lookup("CAMPUS_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            database_url: lookup("DATABASE_URL"),
            frontend_url: lookup("FRONTEND_URL"),
            page_size,
            jwt_secret,
        })
    }
}
