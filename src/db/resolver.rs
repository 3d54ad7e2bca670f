//! Connection parameters from environment variables.
//!
//! A logical database `name` maps to variables prefixed `{NAME}_DB`. Each
//! setting is probed from a short list of candidates, most specific first,
//! with shared `RDS_DB_*` and `DEV_DB_*` fallbacks. Read-only work prefers
//! the replica variables when they are set.

use crate::cache::ProcessCache;
use crate::config::{EnvSource, ProcessEnv};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, Intent};
use tracing::debug;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Ambient HTTP method used to infer intent when none is given.
pub const REQUEST_METHOD_VAR: &str = "REQUEST_METHOD";

const PRODUCTION_STAGES: &[&str] = &["staging", "production"];

/// Per-call routing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Use the replica regardless of request method.
    pub read_only: bool,
    /// Use the primary regardless of anything else.
    pub force_write: bool,
    /// Overrides the ambient `REQUEST_METHOD`.
    pub request_method: Option<String>,
}

impl ResolveOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn write() -> Self {
        Self {
            force_write: true,
            ..Self::default()
        }
    }

    pub fn with_request_method(mut self, method: impl Into<String>) -> Self {
        self.request_method = Some(method.into());
        self
    }
}

/// Supplies a complete profile for a logical name, bypassing the environment.
pub trait ProfileSource: Send + Sync {
    fn profile(&self, name: &str) -> DbResult<ConnectionProfile>;
}

impl<F> ProfileSource for F
where
    F: Fn(&str) -> DbResult<ConnectionProfile> + Send + Sync,
{
    fn profile(&self, name: &str) -> DbResult<ConnectionProfile> {
        self(name)
    }
}

pub struct ConnectionResolver<E = ProcessEnv> {
    env: E,
    override_source: Option<Box<dyn ProfileSource>>,
}

impl ConnectionResolver<ProcessEnv> {
    pub fn from_process_env() -> Self {
        Self::new(ProcessEnv)
    }
}

impl<E: EnvSource> ConnectionResolver<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            override_source: None,
        }
    }

    /// Register a source that takes precedence over the environment.
    pub fn with_override(mut self, source: impl ProfileSource + 'static) -> Self {
        self.override_source = Some(Box::new(source));
        self
    }

    /// Read or write intent for these options.
    pub fn intent(&self, options: &ResolveOptions) -> Intent {
        if options.force_write {
            return Intent::ReadWrite;
        }
        if options.read_only {
            return Intent::ReadOnly;
        }
        options
            .request_method
            .clone()
            .or_else(|| self.env.non_empty(REQUEST_METHOD_VAR))
            .map(|method| Intent::from_request_method(&method))
            .unwrap_or_default()
    }

    /// True on staging and production deployments.
    pub fn is_production(&self) -> bool {
        self.env
            .non_empty("ENV")
            .or_else(|| self.env.non_empty("_DOCKER_ENV"))
            .is_some_and(|stage| {
                PRODUCTION_STAGES
                    .iter()
                    .any(|p| stage.eq_ignore_ascii_case(p))
            })
    }

    /// Physical database name for a logical one.
    pub fn database_name(&self, name: &str) -> String {
        if let Some(explicit) = self.env.non_empty(&format!("{}_NAME", prefix(name))) {
            return explicit;
        }
        let production = self.is_production();
        match (name, production) {
            ("go1", true) => "gc_go1".to_string(),
            ("go1", false) => "dev_go1".to_string(),
            (_, true) => format!("{}_prod", name),
            (_, false) => format!("{}_dev", name),
        }
    }

    /// Resolve the profile for `name`.
    pub fn resolve(&self, name: &str, options: &ResolveOptions) -> DbResult<ConnectionProfile> {
        if name.is_empty() {
            return Err(DbError::invalid_input("Database name cannot be empty"));
        }
        if let Some(source) = &self.override_source {
            debug!(name, "Resolving connection profile from override");
            return source.profile(name);
        }

        let p = prefix(name);
        let replica = self.intent(options).is_read_only();

        let mut hosts = vec![format!("{p}_HOST"), "RDS_DB_HOST".into(), "DEV_DB_HOST".into()];
        let mut users = vec![
            format!("{p}_USERNAME"),
            "RDS_DB_USERNAME".into(),
            "DEV_DB_USERNAME".into(),
        ];
        let mut passwords = vec![
            format!("{p}_PASSWORD"),
            "RDS_DB_PASSWORD".into(),
            "DEV_DB_PASSWORD".into(),
        ];
        if replica {
            hosts.insert(0, format!("{p}_SLAVE"));
            users.insert(0, format!("{p}_USERNAME_SLAVE"));
            passwords.insert(0, format!("{p}_PASSWORD_SLAVE"));
        }
        let ports = [format!("{p}_PORT"), "RDS_DB_PORT".to_string()];

        let host = self
            .first_set(&hosts)
            .ok_or_else(|| DbError::configuration(format!("No host for '{}'", name), hosts))?;
        let user = self
            .first_set(&users)
            .ok_or_else(|| DbError::configuration(format!("No user for '{}'", name), users))?;
        let password = self.first_set(&passwords).unwrap_or_default();
        let port = match self.first_set(&ports) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                DbError::configuration(format!("Invalid port '{}' for '{}'", raw, name), ports.to_vec())
            })?,
            None => DEFAULT_MYSQL_PORT,
        };

        let profile = ConnectionProfile {
            name: name.to_string(),
            host,
            user,
            password,
            port,
            database: self.database_name(name),
            is_replica: replica,
        };
        debug!(
            name,
            host = %profile.host,
            database = %profile.database,
            replica,
            "Resolved connection profile"
        );
        Ok(profile)
    }

    /// [`resolve`](Self::resolve), memoized per name and intent in `cache`.
    pub fn resolve_cached(
        &self,
        cache: &ProcessCache<ConnectionProfile>,
        name: &str,
        options: &ResolveOptions,
    ) -> DbResult<ConnectionProfile> {
        let key = match self.intent(options) {
            Intent::ReadOnly => format!("{name}:read"),
            Intent::ReadWrite => format!("{name}:write"),
        };
        cache.try_get_or_insert_with(&key, || self.resolve(name, options))
    }

    fn first_set(&self, candidates: &[String]) -> Option<String> {
        candidates.iter().find_map(|key| self.env.non_empty(key))
    }
}

fn prefix(name: &str) -> String {
    format!("{}_DB", name.to_uppercase())
}
