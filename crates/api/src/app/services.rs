//! Service wiring: stores, the live enforcer and the assignment service.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use warden_auth::{PolicyEnforcer, RouteRegistry, SnapshotEnforcer};
use warden_infra::{
    load_enforcer, run_migrations, AccessControl, DirectoryError, DirectoryStore,
    InMemoryDirectory, InMemoryPolicyStore, PolicyStore, PolicyStoreError, PostgresDirectory,
    PostgresPolicyStore,
};

use crate::app::{routes, seed};
use crate::config::ApiConfig;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("migrations failed: {0}")]
    Migrate(#[source] sqlx::Error),

    #[error("failed to load policies: {0}")]
    Policies(#[from] PolicyStoreError),

    #[error("failed to seed directory: {0}")]
    Seed(#[from] DirectoryError),
}

pub struct AppServices {
    pub access: AccessControl,
    pub directory: Arc<dyn DirectoryStore>,
    pub enforcer: Arc<dyn PolicyEnforcer>,
    pub registry: Arc<RouteRegistry>,
}

impl AppServices {
    /// Wire services over existing stores with an already loaded enforcer.
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        directory: Arc<dyn DirectoryStore>,
        enforcer: Arc<dyn PolicyEnforcer>,
    ) -> Self {
        let registry = Arc::new(routes::registry());
        let access = AccessControl::new(
            policies,
            directory.clone(),
            enforcer.clone(),
            registry.clone(),
        );
        Self {
            access,
            directory,
            enforcer,
            registry,
        }
    }

    /// Empty in-memory stores and an empty enforcer. Nothing is seeded.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(SnapshotEnforcer::new()),
        )
    }

    async fn from_stores(
        policies: Arc<dyn PolicyStore>,
        directory: Arc<dyn DirectoryStore>,
    ) -> Result<Self, StartupError> {
        let enforcer = load_enforcer(policies.as_ref()).await?;
        Ok(Self::new(policies, directory, Arc::new(enforcer)))
    }
}

/// Build services for the configured backend, then seed the admin account.
pub async fn build_services(config: &ApiConfig) -> Result<AppServices, StartupError> {
    let services = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .map_err(StartupError::Connect)?;
            run_migrations(&pool).await.map_err(StartupError::Migrate)?;
            tracing::info!("using postgres stores");

            AppServices::from_stores(
                Arc::new(PostgresPolicyStore::new(pool.clone())),
                Arc::new(PostgresDirectory::new(pool)),
            )
            .await?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (state is lost on restart)");
            AppServices::from_stores(
                Arc::new(InMemoryPolicyStore::new()),
                Arc::new(InMemoryDirectory::new()),
            )
            .await?
        }
    };

    seed::ensure_admin(services.directory.as_ref(), &config.admin_username).await?;
    Ok(services)
}
