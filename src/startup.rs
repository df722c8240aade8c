use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ensure_admin, spawn_sweeper, AuthService, SweeperHandle};
use crate::configuration::{DatabaseSettings, Settings};
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::RequireAccessToken;
use crate::routes::{login, logout, logout_all, me, refresh, register};
use crate::security::SecurityHeaders;
use crate::store::{
    InMemoryPrincipalStore, InMemoryRefreshTokenStore, PgPrincipalStore, PgRefreshTokenStore,
    PrincipalRepository, RefreshTokenRepository,
};

type Repositories = (Arc<dyn PrincipalRepository>, Arc<dyn RefreshTokenRepository>);

/// A bound server plus the background sweep it owns
pub struct Application {
    port: u16,
    server: Server,
    sweeper: SweeperHandle,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        let (principals, refresh_repo) = match &settings.database {
            Some(database) => postgres_repositories(database).await?,
            None => {
                tracing::warn!("No database configured; using the in-memory store");
                in_memory_repositories()
            }
        };

        if let Some(admin) = &settings.admin {
            ensure_admin(principals.as_ref(), admin, settings.password.hash_cost).await?;
        }

        let auth = AuthService::new(&settings, principals, refresh_repo).await?;
        let sweeper = spawn_sweeper(
            auth.refresh_tokens(),
            auth.limiter(),
            Duration::from_secs(settings.application.purge_interval_seconds.max(1)),
        );

        let address = format!("{}:{}", settings.application.host, settings.application.port);
        let listener = TcpListener::bind(&address)
            .map_err(|e| AppError::Internal(format!("Failed to bind {}: {}", address, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AppError::Internal(format!("Failed to read local address: {}", e)))?
            .port();
        tracing::info!(address = %address, port = port, "Server listening");

        let server = run(listener, web::Data::new(auth))
            .map_err(|e| AppError::Internal(format!("Failed to start server: {}", e)))?;

        Ok(Self {
            port,
            server,
            sweeper,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until the server shuts down, then stop the sweeper
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let result = self.server.await;
        self.sweeper.stop().await;
        result
    }
}

async fn postgres_repositories(database: &DatabaseSettings) -> Result<Repositories, AppError> {
    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database.connection_string())
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
    tracing::info!("Database connection pool created and migrated");

    Ok((
        Arc::new(PgPrincipalStore::new(pool.clone())),
        Arc::new(PgRefreshTokenStore::new(pool)),
    ))
}

fn in_memory_repositories() -> Repositories {
    (
        Arc::new(InMemoryPrincipalStore::new()),
        Arc::new(InMemoryRefreshTokenStore::new()),
    )
}

pub fn run(listener: TcpListener, auth: web::Data<AuthService>) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(SecurityHeaders::middleware())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(auth.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                tracing::debug!(error = %err, "Rejected request body");
                AppError::from(ValidationError::MalformedBody).into()
            }))

            .service(
                web::scope("/api/auth")
                    // Public routes
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .route("/register", web::post().to(register))

                    // Protected routes (require an access token)
                    .service(
                        web::resource("/logout-all")
                            .route(web::post().to(logout_all))
                            .wrap(RequireAccessToken),
                    )
                    .service(
                        web::resource("/me")
                            .route(web::get().to(me))
                            .wrap(RequireAccessToken),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
