mod backoff;
mod cache;
mod config;
mod db;
mod errors;
mod geocode;
mod location;
mod post;
mod resolver;

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rusqlite::Connection as SqlConnection;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use backoff::{BackoffGuard, BackoffState, Clock, ManualClock, SystemClock};
pub use cache::{CachedLocation, LocationCache, SqliteLocationCache};
pub use config::{AppConfig, PublicAppConfig, DEFAULT_GEOCODE_ENDPOINT};
pub use db::{bootstrap, open_in_memory, DatabaseBootstrap, DatabaseContext};
pub use errors::{AppError, AppResult};
pub use geocode::{
    AddressComponent, Candidate, CandidateSet, GeocodeClient, GeocodeError, GeocodeProvider,
    GeocodedPlace, Geometry, HttpGeocodeProvider, LatLng,
};
pub use location::{LocationResult, OriginTag};
pub use post::{
    Argument, ArgumentStructure, Coordinates, Post, PostLocation, PostMetadata, Source,
    UserProfile,
};
pub use resolver::{LocationResolver, ResolutionStats};

/// Everything needed to locate posts, built from [`AppConfig`].
pub struct LocatorApp {
    config: AppConfig,
    db_path: PathBuf,
    db_recovered: bool,
    cache: Arc<SqliteLocationCache>,
    resolver: LocationResolver,
}

impl LocatorApp {
    pub fn from_env() -> AppResult<Self> {
        init_tracing();
        Self::initialize(AppConfig::from_env(), Arc::new(SystemClock))
    }

    pub fn initialize(config: AppConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let DatabaseBootstrap {
            context: DatabaseContext { connection, path },
            recovered,
        } = bootstrap(&config.data_dir, &config.database_file_name)?;
        let db: Arc<Mutex<SqlConnection>> = Arc::new(Mutex::new(connection));
        let cache = Arc::new(SqliteLocationCache::new(db));
        let geocoder = GeocodeClient::from_config(&config, clock)?;
        let resolver = LocationResolver::new(cache.clone(), geocoder);

        info!(
            path = %path.display(),
            recovered,
            geocoding = resolver.geocoder().is_enabled(),
            use_cache = config.location_cache_enabled,
            "post locator initialized"
        );

        Ok(Self {
            config,
            db_path: path,
            db_recovered: recovered,
            cache,
            resolver,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn db_recovered(&self) -> bool {
        self.db_recovered
    }

    pub fn cache(&self) -> &SqliteLocationCache {
        &self.cache
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    /// Resolves one post using the configured cache setting.
    pub async fn locate(&self, post: Post) -> Post {
        self.resolver
            .resolve(post, self.config.location_cache_enabled)
            .await
    }

    pub async fn locate_batch(&self, posts: Vec<Post>) -> (Vec<Post>, ResolutionStats) {
        self.resolver
            .resolve_batch(posts, self.config.location_cache_enabled, None)
            .await
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,post_locator=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
