use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bfd::error::{BfdError, Result};
use bfd::server;
use bfd::settings::Settings;
use bfd::store::Datastore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load()?;
    let default_offset = settings.default_offset()?;
    let datastore = Datastore::new(settings.persistence_mode())?;
    for admin in &settings.site_admins {
        datastore.add_site_admin(admin)?;
    }

    let app = server::router(Arc::new(datastore), default_offset);
    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .map_err(|e| BfdError::Config(format!("cannot bind {}: {}", settings.listen, e)))?;
    info!(listen = %settings.listen, database = %settings.database, "bfd listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| BfdError::Config(e.to_string()))?;
    Ok(())
}
