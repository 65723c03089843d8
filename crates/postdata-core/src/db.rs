use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};

use crate::config::{DatabaseSettings, DatabaseTarget};

pub type DbPool = Pool<Postgres>;

/// Builds a lazily-connecting pool for the routing database.
///
/// No connection is opened here, so an unreachable database surfaces as a
/// failed lookup for each row instead of aborting the batch at startup.
pub fn connect(settings: &DatabaseSettings) -> Result<DbPool, sqlx::Error> {
    let options = connect_options(&settings.target)?;
    Ok(PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(settings.acquire_timeout)
        .connect_lazy_with(options))
}

fn connect_options(target: &DatabaseTarget) -> Result<PgConnectOptions, sqlx::Error> {
    match target {
        DatabaseTarget::Url(url) => url.expose().parse::<PgConnectOptions>(),
        DatabaseTarget::Parts {
            host,
            port,
            database,
            user,
            password,
        } => {
            let mut options = PgConnectOptions::new().host(host).database(database);
            if let Some(port) = port {
                options = options.port(*port);
            }
            if let Some(user) = user {
                options = options.username(user);
            }
            if let Some(password) = password {
                options = options.password(password.expose());
            }
            Ok(options)
        }
    }
}
