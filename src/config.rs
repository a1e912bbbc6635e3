use std::env::{self, VarError};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbConn, DbErr, Schema};
use tracing::{info, instrument, warn};
use url::Url;

use crate::orm::{analytics, short_url};

/// # Errors
/// Will return [`Err`] if the connection to the database or the schema setup fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!(?db_connection_options, "Connecting to database");
    let db = Database::connect(db_connection_options).await?;
    setup_schema(&db).await?;
    set_db_conn(db);

    info!("Container initialized");
    Ok(container)
}

/// Creates the `urls` and `analytics` tables if they do not exist yet.
///
/// # Errors
/// Will return [`Err`] if the database rejects a statement.
#[instrument(skip(db))]
pub async fn setup_schema(db: &DbConn) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    for mut create_table in [
        schema.create_table_from_entity(short_url::Entity),
        schema.create_table_from_entity(analytics::Entity),
    ] {
        create_table.if_not_exists();
        let statement = backend.build(&create_table);
        db.execute_unprepared(&statement.sql).await?;
    }
    Ok(())
}

/// # Panics
/// Panics when environment variable is not set or is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    const ENV_VAR_NAME: &str = "DB_URL";
    env::var(ENV_VAR_NAME)
        .unwrap_or_else(|err| match err {
            VarError::NotPresent => panic!("{ENV_VAR_NAME} is not set"),
            VarError::NotUnicode(actual) => {
                panic!("{ENV_VAR_NAME} is invalid unicode: {}", actual.display());
            }
        })
        .into()
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ADDR";
    const DEFAULT_ADDR: &str = "127.0.0.1:0";

    optional_env_var(ENV_VAR_NAME).map_or_else(
        || {
            warn!(
                addr = DEFAULT_ADDR,
                "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_ADDR}"
            );
            DEFAULT_ADDR.to_owned()
        },
        |addr| {
            info!(addr, "{ENV_VAR_NAME} environment variable set");
            addr
        },
    )
}

/// Base that short tokens are appended to when building short URLs.
///
/// # Panics
/// Panics when environment variable is invalid or is not an absolute URL.
pub fn public_base_url_capsule(_: CapsuleHandle) -> Url {
    const ENV_VAR_NAME: &str = "PUBLIC_BASE_URL";
    const DEFAULT_PUBLIC_BASE_URL: &str = "https://short.ly/";

    let raw = optional_env_var(ENV_VAR_NAME).unwrap_or_else(|| {
        warn!(
            public_base_url = DEFAULT_PUBLIC_BASE_URL,
            "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_PUBLIC_BASE_URL}"
        );
        DEFAULT_PUBLIC_BASE_URL.to_owned()
    });
    parse_public_base_url(&raw).unwrap_or_else(|err| {
        panic!("{ENV_VAR_NAME} environment variable is not a valid base URL: {err}")
    })
}

/// Expiry applied to new links when the request does not specify one.
///
/// # Panics
/// Panics when environment variable is invalid or not a positive number.
pub fn default_expiry_hours_capsule(_: CapsuleHandle) -> f64 {
    default_expiry_hours(optional_env_var(DEFAULT_EXPIRY_HOURS_ENV_VAR).as_deref())
}

const DEFAULT_EXPIRY_HOURS_ENV_VAR: &str = "DEFAULT_EXPIRY_HOURS";

fn default_expiry_hours(raw: Option<&str>) -> f64 {
    const ENV_VAR_NAME: &str = DEFAULT_EXPIRY_HOURS_ENV_VAR;
    const DEFAULT_EXPIRY_HOURS: f64 = 24.0;

    let Some(raw) = raw else {
        warn!(
            hours = DEFAULT_EXPIRY_HOURS,
            "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_EXPIRY_HOURS}"
        );
        return DEFAULT_EXPIRY_HOURS;
    };
    match raw.parse::<f64>() {
        Ok(hours) if hours.is_finite() && hours > 0.0 => {
            info!(hours, "{ENV_VAR_NAME} environment variable set");
            hours
        }
        _ => panic!("{ENV_VAR_NAME} environment variable must be a positive number, got {raw}"),
    }
}

/// Parses `raw` and ensures its path ends in `/`, so that joining a token
/// appends to the path instead of replacing its last segment.
///
/// # Errors
/// Will return [`Err`] if `raw` is not an absolute URL that can carry a path.
pub fn parse_public_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(raw)?;
    if base.cannot_be_a_base() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn optional_env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is invalid: {}", actual.display());
        }
    }
}
