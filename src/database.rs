use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    logger::*,
    schema::api_firewall_allowlist::{self as allowlist_schema, dsl::api_firewall_allowlist, table as allowlist_table},
};
use diesel::{
    Connection, RunQueryDsl, SqliteConnection,
    connection::SimpleConnection,
    prelude::*,
    r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection},
    result::DatabaseErrorKind,
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use rocket::{
    Phase, Request, Rocket,
    http::Status,
    request::{FromRequest, Outcome},
};
use rocket_sync_db_pools::diesel;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type FirewallDbInner = PooledConnection<ConnectionManager<SqliteConnection>>;
type FirewallDbPoolInner = Pool<ConnectionManager<SqliteConnection>>;

/// Scoped database access. Holds one pooled connection and one semaphore
/// permit, both released when the guard is dropped.
pub struct FirewallDb {
    conn: Arc<Mutex<Option<FirewallDbInner>>>,
    permit: Option<OwnedSemaphorePermit>,
}

// Models

#[derive(Queryable, Selectable, Serialize, Clone, Debug)]
#[diesel(table_name = crate::schema::api_firewall_allowlist)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AllowlistEntry {
    pub ip_address: String,
    pub created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::api_firewall_allowlist)]
struct NewAllowlistEntry<'a> {
    pub ip_address: &'a str,
    pub created_at: i64,
}

#[derive(Error, Debug)]
pub enum FirewallDbError {
    #[error("diesel error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("row already exists")]
    Conflict,
}

// Main database impl

impl FirewallDb {
    pub async fn get_one<P: Phase>(rocket: &Rocket<P>) -> Result<FirewallDb, Status> {
        match rocket.state::<FirewallDbPool>() {
            Some(p) => match p.get_one().await {
                Ok(conn) => Ok(conn),
                _ => Err(Status::ServiceUnavailable),
            },

            None => Err(Status::InternalServerError),
        }
    }

    pub async fn run<R, F: FnOnce(&mut SqliteConnection) -> R>(&self, f: F) -> R {
        let conn = self.conn.clone();
        let mut conn = conn.lock_owned().await;

        let pconn = conn.as_mut().expect("self.connection should be Some");
        tokio::task::block_in_place(move || f(pconn))
    }

    /// Full allowlist rows, in storage order. Callers must not rely on any
    /// particular ordering.
    pub async fn allowlist_entries(&self) -> Result<Vec<AllowlistEntry>, FirewallDbError> {
        let entries = self
            .run(|conn| api_firewall_allowlist.select(AllowlistEntry::as_select()).load(conn))
            .await?;

        Ok(entries)
    }

    pub async fn allowlist_contains(&self, ip: &str) -> Result<bool, FirewallDbError> {
        let entry = self
            .run(|conn| {
                api_firewall_allowlist
                    .find(ip)
                    .select(AllowlistEntry::as_select())
                    .first(conn)
                    .optional()
            })
            .await?;

        Ok(entry.is_some())
    }

    /// Membership-only view of the allowlist, used by the decision path so it
    /// never materializes timestamps.
    pub async fn allowlist_ip_addresses(&self) -> Result<HashSet<String>, FirewallDbError> {
        let ips = self
            .run(|conn| api_firewall_allowlist.select(allowlist_schema::ip_address).load::<String>(conn))
            .await?;

        Ok(ips.into_iter().collect())
    }

    /// Inserts a new allowlist row stamped with the current time. The primary
    /// key on `ip_address` makes this fail with [`FirewallDbError::Conflict`]
    /// when the address is already present, regardless of any pre-check the
    /// caller may have done.
    pub async fn insert_allowlist_entry(&self, ip: &str) -> Result<AllowlistEntry, FirewallDbError> {
        let created_at = unix_timestamp();

        let result = self
            .run(|conn| {
                let entry = NewAllowlistEntry {
                    ip_address: ip,
                    created_at,
                };

                diesel::insert_into(allowlist_table)
                    .values(&entry)
                    .returning(AllowlistEntry::as_returning())
                    .get_result(conn)
            })
            .await;

        match result {
            Ok(entry) => Ok(entry),
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(FirewallDbError::Conflict)
            }
            Err(err) => Err(FirewallDbError::Database(err)),
        }
    }

    /// Removes an allowlist row. Returns whether a row was actually deleted;
    /// a missing row is not an error.
    pub async fn delete_allowlist_entry(&self, ip: &str) -> Result<bool, FirewallDbError> {
        let deleted = self
            .run(|conn| diesel::delete(api_firewall_allowlist.find(ip)).execute(conn))
            .await?;

        Ok(deleted > 0)
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

// Migrations

pub fn do_run_migrations(url: &str) -> Result<(), diesel::ConnectionError> {
    debug!("Running migrations");

    let mut conn = SqliteConnection::establish(url)?;

    // also turn off wal
    diesel::sql_query("PRAGMA journal_mode=DELETE;")
        .execute(&mut conn)
        .expect("Failed to turn off WAL");

    match conn.run_pending_migrations(MIGRATIONS).map(|v| v.len()) {
        Ok(migs) if migs != 0 => {
            info!("Applied {migs} migrations!");
        }

        Ok(_) => {}

        Err(err) => {
            error!("Failed to apply migrations: {err}");
            panic!("failed to apply migrations");
        }
    }

    Ok(())
}

// Boring setup stuff
// reference: https://github.com/dani-garcia/vaultwarden/blob/main/src/db/mod.rs

pub async fn run_blocking<F, R>(job: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(ret) => ret,
        Err(e) => match e.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(_) => unreachable!("spawn_blocking tasks are never cancelled"),
        },
    }
}

#[derive(Debug)]
pub struct FirewallDbOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for FirewallDbOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA synchronous = NORMAL;")
            .map_err(r2d2::Error::QueryError)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FirewallDbPool {
    pool: Option<FirewallDbPoolInner>,
    semaphore: Arc<Semaphore>,
}

impl Drop for FirewallDb {
    fn drop(&mut self) {
        let conn = self.conn.clone();
        let permit = self.permit.take();

        tokio::task::spawn_blocking(move || {
            let mut conn = tokio::runtime::Handle::current().block_on(conn.lock_owned());

            if let Some(conn) = conn.take() {
                drop(conn);
            }

            drop(permit);
        });
    }
}

impl FirewallDbPool {
    pub fn from_url(database_url: &str) -> Result<Self, &'static str> {
        if let Err(err) = do_run_migrations(database_url) {
            warn!("Error running migrations: {err}");
            return Err("failed to apply migrations!");
        }

        let manager = ConnectionManager::new(database_url);
        let pool = Pool::builder()
            .connection_timeout(Duration::from_secs(10))
            .connection_customizer(Box::new(FirewallDbOptions))
            .build(manager)
            .map_err(|_| "Failed to create pool")?;

        Ok(FirewallDbPool {
            pool: Some(pool),
            semaphore: Arc::new(Semaphore::new(10)),
        })
    }

    pub async fn get_one(&self) -> Result<FirewallDb, &'static str> {
        let duration = Duration::from_secs(10);
        let permit = match tokio::time::timeout(duration, self.semaphore.clone().acquire_owned()).await {
            Ok(p) => p.expect("semaphore should be open"),
            Err(_) => {
                return Err("timeout waiting for database connection");
            }
        };

        let pool = self.pool.as_ref().expect("pool should exist").clone();
        let c = run_blocking(move || pool.get_timeout(duration))
            .await
            .map_err(|_| "error retrieving connection from the pool")?;

        Ok(FirewallDb {
            conn: Arc::new(Mutex::new(Some(c))),
            permit: Some(permit),
        })
    }
}

impl Drop for FirewallDbPool {
    fn drop(&mut self) {
        let pool = self.pool.take();
        tokio::task::spawn_blocking(move || drop(pool));
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for FirewallDb {
    type Error = ();
    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match FirewallDb::get_one(request.rocket()).await {
            Ok(conn) => Outcome::Success(conn),
            Err(status) => Outcome::Error((status, ())),
        }
    }
}
