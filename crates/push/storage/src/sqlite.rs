//! SQLite storage implementation.

use std::time::Duration;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::models::*;
use crate::schema::push_registrations;
use crate::traits::*;
use crate::StorageError;
use push_core::{Owner, PublishOptions, ServiceAddress, StorageConfig};

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

/// Applies per-connection pragmas when the pool opens a connection.
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!(
            "PRAGMA busy_timeout = {}",
            self.busy_timeout.as_millis()
        ))
        .execute(conn)
        .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database URL with default pool settings.
    pub fn new(database_url: &str) -> Result<Self, StorageError> {
        Self::from_config(&StorageConfig {
            database_url: database_url.to_string(),
            ..Default::default()
        })
    }

    /// Create a new SQLite storage from configuration.
    ///
    /// The connection timeout bounds both pool checkout and lock waits.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let timeout = Duration::from_secs(config.connection_timeout_secs);
        let manager = ConnectionManager::<SqliteConnection>::new(&config.database_url);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(timeout)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: timeout,
            }))
            .build(manager)?;

        Ok(Self { pool })
    }

    /// Create a migrated in-memory database.
    ///
    /// Every SQLite connection to `:memory:` is a separate database, so the
    /// pool is limited to one connection.
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder().max_size(1).build(manager)?;

        let storage = Self { pool };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Run migrations.
    pub fn run_migrations(&self) -> Result<(), StorageError> {
        use diesel_migrations::MigrationHarness as _;

        let mut conn = self.conn()?;

        conn.run_pending_migrations(crate::MIGRATIONS)
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, StorageError> {
        Ok(self.pool.get()?)
    }
}

fn encode_options(options: &PublishOptions) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, options)?;
    Ok(buf)
}

fn decode_options(row: &RegistrationRow, raw: &[u8]) -> Option<PublishOptions> {
    match plist::from_bytes(raw) {
        Ok(options) => Some(options),
        Err(e) => {
            tracing::warn!(
                owner = %row.owner,
                service = %row.service,
                node = %row.node,
                error = %e,
                "unable to decode stored publish options, treating them as absent"
            );
            None
        }
    }
}

impl RegistrationStore for SqliteStorage {
    fn register(
        &self,
        owner: &Owner,
        service: &ServiceAddress,
        node: &str,
        options: Option<&PublishOptions>,
    ) -> Result<(), StorageError> {
        let encoded = options.map(encode_options).transpose()?;
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let new_registration = NewRegistration {
            owner: owner.as_str(),
            service: service.as_str(),
            node,
            publish_options: encoded.as_deref(),
            created_at: now,
        };

        // Re-enabling replaces the options, including clearing them.
        diesel::insert_into(push_registrations::table)
            .values(&new_registration)
            .on_conflict((
                push_registrations::owner,
                push_registrations::service,
                push_registrations::node,
            ))
            .do_update()
            .set((
                push_registrations::publish_options.eq(encoded.as_deref()),
                push_registrations::created_at.eq(now),
            ))
            .execute(&mut conn)?;

        tracing::debug!(owner = %owner, service = %service, node, "stored registration");

        Ok(())
    }

    fn deregister(&self, owner: &Owner, scope: &Deregistration) -> Result<usize, StorageError> {
        let mut conn = self.conn()?;
        let owned = push_registrations::table.filter(push_registrations::owner.eq(owner.as_str()));

        let removed = match scope {
            Deregistration::Node { service, node } => diesel::delete(
                owned
                    .filter(push_registrations::service.eq(service.as_str()))
                    .filter(push_registrations::node.eq(node)),
            )
            .execute(&mut conn)?,
            Deregistration::Service(service) => {
                diesel::delete(owned.filter(push_registrations::service.eq(service.as_str())))
                    .execute(&mut conn)?
            }
            Deregistration::All => diesel::delete(owned).execute(&mut conn)?,
        };

        tracing::debug!(owner = %owner, ?scope, removed, "removed registrations");

        Ok(removed)
    }

    fn registrations(&self, owner: &Owner) -> Result<ServiceNodes, StorageError> {
        let mut conn = self.conn()?;

        let rows: Vec<RegistrationRow> = push_registrations::table
            .filter(push_registrations::owner.eq(owner.as_str()))
            .select(RegistrationRow::as_select())
            .load(&mut conn)?;

        let mut result = ServiceNodes::new();
        for row in rows {
            let options = row
                .publish_options
                .as_deref()
                .and_then(|raw| decode_options(&row, raw));
            result
                .entry(ServiceAddress::new(row.service))
                .or_default()
                .insert(row.node, options);
        }

        Ok(result)
    }

    fn has_any_registration(&self, owner: &Owner) -> Result<bool, StorageError> {
        let mut conn = self.conn()?;

        let count: i64 = push_registrations::table
            .filter(push_registrations::owner.eq(owner.as_str()))
            .count()
            .get_result(&mut conn)?;

        Ok(count > 0)
    }
}
