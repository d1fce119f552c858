use anyhow::{Error, format_err};
use deadpool_postgres::{Client, Config, Pool};
use derive_more::Deref;
use log::info;
use std::{fmt, sync::Arc};
use tokio_postgres::{Config as PgConfig, NoTls, config::Host};

use stack_string::StackString;

mod embedded {
    refinery::embed_migrations!("migrations");
}

#[derive(Clone, Deref)]
pub struct PgPool {
    pgurl: Arc<StackString>,
    #[deref]
    pool: Pool,
}

impl fmt::Debug for PgPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pgconf: Result<PgConfig, _> = self.pgurl.parse();
        match pgconf {
            Ok(pgconf) => write!(
                f,
                "PgPool {:?}/{}",
                pgconf.get_hosts(),
                pgconf.get_dbname().unwrap_or("")
            ),
            Err(_) => write!(f, "PgPool"),
        }
    }
}

impl PgPool {
    /// Accepts either a `postgresql://` url or a `key=value` connection string.
    ///
    /// # Errors
    /// Returns error if pool setup fails
    pub fn new(pgurl: &str) -> Result<Self, Error> {
        let pgconf: PgConfig = pgurl.parse()?;

        let mut config = Config::default();

        if let Some(Host::Tcp(s)) = pgconf.get_hosts().first() {
            config.host.replace(s.clone());
        }
        if let Some(port) = pgconf.get_ports().first() {
            config.port.replace(*port);
        }
        if let Some(u) = pgconf.get_user() {
            config.user.replace(u.to_string());
        }
        if let Some(p) = pgconf.get_password() {
            config
                .password
                .replace(String::from_utf8_lossy(p).to_string());
        }
        if let Some(db) = pgconf.get_dbname() {
            config.dbname.replace(db.to_string());
        }

        let pool = config.builder(NoTls)?.max_size(4).build()?;

        Ok(Self {
            pgurl: Arc::new(pgurl.into()),
            pool,
        })
    }

    /// # Errors
    /// Return error if get connection from pool fails
    pub async fn get(&self) -> Result<Client, Error> {
        self.pool.get().await.map_err(Into::into)
    }

    /// Create or update the `users` and `events` tables.
    ///
    /// # Errors
    /// Returns error if a connection cannot be obtained or a migration fails
    pub async fn run_migrations(&self) -> Result<(), Error> {
        let mut client = self.get().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| format_err!("migration failed: {e}"))?;
        for migration in report.applied_migrations() {
            info!("applied migration {migration}");
        }
        Ok(())
    }
}
