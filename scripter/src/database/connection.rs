// Database connection management
//
// Connections are short-lived: opened per operation and dropped when the operation ends.
// DbConnector keeps the connection test substitutable so its failure paths are testable
// without a real database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::utils::logging::mask_connection_string;

pub type SqlClient = Client<Compat<TcpStream>>;

/// Open a SQL Server connection from an ADO.NET-style connection string.
pub async fn connect(connection_string: &str) -> Result<SqlClient> {
    let config = Config::from_ado_string(connection_string)
        .with_context(|| "Failed to parse SQL Server connection string")?;

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .with_context(|| format!("Failed to reach SQL Server at {}", config.get_addr()))?;
    tcp.set_nodelay(true)?;

    // tiberius expects a futures::io::AsyncWrite, so we use compat_write
    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        // Azure SQL gateways may redirect to another host.
        Err(tiberius::error::Error::Routing { host, port }) => {
            let mut config = config;
            config.host(&host);
            config.port(port);
            info!(
                "[PHASE: database] [STEP: connect] Following SQL Server redirect to {}:{}",
                host, port
            );
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .with_context(|| "Failed to connect to redirected SQL Server host")
        }
        Err(e) => Err(e).with_context(|| "Failed to open SQL Server session"),
    }
}

/// Result of a connection test.
#[derive(Debug, Clone, Serialize)]
pub struct DbTestResult {
    pub success: bool,
    pub server: Option<String>,
    pub database: Option<String>,
    pub version: Option<String>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl DbTestResult {
    fn failed(elapsed_ms: u64, error: String) -> Self {
        Self {
            success: false,
            server: None,
            database: None,
            version: None,
            elapsed_ms,
            error: Some(error),
        }
    }
}

/// What a successful probe learns about the server.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub server: Option<String>,
    pub database: Option<String>,
    pub version: Option<String>,
}

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct ConnectError {
    /// User-friendly message (safe to show in UI)
    pub user_message: String,
    /// Internal details for logging
    pub internal_details: String,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ConnectError {}

/// Trait for database connection probes.
/// Production code uses RealDbConnector; tests use stubs.
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn probe(&self, connection_string: &str) -> Result<ServerInfo, ConnectError>;

    fn timeout_duration(&self) -> Duration {
        Duration::from_secs(20)
    }
}

/// Production connector that actually connects to SQL Server.
pub struct RealDbConnector;

#[async_trait]
impl DbConnector for RealDbConnector {
    async fn probe(&self, connection_string: &str) -> Result<ServerInfo, ConnectError> {
        let mut client = connect(connection_string)
            .await
            .map_err(|e| ConnectError {
                user_message: "Unable to connect. Verify host, credentials, and network access."
                    .to_string(),
                internal_details: format!("Connection error: {:#}", e),
            })?;

        let row = client
            .simple_query(
                "SELECT CAST(@@SERVERNAME AS NVARCHAR(128)), CAST(DB_NAME() AS NVARCHAR(128)), \
                 CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128))",
            )
            .await
            .map_err(|e| ConnectError {
                user_message: "Connected, but the server did not answer a basic query.".to_string(),
                internal_details: format!("Probe query failed: {}", e),
            })?
            .into_row()
            .await
            .map_err(|e| ConnectError {
                user_message: "Connected, but the server did not answer a basic query.".to_string(),
                internal_details: format!("Probe query failed: {}", e),
            })?;

        let text = |idx: usize| -> Option<String> {
            row.as_ref()
                .and_then(|r| r.try_get::<&str, _>(idx).ok().flatten())
                .map(|s| s.to_string())
        };

        Ok(ServerInfo {
            server: text(0),
            database: text(1),
            version: text(2),
        })
    }
}

/// Open a connection, run a trivial query, report what the server is and how long it took.
pub async fn test_connection<C: DbConnector + ?Sized>(
    connector: &C,
    connection_string: &str,
) -> DbTestResult {
    if connection_string.trim().is_empty() {
        return DbTestResult::failed(0, "Empty connection string.".to_string());
    }

    info!(
        "[PHASE: database] [STEP: test_connection] Testing connection: {}",
        mask_connection_string(connection_string)
    );

    let started = Instant::now();
    let result = timeout(
        connector.timeout_duration(),
        connector.probe(connection_string),
    )
    .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(info)) => {
            info!(
                "[PHASE: database] [STEP: test_connection] Connected to {:?}/{:?} ({}ms)",
                info.server, info.database, elapsed_ms
            );
            DbTestResult {
                success: true,
                server: info.server,
                database: info.database,
                version: info.version,
                elapsed_ms,
                error: None,
            }
        }
        Ok(Err(e)) => {
            warn!(
                "[PHASE: database] [STEP: test_connection] {}",
                e.internal_details
            );
            DbTestResult::failed(elapsed_ms, e.user_message)
        }
        Err(_) => {
            warn!("[PHASE: database] [STEP: test_connection] Connection attempt timed out");
            DbTestResult::failed(
                elapsed_ms,
                "Connection timed out. Check network connectivity and firewall.".to_string(),
            )
        }
    }
}
