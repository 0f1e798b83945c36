// # keystone-endpointd - Keystone Endpoint Reconciler Daemon
//
// This is a THIN integration layer:
// - DO NOT add reconcile logic, identity API logic, or retry logic here
// - All reconcile logic lives in keystone-endpoint-core
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering the identity connector and resource stores
// 4. Running the controller until SIGTERM/SIGINT
//
// ## Configuration
//
// ### Resource Store
// - `KEYSTONE_ENDPOINT_STORE_TYPE`: Type of resource store (file, memory)
// - `KEYSTONE_ENDPOINT_STORE_PATH`: Path to the store file (for file store)
//
// ### Identity Service
// - `KEYSTONE_ENDPOINT_PASSWORD_FILE`: File holding the Keystone admin password
// - `KEYSTONE_ENDPOINT_REQUEST_TIMEOUT_SECS`: Identity API request timeout
//
// ### Controller
// - `KEYSTONE_ENDPOINT_WATCH_NAMESPACE`: Only reconcile this namespace (optional)
// - `KEYSTONE_ENDPOINT_MAX_CONCURRENT`: Objects reconciled at the same time
// - `KEYSTONE_ENDPOINT_PASS_TIMEOUT_SECS`: Deadline of one reconcile pass
// - `KEYSTONE_ENDPOINT_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export KEYSTONE_ENDPOINT_STORE_TYPE=file
// export KEYSTONE_ENDPOINT_STORE_PATH=/var/lib/keystone-endpoint/objects.json
// export KEYSTONE_ENDPOINT_PASSWORD_FILE=/run/secrets/keystone/AdminPassword
// export KEYSTONE_ENDPOINT_WATCH_NAMESPACE=openstack
//
// keystone-endpointd
// ```

use anyhow::Result;
use keystone_endpoint_core::{
    BackendRegistry, Controller, ControllerEvent, IdentityConfig, OperatorConfig,
    ReconcileSettings, StoreConfig,
};
use std::env;
use std::fmt::Display;
use std::future::Future;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time the controller gets to stop after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum EndpointdExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<EndpointdExitCode> for ExitCode {
    fn from(code: EndpointdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    store_type: String,
    store_path: Option<String>,
    password_file: String,
    request_timeout_secs: Option<u64>,
    watch_namespace: Option<String>,
    max_concurrent: Option<usize>,
    pass_timeout_secs: Option<u64>,
    log_level: String,
}

/// Parse an optional numeric variable; unset means default
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} is not a valid number ('{}'): {}", name, value, e)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("{}: {}", name, e)),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            store_type: env::var("KEYSTONE_ENDPOINT_STORE_TYPE")
                .unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("KEYSTONE_ENDPOINT_STORE_PATH").ok(),
            password_file: env::var("KEYSTONE_ENDPOINT_PASSWORD_FILE").unwrap_or_default(),
            request_timeout_secs: parse_var("KEYSTONE_ENDPOINT_REQUEST_TIMEOUT_SECS")?,
            watch_namespace: env::var("KEYSTONE_ENDPOINT_WATCH_NAMESPACE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            max_concurrent: parse_var("KEYSTONE_ENDPOINT_MAX_CONCURRENT")?,
            pass_timeout_secs: parse_var("KEYSTONE_ENDPOINT_PASS_TIMEOUT_SECS")?,
            log_level: env::var("KEYSTONE_ENDPOINT_LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks what the core cannot know about: variable names in messages,
    /// paths on this host, and sane numeric ranges. The assembled
    /// [`OperatorConfig`] is validated by the core afterwards.
    fn validate(&self) -> Result<()> {
        if self.password_file.is_empty() {
            anyhow::bail!(
                "KEYSTONE_ENDPOINT_PASSWORD_FILE is required. \
                Set it via: export KEYSTONE_ENDPOINT_PASSWORD_FILE=/run/secrets/keystone/AdminPassword"
            );
        }

        // The file itself may appear later (secret mounted after start)
        if let Some(parent) = std::path::Path::new(&self.password_file).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            eprintln!(
                "WARNING: KEYSTONE_ENDPOINT_PASSWORD_FILE directory does not exist yet: {}",
                parent.display()
            );
        }

        match self.store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "KEYSTONE_ENDPOINT_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.store_type
            ),
        }

        if self.store_type == "file" {
            let Some(path) = self.store_path.as_deref().filter(|p| !p.is_empty()) else {
                anyhow::bail!(
                    "KEYSTONE_ENDPOINT_STORE_PATH is required when KEYSTONE_ENDPOINT_STORE_TYPE=file. \
                    Set it via: export KEYSTONE_ENDPOINT_STORE_PATH=/var/lib/keystone-endpoint/objects.json"
                );
            };

            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "KEYSTONE_ENDPOINT_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if let Some(timeout) = self.request_timeout_secs
            && !(1..=300).contains(&timeout)
        {
            anyhow::bail!(
                "KEYSTONE_ENDPOINT_REQUEST_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                timeout
            );
        }

        if let Some(max_concurrent) = self.max_concurrent
            && !(1..=64).contains(&max_concurrent)
        {
            anyhow::bail!(
                "KEYSTONE_ENDPOINT_MAX_CONCURRENT must be between 1 and 64. Got: {}",
                max_concurrent
            );
        }

        if let Some(pass_timeout) = self.pass_timeout_secs
            && !(1..=600).contains(&pass_timeout)
        {
            anyhow::bail!(
                "KEYSTONE_ENDPOINT_PASS_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                pass_timeout
            );
        }

        self.log_level()?;

        Ok(())
    }

    fn log_level(&self) -> Result<Level> {
        Ok(match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "KEYSTONE_ENDPOINT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        })
    }

    /// Assemble the core configuration
    fn operator_config(&self) -> OperatorConfig {
        let mut identity = IdentityConfig::keystone(&self.password_file);
        if let (
            Some(timeout),
            IdentityConfig::Keystone {
                request_timeout_secs,
                ..
            },
        ) = (self.request_timeout_secs, &mut identity)
        {
            *request_timeout_secs = timeout;
        }

        let store = match self.store_type.as_str() {
            "file" => StoreConfig::File {
                path: self.store_path.clone().unwrap_or_default(),
            },
            _ => StoreConfig::Memory,
        };

        let defaults = ReconcileSettings::default();
        let reconcile = ReconcileSettings {
            max_concurrent_reconciles: self
                .max_concurrent
                .unwrap_or(defaults.max_concurrent_reconciles),
            pass_timeout_secs: self.pass_timeout_secs.unwrap_or(defaults.pass_timeout_secs),
            ..defaults
        };

        OperatorConfig {
            store,
            identity,
            watch_namespace: self.watch_namespace.clone(),
            reconcile,
        }
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EndpointdExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return EndpointdExitCode::ConfigError.into();
    }

    let operator_config = config.operator_config();
    if let Err(e) = operator_config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return EndpointdExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = config.log_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return EndpointdExitCode::ConfigError.into();
    }

    info!("Starting keystone-endpointd daemon");
    info!(
        store = operator_config.store.type_name(),
        identity = operator_config.identity.type_name(),
        namespace = operator_config.watch_namespace.as_deref().unwrap_or("*"),
        "Configuration loaded"
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return EndpointdExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(operator_config).await {
            error!("Daemon error: {}", e);
            EndpointdExitCode::RuntimeError
        } else {
            EndpointdExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: OperatorConfig) -> Result<()> {
    let registry = BackendRegistry::with_builtin_stores();

    #[cfg(feature = "openstack")]
    {
        info!("Registering Keystone identity connector");
        keystone_endpoint_openstack::register(&registry);
    }

    if !registry.has_connector(config.identity.type_name()) {
        anyhow::bail!(
            "Identity connector '{}' is not available in this build. Registered: {:?}",
            config.identity.type_name(),
            registry.list_connectors()
        );
    }

    let store = registry.create_store(&config.store).await?;
    let connector = registry.create_connector(&config.identity)?;

    let (mut controller, events) = Controller::new(store, connector, config.reconcile)?;
    if let Some(namespace) = config.watch_namespace {
        controller = controller.with_namespace(namespace);
    }

    // Install signal handlers before the controller starts
    let signal = shutdown_signal()?;

    tokio::spawn(log_events(events));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut controller_task =
        tokio::spawn(async move { controller.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::select! {
        signal = signal => {
            info!("Received shutdown signal: {}", signal);
            let _ = shutdown_tx.send(());
        }
        joined = &mut controller_task => {
            // The controller only stops on its own when something broke
            joined.map_err(|e| anyhow::anyhow!("Controller task failed: {}", e))??;
            anyhow::bail!("Controller stopped unexpectedly");
        }
    }

    info!("Shutting down daemon");
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, controller_task).await {
        Ok(joined) => {
            joined.map_err(|e| anyhow::anyhow!("Controller task failed: {}", e))??;
            Ok(())
        }
        Err(_) => Err(anyhow::anyhow!(
            "Shutdown timeout after {:?}",
            SHUTDOWN_TIMEOUT
        )),
    }
}

/// Log controller events until the controller goes away
async fn log_events(mut events: mpsc::Receiver<ControllerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::Started {
                namespace,
                objects_count,
            } => info!(
                namespace = namespace.as_deref().unwrap_or("*"),
                objects_count, "Controller started"
            ),
            ControllerEvent::ReconcileSucceeded { key, phase } => {
                info!(object = %key, %phase, "Reconcile succeeded")
            }
            ControllerEvent::ReconcileFailed {
                key,
                error,
                needs_manual_intervention: true,
            } => error!(object = %key, %error, "Reconcile failed, manual intervention needed"),
            ControllerEvent::ReconcileFailed { key, error, .. } => {
                warn!(object = %key, %error, "Reconcile failed")
            }
            ControllerEvent::Requeued { key, after } => {
                tracing::debug!(object = %key, ?after, "Requeued")
            }
            ControllerEvent::Stopped { reason } => info!(%reason, "Controller stopped"),
        }
    }
}

/// Resolve on SIGTERM or SIGINT
///
/// Handlers are installed when this is called, not when the future is
/// first polled.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

/// Resolve on CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for CTRL-C: {}", e);
            std::future::pending::<()>().await;
        }
        "SIGINT"
    })
}
