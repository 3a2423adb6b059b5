use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use image_reflector::controller::{
    self, ControllerOptions, ControllerState, CredentialResolver, KubeEventSink, KubeObjectSource,
    RegistryScanner,
};
use image_reflector::database::{FileTagStore, MemoryTagStore, TagStore};
use image_reflector::registry::login::{
    GcpMetadataProvider, LoginManager, ProviderKind, ProviderOptions,
};
use image_reflector::registry::HttpRegistryClient;
use image_reflector::Error;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StorageBackend {
    File,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Directory of the file tag store
    #[arg(long, env = "STORAGE_PATH", default_value = "/data")]
    storage_path: PathBuf,

    /// Where scanned tags are kept
    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value_t = StorageBackend::File)]
    storage_backend: StorageBackend,

    /// Maximum concurrent reconciles per controller
    #[arg(long, env = "CONCURRENT", default_value_t = 4)]
    concurrent: u16,

    /// Listen address for /healthz, /readyz and /metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Only reconcile while holding the leader lease
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    leader_election_namespace: String,

    /// Log in to Amazon ECR with the workload identity
    #[arg(long, env = "AWS_AUTOLOGIN_FOR_ECR")]
    aws_autologin_for_ecr: bool,

    /// Log in to Google GCR and Artifact Registry with the workload identity
    #[arg(long, env = "GCP_AUTOLOGIN_FOR_GCR")]
    gcp_autologin_for_gcr: bool,

    /// Log in to Azure ACR with the workload identity
    #[arg(long, env = "AZURE_AUTOLOGIN_FOR_ACR")]
    azure_autologin_for_acr: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Image Reflector v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_controller(run_args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
    }
}

fn open_store(args: &RunArgs) -> Result<Arc<dyn TagStore>, Error> {
    match args.storage_backend {
        StorageBackend::File => {
            let store = FileTagStore::open(&args.storage_path)?;
            info!("Using file tag store at {}", store.dir().display());
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory tag store; scan results are lost on restart");
            Ok(Arc::new(MemoryTagStore::new()))
        }
    }
}

fn login_manager(args: &RunArgs) -> Result<LoginManager, Error> {
    let options = ProviderOptions {
        aws_auto_login: args.aws_autologin_for_ecr,
        gcp_auto_login: args.gcp_autologin_for_gcr,
        azure_auto_login: args.azure_autologin_for_acr,
    };
    let metadata_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {e}")))?;

    Ok(LoginManager::new(options)
        .with_provider(ProviderKind::Gcp, Arc::new(GcpMetadataProvider::new(metadata_client))))
}

async fn run_controller(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!("Starting Image Reflector v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let store = open_store(&args)?;
    let credentials = CredentialResolver::new(
        Arc::new(KubeObjectSource::new(client.clone())),
        login_manager(&args)?,
    );
    let registry = Arc::new(HttpRegistryClient::new()?);
    let scanner = RegistryScanner::new(registry, credentials, store.clone());

    let is_leader = Arc::new(AtomicBool::new(!args.leader_elect));
    if args.leader_elect {
        let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });
        info!("Leader election using holder ID: {}", holder_identity);

        let lease_client = client.clone();
        let lease_ns = args.leader_election_namespace.clone();
        let is_leader_bg = Arc::clone(&is_leader);
        tokio::spawn(async move {
            run_leader_election(lease_client, &lease_ns, &holder_identity, is_leader_bg).await;
        });
    }

    #[cfg(feature = "rest-api")]
    let ready = {
        let server_state = Arc::new(image_reflector::rest_api::ServerState::default());
        let ready = Arc::clone(&server_state.ready);
        let addr = args.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = image_reflector::rest_api::run_server(addr, server_state).await {
                tracing::error!("HTTP server error: {:?}", e);
            }
        });
        ready
    };
    #[cfg(not(feature = "rest-api"))]
    let _ = args.metrics_addr;

    if args.leader_elect {
        info!("Waiting for leadership of lease {}", LEASE_NAME);
        while !is_leader.load(Ordering::Relaxed) {
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    let state = Arc::new(ControllerState {
        client: client.clone(),
        scanner,
        store,
        events: Arc::new(KubeEventSink::new(client)),
        options: ControllerOptions {
            watch_namespace: args.namespace.clone(),
            concurrency: args.concurrent.max(1),
        },
        is_leader,
        failures: Default::default(),
    });

    #[cfg(feature = "rest-api")]
    ready.store(true, Ordering::Relaxed);

    controller::run_controllers(state).await
}

const LEASE_NAME: &str = "image-reflector-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    match leases.get(LEASE_NAME).await {
        Ok(existing) => {
            let spec = existing.spec.as_ref();
            let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

            if current_holder == Some(identity) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok(true);
            }

            let expired = spec
                .and_then(|s| s.renew_time.as_ref())
                .map(|renew| {
                    let duration = spec
                        .and_then(|s| s.lease_duration_seconds)
                        .unwrap_or(LEASE_DURATION_SECS);
                    now > renew.0 + chrono::Duration::seconds(i64::from(duration))
                })
                .unwrap_or(true);

            if !expired {
                return Ok(false);
            }

            info!("Lease held by {:?} has expired, taking over", current_holder);
            // resourceVersion makes two replicas racing for an expired lease conflict
            let patch = serde_json::json!({
                "metadata": { "resourceVersion": existing.metadata.resource_version },
                "spec": {
                    "holderIdentity": identity,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            });
            match leases
                .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e),
            }
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                spec: Some(k8s_openapi::api::coordination::v1::LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            match leases.create(&PostParams::default(), &lease).await {
                Ok(_) => {
                    info!("Created lease {} with holder {}", LEASE_NAME, identity);
                    Ok(true)
                }
                Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}
