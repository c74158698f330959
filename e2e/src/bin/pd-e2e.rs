use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pd_e2e::{
    cloud::{default_token_source, ResourceManagerClient},
    fs,
    prow::setup_prow_config,
    BoskosClient, HarnessConfig, LeaseClient, LeaseState, Result, SshInstance,
};

#[derive(Parser)]
#[command(name = "pd-e2e", version, about = "PD CSI driver e2e harness utilities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Borrows a project from Boskos and heartbeats it until Ctrl-C
    Lease {
        /// Boskos resource type to acquire
        #[arg(long = "type", default_value = "gce-project")]
        resource_type: String,
        /// Overrides BOSKOS_URL
        #[arg(long)]
        boskos_url: Option<String>,
        /// Overrides JOB_NAME as the lease owner
        #[arg(long)]
        owner: Option<String>,
        /// Release the project into this state on exit instead of letting it expire
        #[arg(long)]
        release_to: Option<String>,
    },
    /// Runs a filesystem helper on a test instance
    Remote {
        #[arg(long)]
        host: String,
        #[arg(long)]
        user: Option<String>,
        /// SSH identity file
        #[arg(long)]
        key: Option<PathBuf>,
        #[command(subcommand)]
        op: RemoteOp,
    },
}

#[derive(Subcommand)]
enum RemoteOp {
    Read { path: String },
    Write { path: String, contents: String },
    Chmod { path: String, perms: String },
    Rm { path: String },
    FsSize { mount_path: String },
    BlockSize { device_path: String },
}

async fn run_lease(
    cfg: HarnessConfig,
    resource_type: String,
    release_to: Option<String>,
) -> Result<()> {
    let client: Arc<dyn LeaseClient> = Arc::new(BoskosClient::new(&cfg.owner, &cfg.boskos_url)?);
    let tokens = default_token_source(cfg.access_token.as_deref())?;
    let projects = ResourceManagerClient::new(tokens)?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let setup =
        setup_prow_config(client.clone(), &projects, &resource_type, &cfg.acquire, &shutdown).await?;
    println!("project={}", setup.project);
    println!("service_account={}", setup.service_account);

    shutdown.cancelled().await;
    setup.heartbeat.stop().await;

    if let Some(dest) = release_to {
        let dest: LeaseState = dest.parse().unwrap_or_else(|never| match never {});
        client.release_one(&setup.project, &dest).await?;
        info!("released {} as {}", setup.project, dest);
    }
    Ok(())
}

async fn run_remote(instance: SshInstance, op: RemoteOp) -> Result<()> {
    match op {
        RemoteOp::Read { path } => print!("{}", fs::read_file(&instance, &path).await?),
        RemoteOp::Write { path, contents } => fs::write_file(&instance, &path, &contents).await?,
        RemoteOp::Chmod { path, perms } => fs::force_chmod(&instance, &path, &perms).await?,
        RemoteOp::Rm { path } => fs::rm_all(&instance, &path).await?,
        RemoteOp::FsSize { mount_path } => println!("{}", fs::fs_size_gb(&instance, &mount_path).await?),
        RemoteOp::BlockSize { device_path } => {
            println!("{}", fs::block_size_gb(&instance, &device_path).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = HarnessConfig::from_env();

    let result = match cli.command {
        Commands::Lease {
            resource_type,
            boskos_url,
            owner,
            release_to,
        } => {
            if let Some(url) = boskos_url {
                cfg.boskos_url = url;
            }
            if let Some(owner) = owner {
                cfg.owner = owner;
            }
            run_lease(cfg, resource_type, release_to).await
        }
        Commands::Remote { host, user, key, op } => {
            let mut instance = SshInstance::new(host.clone(), host);
            if let Some(user) = user {
                instance = instance.with_user(user);
            }
            if let Some(key) = key {
                instance = instance.with_identity_file(key);
            }
            run_remote(instance, op).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            error!("fatal: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            warn!("{}", e);
            ExitCode::FAILURE
        }
    }
}
