use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use compose_env::{ComposeEnvError, Environment, EnvironmentConfig};
use compose_env_workflows::{RedisConnection, redis_service};
use tracing::{info, warn};

const DEFAULT_HOLD_SECS: u64 = 0;
const DEFAULT_UP_SECS: u64 = 120;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let hold_secs = read_env_any(
        &["COMPOSE_DEMO_HOLD_SECS", "DEMO_HOLD_SECS"],
        DEFAULT_HOLD_SECS,
    );
    let up_secs = read_env_any(&["COMPOSE_DEMO_UP_SECS"], DEFAULT_UP_SECS);
    info!(hold_secs, up_secs, "starting compose environment demo");

    if let Err(err) = run_demo(Duration::from_secs(hold_secs), Duration::from_secs(up_secs)).await
    {
        warn!("compose environment demo failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run_demo(hold: Duration, up_timeout: Duration) -> anyhow::Result<()> {
    let compose_file =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/docker-compose.yml");
    let config = EnvironmentConfig::builder([compose_file])
        .with_unique_project_name()
        .with_up_timeout(up_timeout)
        .build()?;

    let entries = [redis_service("redis")
        .before(|| async {
            info!("bringing up redis");
            Ok(())
        })
        .after(|| async {
            info!("redis is gone");
            Ok(())
        })];

    info!(project = config.project_name(), "starting environment");
    let mut env = match Environment::start(config, &entries).await {
        Ok(env) => env,
        Err(ComposeEnvError::DockerUnavailable) => {
            warn!("Docker is unavailable; cannot run compose demo");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let result = exercise(&env, hold).await;
    env.shutdown().await;
    result
}

async fn exercise(env: &Environment<Arc<RedisConnection>>, hold: Duration) -> anyhow::Result<()> {
    let redis = env.service("redis").context("redis handler produced no connection")?;
    redis.set("demo", "hello from compose-env").await?;
    let value = redis.get("demo").await?;
    info!(addr = redis.addr(), ?value, "round-tripped a key");

    if let Some(container) = env.container("redis").await? {
        let output = container.exec("redis-cli dbsize").await?;
        info!(container = container.name(), ?output, "keys in redis");
    }

    if !hold.is_zero() {
        info!(secs = hold.as_secs(), "holding environment open; ctrl-c to stop early");
        tokio::select! {
            () = tokio::time::sleep(hold) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
    }
    Ok(())
}

fn read_env_any<T>(keys: &[&str], default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    keys.iter()
        .find_map(|key| {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<T>().ok())
        })
        .unwrap_or(default)
}
