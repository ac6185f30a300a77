use std::sync::Arc;

use compose_env::{
    ComposeEnvError, ConfigError, ContainerRuntime as _, DockerRuntime, DynError, Environment,
    ServiceEntry,
};
use compose_env_workflows::{RedisConnection, redis_service};
use serial_test::serial;
use tests_workflows::{CACHE, CACHE_PORT_ENV, REDIS, init_tracing, test_config};

type Redis = Arc<RedisConnection>;

fn entries() -> Vec<ServiceEntry<Redis>> {
    vec![
        redis_service(REDIS),
        redis_service(CACHE).with_env(CACHE_PORT_ENV, "6390"),
    ]
}

async fn start(entries: &[ServiceEntry<Redis>]) -> Option<Environment<Redis>> {
    init_tracing();
    let config = test_config().expect("test config");
    match Environment::start(config, entries).await {
        Ok(env) => Some(env),
        Err(ComposeEnvError::DockerUnavailable) => {
            eprintln!("Skipping compose environment test: Docker is unavailable");
            None
        }
        Err(err) => panic!("environment start: {err}"),
    }
}

async fn leftover_containers(label: &str) -> usize {
    let runtime = DockerRuntime::connect().await.expect("docker");
    let mut count = 0;
    for service in [REDIS, CACHE] {
        count += runtime
            .list_containers(label, service)
            .await
            .expect("list containers")
            .len();
    }
    count
}

#[tokio::test]
#[serial]
async fn stop_and_restart_replace_service_outputs() {
    let entries = entries();
    let Some(mut env) = start(&entries).await else {
        return;
    };
    let label = env.config().label_filter();

    let redis = Arc::clone(env.service(REDIS).expect("redis output"));
    let cache = Arc::clone(env.service(CACHE).expect("cache output"));
    redis.set("greeting", "hello").await.expect("set");
    assert_eq!(
        redis.get("greeting").await.expect("get").as_deref(),
        Some("hello")
    );

    env.stop_services([REDIS]).await.expect("stop redis");
    assert!(env.service(REDIS).is_none());
    assert!(env.container(REDIS).await.expect("lookup").is_none());
    assert!(redis.ping().await.is_err(), "old connection should be gone");
    cache.ping().await.expect("cache unaffected");

    env.start_services(&entries[..1]).await.expect("restart redis");
    let restarted = env.service(REDIS).expect("redis output after restart");
    assert_ne!(restarted.id(), redis.id());
    restarted.ping().await.expect("restarted redis answers");
    assert!(
        redis.ping().await.is_err(),
        "connection from before the restart stays unusable"
    );

    let err = env
        .stop_services([REDIS, "postgres"])
        .await
        .expect_err("unknown service");
    assert!(matches!(err, ComposeEnvError::UnmanagedService { names } if names == ["postgres"]));
    assert!(env.service(REDIS).is_some(), "nothing stopped on error");

    env.shutdown().await;
    assert!(env.is_shut_down());
    assert!(env.services().is_empty());
    assert_eq!(leftover_containers(&label).await, 0);
}

#[tokio::test]
#[serial]
async fn failing_handler_tears_everything_down() {
    init_tracing();
    let config = test_config().expect("test config");
    let label = config.label_filter();
    let entries = [ServiceEntry::new(REDIS, |_container| async {
        Err::<(), DynError>("refusing to connect".into())
    })];

    match Environment::start(config, &entries).await {
        Err(ComposeEnvError::DockerUnavailable) => {
            eprintln!("Skipping compose environment test: Docker is unavailable");
        }
        Err(ComposeEnvError::Handler { service, .. }) => {
            assert_eq!(service, REDIS);
            assert_eq!(leftover_containers(&label).await, 0);
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("handler failure should abort start"),
    }
}

#[tokio::test]
#[serial]
async fn clashing_env_keys_are_rejected_up_front() {
    init_tracing();
    let config = test_config().expect("test config");
    let entries = [
        redis_service(REDIS).with_env(CACHE_PORT_ENV, "6391"),
        redis_service(CACHE).with_env(CACHE_PORT_ENV, "6392"),
    ];

    match Environment::start(config, &entries).await {
        Err(ComposeEnvError::DockerUnavailable) => {
            eprintln!("Skipping compose environment test: Docker is unavailable");
        }
        Err(ComposeEnvError::Config(ConfigError::DuplicateEnvVar { key, .. })) => {
            assert_eq!(key, CACHE_PORT_ENV);
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("duplicate keys should be rejected"),
    }
}
