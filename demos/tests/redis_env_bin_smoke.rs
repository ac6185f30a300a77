use std::{
    env,
    process::{Command, Stdio},
};

// Manually run the demo binary against a real docker daemon:
// cargo test -p runner-demos --test redis_env_bin_smoke -- --ignored --nocapture
#[test]
#[ignore = "runs the redis_env binary and requires docker"]
fn redis_env_bin_smoke() {
    // Prefer a prebuilt binary (if provided), otherwise fall back to cargo run.
    let mut cmd = match env::var("REDIS_ENV_BIN").ok() {
        Some(path) => Command::new(path),
        None => {
            let mut c = Command::new("cargo");
            c.args(["run", "-p", "runner-demos", "--bin", "redis_env"]);
            c
        }
    };

    let status = cmd
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .env(
            "COMPOSE_DEMO_HOLD_SECS",
            env::var("COMPOSE_DEMO_HOLD_SECS").unwrap_or_else(|_| "5".into()),
        )
        .env("RUST_LOG", env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .env("RUST_BACKTRACE", "1")
        .status()
        .expect("failed to spawn redis_env");

    assert!(status.success(), "redis_env binary failed: status={status}");
}
