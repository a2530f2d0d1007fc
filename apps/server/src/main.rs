//! `notewire-server`: the relay binary. Wires `notewire_relay`'s axum router
//! to a TCP listener, loads configuration from the environment (§10.4), and
//! installs the `tracing` subscriber (§10.2). No standalone CLI crate: a
//! `--help` flag is the one operator-facing surface beyond the environment.

use std::path::PathBuf;
use std::sync::Arc;

use notewire_relay::db::{create_pool, run_migrations};
use notewire_relay::write_actor::spawn_writer;
use notewire_relay::{router, AppState};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8787";
const DEFAULT_DB_PATH: &str = "notewire-relay.sqlite3";
const DEFAULT_BLOB_DIR: &str = "notewire-relay-blobs";
const DEFAULT_DEV_TOKEN_SECRET: &str = "notewire-dev-secret-change-me";

struct Config {
    listen_addr: String,
    db_path: PathBuf,
    blob_dir: PathBuf,
    token_secret: Vec<u8>,
}

impl Config {
    fn from_env() -> Self {
        let listen_addr = std::env::var("NOTEWIRE_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let db_path = std::env::var("NOTEWIRE_DB_PATH").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        let blob_dir =
            std::env::var("NOTEWIRE_BLOB_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_BLOB_DIR));
        let token_secret = std::env::var("NOTEWIRE_DEV_TOKEN_SECRET")
            .unwrap_or_else(|_| {
                tracing::warn!(
                    "NOTEWIRE_DEV_TOKEN_SECRET not set, using an insecure default — do not run this in production"
                );
                DEFAULT_DEV_TOKEN_SECRET.to_string()
            })
            .into_bytes();
        Self { listen_addr, db_path, blob_dir, token_secret }
    }
}

fn print_help() {
    println!(
        "notewire-server — the relay sequencer's HTTP binary\n\n\
         USAGE:\n    notewire-server [--help]\n\n\
         CONFIGURATION (environment variables):\n\
         \x20   NOTEWIRE_LISTEN_ADDR        listen address (default: {DEFAULT_LISTEN_ADDR})\n\
         \x20   NOTEWIRE_DB_PATH            sqlite database path (default: {DEFAULT_DB_PATH})\n\
         \x20   NOTEWIRE_BLOB_DIR           content-addressed blob directory (default: {DEFAULT_BLOB_DIR})\n\
         \x20   NOTEWIRE_DEV_TOKEN_SECRET   HMAC secret for dev-auth tokens (no secure default)\n"
    );
}

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();

    run_migrations(&config.db_path).expect("failed to run relay migrations");
    let pool = create_pool(&config.db_path).expect("failed to create relay database pool");
    let write_handle = spawn_writer(pool.clone());
    let state = Arc::new(AppState::new(pool, write_handle, config.token_secret, config.blob_dir.clone()));

    std::fs::create_dir_all(&config.blob_dir).expect("failed to create blob directory");

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await.expect("failed to bind listen address");
    tracing::info!(addr = %config.listen_addr, "notewire relay listening");

    axum::serve(listener, app).await.expect("relay server exited unexpectedly");
}
