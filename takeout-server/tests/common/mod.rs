use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use takeout_core::{ExportMode, KdfParams, Keyring};
use takeout_proto::DumpFormat;
use takeout_server::config::{Config, CryptoConfig, ExportConfig};
use takeout_server::state::AppState;
use takeout_storage::{ExportManifest, TableSpec};
use tokio::net::TcpListener;

pub const PASSPHRASE: &str = "server secret";

pub struct TestServer {
    pub url: String,
    #[allow(dead_code)]
    pub addr: SocketAddr,
    #[allow(dead_code)]
    pub keyring_dir: PathBuf,
    pub temp_root: PathBuf,
    _dir: tempfile::TempDir,
}

pub fn seed_database(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE "Users" ("Id" INTEGER PRIMARY KEY, "Username" TEXT, "Email" TEXT, "Password" TEXT);
        CREATE TABLE "Vikings" ("Id" INTEGER PRIMARY KEY, "UserId" INTEGER);
        CREATE TABLE "Items" ("id" INTEGER, "OwnerId" INTEGER, "name" TEXT);
        CREATE TABLE "Badges" ("id" INTEGER, "label" TEXT);

        INSERT INTO "Users" VALUES (1, 'alice', 'alice@example.com', 'hash-alice');
        INSERT INTO "Users" VALUES (2, 'bob smith', 'bob@example.com', 'hash-bob');
        INSERT INTO "Vikings" VALUES (42, 1);
        INSERT INTO "Vikings" VALUES (43, 2);
        INSERT INTO "Items" VALUES (7, 42, 'it''s mine');
        INSERT INTO "Items" VALUES (8, 43, 'bob''s');
        INSERT INTO "Badges" VALUES (1, 'global');
        "#,
    )
    .unwrap();
}

/// Config for a seeded database and a fresh native keyring under `dir`
pub fn test_config(dir: &Path, mode: ExportMode, format: DumpFormat) -> Config {
    let db = dir.join("game.db");
    seed_database(&db);

    let keyring_dir = dir.join("keyring");
    let mut keyring = Keyring::open(&keyring_dir)
        .unwrap()
        .with_kdf(KdfParams::new(64, 1, 1));
    keyring
        .generate("Takeout Export <ops@example.com>", Some(PASSPHRASE))
        .unwrap();

    let temp_root = dir.join("tmp");
    std::fs::create_dir_all(&temp_root).unwrap();

    Config {
        host: "127.0.0.1".into(),
        port: 0, // OS assigns port
        database_path: db,
        crypto: CryptoConfig {
            keyring_dir: Some(keyring_dir),
            signing_key: Some("ops@example.com".into()),
            passphrase: Some(PASSPHRASE.into()),
            ..Default::default()
        },
        export: ExportConfig {
            mode,
            format,
            temp_dir: Some(temp_root),
            manifest: ExportManifest {
                aggregate_key_column: "OwnerId".into(),
                tables: vec![TableSpec::new("Items"), TableSpec::new("Badges")],
                ..Default::default()
            },
        },
    }
}

impl TestServer {
    pub async fn start(mode: ExportMode, format: DumpFormat) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), mode, format);
        let state = AppState::new(&config).await.unwrap();
        Self::serve(dir, &config, state).await
    }

    /// Serve a prepared state; `dir` owns everything `config` points at
    pub async fn serve(dir: tempfile::TempDir, config: &Config, state: AppState) -> Self {
        let keyring_dir = config.crypto.keyring_dir.clone().unwrap();
        let temp_root = config.export.temp_root();
        let app = takeout_server::routes::router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give server a moment to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            url: format!("http://{addr}"),
            addr,
            keyring_dir,
            temp_root,
            _dir: dir,
        }
    }

    /// Entries left behind in the temp root
    pub fn leftovers(&self) -> usize {
        std::fs::read_dir(&self.temp_root).unwrap().count()
    }
}
