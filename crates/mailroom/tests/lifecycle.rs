//! Startup, restart and shutdown of the wired application.

use std::sync::Arc;
use std::time::Duration;

use mailroom::App;
use mailroom_auth::{ClientInfo, NewUser, PasswordHasher, Role};
use mailroom_core::ManualClock;
use mailroom_settings::MailroomSettings;
use mailroom_store::schema;

struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> mailroom_auth::Result<String> {
        Ok(format!("plain${password}"))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        hash.strip_prefix("plain$") == Some(password)
    }
}

fn settings(dir: &tempfile::TempDir) -> MailroomSettings {
    let mut settings = MailroomSettings::default();
    settings.database.path = dir.path().join("nested").join("mailroom.db");
    settings.database.writer_idle_tick_ms = 20;
    settings.security.session_sweep_interval_secs = 1;
    settings
}

async fn seed_user(app: &App) {
    let auth = app.authenticator(Arc::new(PlainHasher));
    let _ = auth
        .users()
        .create_user(
            NewUser {
                username: "desk",
                full_name: "Front Desk",
                role: Role::Operator,
                password: "pw",
                must_change_password: false,
            },
            auth.hasher(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn start_bootstraps_schema_in_new_directory() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::start(settings(&dir)).await.unwrap();

    assert!(dir.path().join("nested").join("mailroom.db").exists());
    for table in schema::TABLES {
        assert_eq!(app.reads().table_count(table).await.unwrap(), 0, "{table}");
    }
    assert!(app.stats().running);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn login_works_through_the_wired_authenticator() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::start(settings(&dir)).await.unwrap();
    seed_user(&app).await;

    let auth = app.authenticator(Arc::new(PlainHasher));
    let outcome = auth
        .login("desk", "pw", &ClientInfo::new("127.0.0.1", "lifecycle"))
        .await
        .unwrap();
    assert!(
        app.sessions()
            .validate_session(outcome.session.token.as_str())
            .await
            .is_some()
    );
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_sweeps_sessions_that_expired_while_down() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::starting_now();

    let app = App::start_with_clock(settings(&dir), Arc::new(clock.clone()))
        .await
        .unwrap();
    seed_user(&app).await;
    let auth = app.authenticator(Arc::new(PlainHasher));
    let _ = auth
        .login("desk", "pw", &ClientInfo::default())
        .await
        .unwrap();
    drop(auth);
    app.shutdown().await.unwrap();

    clock.advance(chrono::Duration::hours(1));
    let app = App::start_with_clock(settings(&dir), Arc::new(clock.clone()))
        .await
        .unwrap();
    assert_eq!(app.reads().table_count("sessions").await.unwrap(), 0);
    assert_eq!(app.reads().table_count("users").await.unwrap(), 1);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn sweeper_stops_with_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = App::start(settings(&dir)).await.unwrap();
    app.spawn_sweeper();
    app.spawn_sweeper();

    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .expect("shutdown should not hang")
        .unwrap();
}

#[tokio::test]
async fn unusable_database_path_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let mut settings = MailroomSettings::default();
    settings.database.path = blocker.join("mailroom.db");
    let err = App::start(settings).await.err().unwrap();
    assert!(err.to_string().contains("Failed to create directory"));
}

#[tokio::test]
async fn failed_startup_sweep_stops_the_writer() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    std::fs::create_dir_all(settings.database.path.parent().unwrap()).unwrap();

    // recorded as migrated but missing the sessions table
    let conn = rusqlite::Connection::open(&settings.database.path).unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL, description TEXT);
         INSERT INTO schema_version VALUES ({}, '2026-01-01T00:00:00.000Z', 'stale');",
        schema::latest_version()
    ))
    .unwrap();
    drop(conn);

    let (logs, _guard) = mailroom_core::logging::capture_logs();
    let err = App::start(settings).await.err().unwrap();
    assert!(format!("{err:#}").contains("Failed to sweep expired sessions"));
    assert!(logs.has_event(tracing::Level::INFO, "write queue stopped"));
}
