use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use vim_patches::db;
use vim_patches::listing::{ListingSource, TableError};
use vim_patches::model::Entry;
use vim_patches::notify::{run_dispatcher, Notifier};
use vim_patches::sync::{SyncError, Syncer, PULL_ACK};

const LISTING: &str = concat!(
    "Patches for the 7.4a BETA release.\n",
    "\n",
    "   SIZE   NAME   FIXES\n",
    "   1234  7.4.001  fix foo\n",
    "   5678  7.4.002  fix bar\n",
    "---\n",
);

const LISTING_GROWN: &str = concat!(
    "   SIZE   NAME   FIXES\n",
    "   1234  7.4.001  fix foo\n",
    "   5678  7.4.002  fix bar\n",
    "   4321  7.4.003  fix baz\n",
    "---\n",
);

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Serves scripted listing bodies, one per fetch; repeats the last one.
#[derive(Clone, Default)]
struct ScriptedSource {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
}

impl ScriptedSource {
    fn with_responses(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
        }
    }
}

#[async_trait::async_trait]
impl ListingSource for ScriptedSource {
    async fn fetch(&self) -> Result<String> {
        let mut guard = self.responses.lock().await;
        match guard.len() {
            0 => Err(anyhow!("no scripted response")),
            1 => match guard.front().unwrap() {
                Ok(text) => Ok(text.clone()),
                Err(err) => Err(anyhow!("{err}")),
            },
            _ => guard.pop_front().unwrap(),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn announce(&self, entry: &Entry) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((entry.name.clone(), entry.title.clone()));
        Ok(())
    }
}

fn pair(name: &str, title: &str) -> (String, String) {
    (name.to_string(), title.to_string())
}

#[tokio::test]
async fn first_pass_inserts_and_announces_second_pass_is_idempotent() {
    let pool = setup_pool().await;
    let (tx, rx) = mpsc::unbounded_channel();
    let notifier = RecordingNotifier::default();
    let dispatcher = tokio::spawn(run_dispatcher(rx, notifier.clone()));

    let source = ScriptedSource::with_responses(vec![Ok(LISTING.to_string())]);
    let syncer = Syncer::new(pool.clone(), Box::new(source), tx);

    let started = Utc::now();
    let first = syncer.sync().await.unwrap();
    assert_eq!(first.seen, 2);
    let names: Vec<&str> = first.inserted.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["7.4.001", "7.4.002"]);

    let second = syncer.sync().await.unwrap();
    assert_eq!(second.seen, 2);
    assert!(second.inserted.is_empty());
    assert_eq!(second.skipped(), 2);

    let recent = syncer.list_recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|e| e.created_at >= started));
    assert!(recent.iter().all(|e| e.description.is_empty()));
    assert_eq!(recent[0].name, "7.4.002");
    assert_eq!(recent[1].name, "7.4.001");

    drop(syncer);
    let delivered = dispatcher.await.unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(
        notifier.calls().await,
        vec![pair("7.4.001", "fix foo"), pair("7.4.002", "fix bar")]
    );
    assert_eq!(db::count_entries(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn only_new_rows_are_announced_when_listing_grows() {
    let pool = setup_pool().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = ScriptedSource::with_responses(vec![
        Ok(LISTING.to_string()),
        Ok(LISTING_GROWN.to_string()),
    ]);
    let syncer = Syncer::new(pool, Box::new(source), tx);

    syncer.sync().await.unwrap();
    while rx.try_recv().is_ok() {}

    let report = syncer.sync().await.unwrap();
    assert_eq!(report.seen, 3);
    assert_eq!(report.inserted.len(), 1);
    assert_eq!(report.inserted[0].name, "7.4.003");

    let event = rx.try_recv().unwrap();
    assert_eq!(event.entry.name, "7.4.003");
    assert_eq!(event.entry.title, "fix baz");
    assert!(rx.try_recv().is_err());

    let recent = syncer.list_recent(10).await.unwrap();
    assert_eq!(recent[0].name, "7.4.003");
}

#[tokio::test]
async fn listing_without_header_has_no_side_effects() {
    let pool = setup_pool().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = ScriptedSource::with_responses(vec![Ok(
        "   1234  7.4.001  fix foo\n---\n".to_string()
    )]);
    let syncer = Syncer::new(pool.clone(), Box::new(source), tx);

    let err = syncer.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Table(TableError::HeaderNotFound)));
    assert_eq!(syncer.pull().await, PULL_ACK);

    assert_eq!(db::count_entries(&pool).await.unwrap(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_row_aborts_whole_pass() {
    let pool = setup_pool().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = ScriptedSource::with_responses(vec![Ok(concat!(
        "   SIZE   NAME   FIXES\n",
        "   1234  7.4.001  fix foo\n",
        "   77\n",
        "---\n",
    )
    .to_string())]);
    let syncer = Syncer::new(pool.clone(), Box::new(source), tx);

    let err = syncer.sync().await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Table(TableError::MalformedRow { line: 2, .. })
    ));
    assert_eq!(db::count_entries(&pool).await.unwrap(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn store_failure_mid_pass_rolls_back_and_publishes_nothing() {
    let pool = setup_pool().await;
    sqlx::query(
        "CREATE TRIGGER reject_second_patch BEFORE INSERT ON entries \
         WHEN NEW.name = '7.4.002' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = ScriptedSource::with_responses(vec![Ok(LISTING.to_string())]);
    let syncer = Syncer::new(pool.clone(), Box::new(source), tx);

    let err = syncer.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Store(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("disk full"));

    // 7.4.001 was inserted before the failure and must have been rolled back.
    assert_eq!(db::count_entries(&pool).await.unwrap(), 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(syncer.pull().await, PULL_ACK);
}

#[tokio::test]
async fn fetch_failure_is_retried_on_next_pass() {
    let pool = setup_pool().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = ScriptedSource::with_responses(vec![
        Err(anyhow!("connection reset")),
        Ok(LISTING.to_string()),
    ]);
    let syncer = Syncer::new(pool.clone(), Box::new(source), tx);

    assert!(matches!(syncer.sync().await, Err(SyncError::Fetch(_))));
    assert_eq!(db::count_entries(&pool).await.unwrap(), 0);

    let report = syncer.sync().await.unwrap();
    assert_eq!(report.inserted.len(), 2);
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn entries_persist_without_a_dispatcher() {
    let pool = setup_pool().await;
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let source = ScriptedSource::with_responses(vec![Ok(LISTING.to_string())]);
    let syncer = Syncer::new(pool.clone(), Box::new(source), tx);

    let report = syncer.sync().await.unwrap();
    assert_eq!(report.inserted.len(), 2);
    assert_eq!(db::count_entries(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_pulls_never_duplicate_entries() {
    let pool = setup_pool().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let source = ScriptedSource::with_responses(vec![Ok(LISTING_GROWN.to_string())]);
    let syncer = Arc::new(Syncer::new(pool.clone(), Box::new(source), tx));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let syncer = syncer.clone();
            tokio::spawn(async move { syncer.pull().await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), PULL_ACK);
    }

    assert_eq!(db::count_entries(&pool).await.unwrap(), 3);
    let mut events = 0;
    while rx.try_recv().is_ok() {
        events += 1;
    }
    assert_eq!(events, 3);
}
