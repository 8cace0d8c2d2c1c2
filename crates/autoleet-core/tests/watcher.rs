//! Input watcher gating and live directory watching.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autoleet_core::{
    ArtifactHandler, AutoleetError, InputWatcher, StabilityPolicy, WatchSettings,
};

#[derive(Default)]
struct CountingHandler {
    seen: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl ArtifactHandler for CountingHandler {
    async fn handle(&self, path: &Path) -> autoleet_core::Result<()> {
        self.seen.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

struct FatalHandler;

#[async_trait]
impl ArtifactHandler for FatalHandler {
    async fn handle(&self, _path: &Path) -> autoleet_core::Result<()> {
        Err(AutoleetError::InterpreterNotFound {
            interpreter: "python3".into(),
        })
    }
}

fn settings(dir: &Path, cooldown: Duration) -> WatchSettings {
    WatchSettings {
        source_dir: dir.to_path_buf(),
        allowed_extensions: vec![".png".into(), ".jpg".into()],
        cooldown,
        stability: StabilityPolicy {
            interval: Duration::from_millis(20),
            max_wait: Duration::from_millis(500),
            required_stable_polls: 2,
        },
    }
}

#[test]
fn missing_directory_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = InputWatcher::new(settings(&dir.path().join("nope"), Duration::ZERO));
    match watcher.start() {
        Err(AutoleetError::DirectoryNotFound(path)) => assert!(path.ends_with("nope")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("watching a missing directory should fail"),
    }
}

#[tokio::test]
async fn run_on_missing_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = InputWatcher::new(settings(&dir.path().join("nope"), Duration::ZERO));
    let err = watcher.run(&CountingHandler::default()).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn filters_extensions_and_directories() {
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = InputWatcher::new(settings(dir.path(), Duration::ZERO));
    let handler = CountingHandler::default();

    let txt = dir.path().join("notes.txt");
    std::fs::write(&txt, b"x").unwrap();
    let folder = dir.path().join("album.png");
    std::fs::create_dir(&folder).unwrap();
    let upper = dir.path().join("SHOT.PNG");
    std::fs::write(&upper, b"img").unwrap();

    assert!(!watcher.offer(&txt, &handler).await.unwrap());
    assert!(!watcher.offer(&folder, &handler).await.unwrap());
    assert!(!watcher.offer(&dir.path().join("gone.png"), &handler).await.unwrap());
    assert!(watcher.offer(&upper, &handler).await.unwrap());

    assert_eq!(*handler.seen.lock().unwrap(), vec![upper]);
}

#[tokio::test]
async fn burst_within_cooldown_is_processed_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = InputWatcher::new(settings(dir.path(), Duration::from_secs(60)));
    let handler = CountingHandler::default();

    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    std::fs::write(&a, b"img-a").unwrap();
    std::fs::write(&b, b"img-b").unwrap();

    assert!(watcher.offer(&a, &handler).await.unwrap());
    assert!(!watcher.offer(&b, &handler).await.unwrap());
    assert!(!watcher.state().is_processing());
    assert_eq!(handler.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fatal_handler_error_propagates_and_clears_processing() {
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = InputWatcher::new(settings(dir.path(), Duration::ZERO));
    let shot = dir.path().join("a.png");
    std::fs::write(&shot, b"img").unwrap();

    let err = watcher.offer(&shot, &FatalHandler).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(!watcher.state().is_processing());
}

#[tokio::test]
async fn live_watch_delivers_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().to_path_buf();
    let handler = Arc::new(CountingHandler::default());

    let task = {
        let handler = handler.clone();
        let source = source.clone();
        tokio::spawn(async move {
            let mut watcher = InputWatcher::new(settings(&source, Duration::ZERO));
            watcher.run(handler.as_ref()).await
        })
    };

    // Give the back-end a moment to register the watch.
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(source.join("ignored.txt"), b"text").unwrap();
    std::fs::write(source.join("two_sum.png"), b"fake image bytes").unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if !handler.seen.lock().unwrap().is_empty() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no artifact delivered"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    task.abort();

    let seen = handler.seen.lock().unwrap();
    assert!(seen.iter().all(|p| p.ends_with("two_sum.png")), "{seen:?}");
}
