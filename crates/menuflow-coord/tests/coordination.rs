//! Multi-session coordination scenarios.
//!
//! Time-sensitive tests run on paused tokio time, so sleeps and deadlines
//! advance instantly and deterministically.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio::time::Instant;

use common::{GatedFetcher, RecordingExpiry, SlowLoader};
use menuflow_coord::{
    CatalogFallback, Coordinator, CoordinatorConfig, ExpiryHandler, Freshness, SessionState,
};

fn coordinator(dir: &TempDir, loader: Arc<SlowLoader>, fetcher: Arc<GatedFetcher>) -> Coordinator {
    let config = CoordinatorConfig::new().with_asset_dir(dir.path().join("images"));
    Coordinator::new(config, loader, fetcher)
}

fn idle_coordinator(dir: &TempDir) -> Coordinator {
    coordinator(dir, SlowLoader::new(Duration::ZERO), GatedFetcher::new(Duration::ZERO))
}

#[tokio::test(start_paused = true)]
async fn test_ten_sessions_share_one_catalog_load() -> Result<()> {
    let dir = TempDir::new()?;
    let loader = SlowLoader::new(Duration::from_millis(200));
    let coord = coordinator(&dir, Arc::clone(&loader), GatedFetcher::new(Duration::ZERO));

    let start = Instant::now();
    let mut tasks = Vec::new();
    for n in 0..10u64 {
        let coord = coord.clone();
        tasks.push(tokio::spawn(async move {
            // Arrivals spread over a 100ms window.
            tokio::time::sleep(Duration::from_millis(n * 10)).await;
            let session = format!("50455500{n:02}");
            coord.touch_session(&session);
            coord.fetch_catalog(CatalogFallback::Fail).await
        }));
    }

    for task in tasks {
        let catalog = task.await??;
        assert_eq!(catalog.freshness, Freshness::Fresh);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.items[0].available, 1);
    }

    assert_eq!(loader.calls(), 1);
    assert!(start.elapsed() < Duration::from_millis(250));

    let stats = coord.stats();
    assert_eq!(stats.catalog.loads, 1);
    assert_eq!(stats.catalog.coalesced, 9);
    assert_eq!(stats.active_sessions, 10);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_catalog_reloads_after_ttl() -> Result<()> {
    let dir = TempDir::new()?;
    let loader = SlowLoader::new(Duration::from_millis(10));
    let coord = coordinator(&dir, Arc::clone(&loader), GatedFetcher::new(Duration::ZERO));

    coord.fetch_catalog(CatalogFallback::Fail).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    let cached = coord.fetch_catalog(CatalogFallback::Fail).await?;
    assert_eq!(cached.items[0].available, 1);
    assert_eq!(loader.calls(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let reloaded = coord.fetch_catalog(CatalogFallback::Fail).await?;
    assert_eq!(reloaded.items[0].available, 2);
    assert_eq!(loader.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_last_good_catalog_served_when_upstream_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let loader = SlowLoader::new(Duration::from_millis(10));
    let coord = coordinator(&dir, Arc::clone(&loader), GatedFetcher::new(Duration::ZERO));

    coord.fetch_catalog(CatalogFallback::Fail).await?;
    tokio::time::sleep(Duration::from_secs(7)).await;
    loader.set_failing(true);

    let stale = coord.fetch_catalog(CatalogFallback::LastGood).await?;
    match stale.freshness {
        Freshness::Stale { age } => assert!(age >= Duration::from_secs(7)),
        other => panic!("expected stale catalog, got {other:?}"),
    }
    assert_eq!(stale.items[0].available, 1);

    let err = coord.fetch_catalog(CatalogFallback::Fail).await.unwrap_err();
    assert!(err.is_upstream_unavailable());

    let empty = coord.fetch_catalog(CatalogFallback::Empty).await?;
    assert_eq!(empty.freshness, Freshness::Empty);
    assert!(empty.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_catalog_load_timeout_is_upstream_unavailable() -> Result<()> {
    let dir = TempDir::new()?;
    let loader = SlowLoader::new(Duration::from_secs(60));
    let config = CoordinatorConfig::new()
        .with_asset_dir(dir.path())
        .with_catalog_timeout(Duration::from_secs(2));
    let coord = Coordinator::new(config, loader, GatedFetcher::new(Duration::ZERO));

    let start = Instant::now();
    let err = coord.fetch_catalog(CatalogFallback::Fail).await.unwrap_err();
    assert!(err.is_upstream_unavailable());
    assert!(start.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_newer_request_supersedes_older() -> Result<()> {
    let dir = TempDir::new()?;
    let loader = SlowLoader::new(Duration::from_millis(200));
    let coord = coordinator(&dir, Arc::clone(&loader), GatedFetcher::new(Duration::ZERO));

    let first = coord.begin_cancelable_operation("s1");
    let old = {
        let coord = coord.clone();
        let first = first.clone();
        tokio::spawn(async move { first.guard(coord.fetch_catalog(CatalogFallback::Fail)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = coord.begin_cancelable_operation("s1");
    assert!(!coord.is_current("s1", first.token()));
    assert!(coord.is_current("s1", second.token()));

    let old_result = old.await?;
    assert!(old_result.unwrap_err().is_superseded());

    let catalog = second
        .guard(coord.fetch_catalog(CatalogFallback::Fail))
        .await?;
    assert_eq!(catalog.len(), 2);
    assert!(second.checkpoint().is_ok());

    // Abandoning the first wait did not restart the load.
    assert_eq!(loader.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expiry_invalidates_running_operation() -> Result<()> {
    let dir = TempDir::new()?;
    let expiry = Arc::new(RecordingExpiry::default());
    let coord =
        idle_coordinator(&dir).with_expiry_handler(Arc::clone(&expiry) as Arc<dyn ExpiryHandler>);

    coord.touch_session_for("s1", Duration::from_secs(1));
    coord.touch_session_for("s2", Duration::from_secs(5));
    let op = coord.begin_cancelable_operation("s1");

    let work = op.guard(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, menuflow_coord::Error>(())
    });
    let err = work.await.unwrap_err();
    assert!(err.is_superseded());

    assert_eq!(expiry.expired(), vec!["s1".to_string()]);
    assert_eq!(coord.session_state("s1"), Some(SessionState::Expired));
    assert_eq!(coord.session_state("s2"), Some(SessionState::Active));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_activity_keeps_session_alive() -> Result<()> {
    let dir = TempDir::new()?;
    let expiry = Arc::new(RecordingExpiry::default());
    let coord =
        idle_coordinator(&dir).with_expiry_handler(Arc::clone(&expiry) as Arc<dyn ExpiryHandler>);

    for _ in 0..5 {
        coord.touch_session_for("s1", Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(45)).await;
    }
    assert!(expiry.expired().is_empty());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(expiry.expired(), vec!["s1".to_string()]);

    // Quiet for much longer: still exactly one expiry.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(expiry.expired().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_downloads_bounded_by_limiter() -> Result<()> {
    let dir = TempDir::new()?;
    let fetcher = GatedFetcher::new(Duration::from_millis(50));
    let coord = coordinator(&dir, SlowLoader::new(Duration::ZERO), Arc::clone(&fetcher));

    let mut tasks = Vec::new();
    for id in 1..=8 {
        let coord = coord.clone();
        tasks.push(tokio::spawn(async move {
            coord.download_asset(&common::asset(id)).await
        }));
    }
    for task in tasks {
        let path = task.await??;
        assert!(path.starts_with(dir.path().join("images")));
        assert!(path.is_file());
    }

    assert_eq!(fetcher.calls(), 8);
    assert!(fetcher.peak() <= 3);
    let stats = coord.stats().limiter;
    assert_eq!(stats.in_use, 0);
    assert!(stats.peak_in_use <= 3);
    Ok(())
}

#[tokio::test]
async fn test_superseded_download_gives_up_its_place() -> Result<()> {
    let dir = TempDir::new()?;
    let fetcher = GatedFetcher::new(Duration::from_millis(200));
    let config = CoordinatorConfig::new()
        .with_asset_dir(dir.path())
        .with_download_concurrency(1);
    let coord = Coordinator::new(config, SlowLoader::new(Duration::ZERO), fetcher.clone());

    let holder = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.download_asset(&common::asset(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let op = coord.begin_cancelable_operation("s1");
    let queued = {
        let coord = coord.clone();
        let op = op.clone();
        tokio::spawn(async move { coord.download_for(&op, &common::asset(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coord.stats().limiter.waiting, 1);

    coord.end_session("s1");
    assert!(queued.await?.unwrap_err().is_superseded());
    holder.await??;

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(coord.stats().limiter.waiting, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_begins_keep_newest_operation() -> Result<()> {
    let dir = TempDir::new()?;
    let coord = idle_coordinator(&dir);

    for round in 0..500 {
        let session = format!("s{round}");
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let coord = coord.clone();
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                coord.begin_cancelable_operation(&session)
            }));
        }
        let mut ops = Vec::new();
        for task in tasks {
            ops.push(task.await?);
        }

        let newest = ops.iter().map(|op| op.token()).max().unwrap();
        assert!(coord.is_current(&session, newest));
        assert_eq!(ops.iter().filter(|op| op.is_current()).count(), 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expiry_never_cancels_work_started_after_retouch() -> Result<()> {
    let dir = TempDir::new()?;
    let coord = idle_coordinator(&dir);

    for round in 0..200 {
        let session = format!("s{round}");
        coord.touch_session_for(&session, Duration::from_millis(1));
        tokio::time::timeout(Duration::from_secs(5), async {
            while coord.session_state(&session) != Some(SessionState::Expired) {
                tokio::task::yield_now().await;
            }
        })
        .await?;

        // The next inbound event lands right behind the expiry.
        coord.touch_session_for(&session, Duration::from_secs(60));
        let op = coord.begin_cancelable_operation(&session);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(op.is_current(), "round {round}: fresh operation was cancelled");
        coord.end_session(&session);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_purge_spares_assets_handed_to_other_sessions() -> Result<()> {
    let dir = TempDir::new()?;
    let fetcher = GatedFetcher::new(Duration::from_millis(5));
    let coord = coordinator(&dir, SlowLoader::new(Duration::ZERO), fetcher);

    let purger = {
        let coord = coord.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                coord.purge_assets().await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, menuflow_coord::Error>(())
        })
    };

    let mut downloads = Vec::new();
    for id in 1..=6 {
        let coord = coord.clone();
        downloads.push(tokio::spawn(async move {
            coord.download_asset(&common::asset(id)).await
        }));
    }
    let mut paths = Vec::new();
    for download in downloads {
        paths.push(download.await??);
    }
    purger.await??;
    coord.purge_assets().await?;

    for path in paths {
        assert!(path.is_file(), "{} was purged while still fresh", path.display());
    }
    Ok(())
}
