//! Hot reload: lookups follow new versions without being blocked.

mod helpers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use geolize::{GeoRecord, GeoService, Network, TableBuilder};
use helpers::*;

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_external_checkpoint_change_is_picked_up() {
    let (_dir, mut config) = data_dir_with_base();
    config.require_watcher = true;
    let service = GeoService::start(config.clone()).await.unwrap();
    assert!(service.is_watching().await);

    // Another writer publishes a database and then moves the checkpoint.
    TableBuilder::new("GeoLite2-City")
        .insert(
            Network::host("1.2.3.4".parse().unwrap()),
            GeoRecord {
                country: Some(country("JP")),
                ..Default::default()
            },
        )
        .write(config.database_path())
        .unwrap();
    let tmp = config.data_dir.join("version.new");
    std::fs::write(&tmp, "external-1").unwrap();
    std::fs::rename(&tmp, config.version_file()).unwrap();

    assert!(eventually(|| service.version() == "external-1").await);
    let found = service.lookup(&["1.2.3.4"]).unwrap().remove(0).unwrap();
    assert_eq!(found.db_version, "external-1");
    assert_eq!(found.record.country, Some(country("JP")));

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_checkpoint_is_recreated() {
    let (_dir, mut config) = data_dir_with_base();
    config.require_watcher = true;
    let service = GeoService::start(config.clone()).await.unwrap();
    let version = service
        .update(country_override("1.2.3.4", "US"))
        .await
        .unwrap();

    std::fs::remove_file(config.version_file()).unwrap();
    let version_file = config.version_file();
    assert!(
        eventually(|| std::fs::read_to_string(&version_file).ok().as_deref()
            == Some(version.as_str()))
        .await
    );
    // Still serving the same version.
    assert_eq!(service.version(), version);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookups_stay_consistent_during_updates() {
    let (_dir, config) = data_dir_with_base();
    let service = Arc::new(GeoService::start(config).await.unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let service = Arc::clone(&service);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while !done.load(Ordering::SeqCst) {
                if let Ok(found) = service.lookup(&["1.2.3.4"]).unwrap().remove(0) {
                    let code = found.record.country.and_then(|c| c.iso_code);
                    seen.push((found.db_version, code));
                }
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    let codes = ["US", "CA", "MX", "BR", "AR", "CL"];
    let mut expected = HashMap::new();
    for code in codes {
        let version = service
            .update(country_override("1.2.3.4", code))
            .await
            .unwrap();
        expected.insert(version, code.to_string());
    }
    done.store(true, Ordering::SeqCst);

    // Every answer matches the version that produced it.
    for (version, code) in reader.await.unwrap() {
        assert_eq!(expected.get(&version), code.as_ref(), "version {version}");
    }
    service.shutdown().await;
}
