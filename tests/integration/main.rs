//! Integration tests for pkgcache

use pkgcache::config::Config;
use pkgcache::retention::AlgorithmKind;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Config rooted entirely inside `root`
fn isolated_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.journal.directory = root.join("journal");
    config.journal.cache_directory = root.join("cache");
    config.lock.directory = Some(root.join("locks"));
    config.lock.max_wait_secs = Some(30);
    config
}

fn write_package(root: &Path, name: &str, size: usize) -> PathBuf {
    let dir = root.join("cache");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, vec![0u8; size]).unwrap();
    path
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn pkgcache() -> Command {
        let mut cmd = cargo_bin_cmd!("pkgcache");
        cmd.env_remove("PKGCACHE_CONFIG").env_remove("PKGCACHE_TASK_ID");
        cmd
    }

    fn with_config(temp: &TempDir, config: &Config) -> PathBuf {
        let path = temp.path().join("config.toml");
        fs::write(&path, toml::to_string_pretty(config).unwrap()).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        pkgcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("package retention journal"));
    }

    #[test]
    fn version_displays() {
        pkgcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("pkgcache"));
    }

    #[test]
    fn config_path_honours_flag() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        pkgcache()
            .arg("--config")
            .arg(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        let config = with_config(&temp, &isolated_config(temp.path()));
        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[retention]"));
    }

    #[test]
    fn invalid_config_fails_with_message() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[retention]\npercent_free_disk_space = -5.0\n").unwrap();
        pkgcache()
            .arg("--config")
            .arg(&path)
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("percent_free_disk_space"));
    }

    #[test]
    fn list_empty_journal() {
        let temp = TempDir::new().unwrap();
        let config = with_config(&temp, &isolated_config(temp.path()));
        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::diff("[]\n"));
    }

    #[test]
    fn register_requires_task() {
        let temp = TempDir::new().unwrap();
        let config = with_config(&temp, &isolated_config(temp.path()));
        let package = write_package(temp.path(), "Acme.Web.1.0.0.zip", 16);
        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["register", "--package", "Acme.Web", "--version", "1.0.0", "--path"])
            .arg(&package)
            .assert()
            .failure()
            .stderr(predicate::str::contains("PKGCACHE_TASK_ID"));
    }

    #[test]
    fn register_list_release_retain() {
        let temp = TempDir::new().unwrap();
        let mut config = isolated_config(temp.path());
        config.retention.algorithms = vec![AlgorithmKind::Quantity];
        config.retention.max_packages = Some(1);
        let config = with_config(&temp, &config);

        let old = write_package(temp.path(), "Acme.Web.1.0.0.zip", 64);
        let new = write_package(temp.path(), "Acme.Web.2.0.0.zip", 64);

        for (version, path) in [("1.0.0", &old), ("2.0.0", &new)] {
            pkgcache()
                .arg("--config")
                .arg(&config)
                .args(["register", "-p", "Acme.Web", "--version", version, "--path"])
                .arg(path)
                .env("PKGCACHE_TASK_ID", format!("ServerTasks-{}", version))
                .assert()
                .success();
        }

        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["list", "--locked", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Acme.Web@1.0.0").and(predicate::str::contains("Acme.Web@2.0.0")));

        // Both in use: nothing may go
        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["retain", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
        assert!(old.exists());

        for version in ["1.0.0", "2.0.0"] {
            pkgcache()
                .arg("--config")
                .arg(&config)
                .args(["release", "--all", "--task"])
                .arg(format!("ServerTasks-{}", version))
                .assert()
                .success();
        }

        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["retain", "--dry-run", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Acme.Web.1.0.0.zip"));
        assert!(old.exists(), "dry run must not delete");

        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["retain", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"freed_bytes\": 64"));

        assert!(!old.exists());
        assert!(new.exists());

        pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Acme.Web@2.0.0").and(predicate::str::contains("1.0.0").not()));
    }

    #[test]
    fn concurrent_register_processes_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let config = with_config(&temp, &isolated_config(temp.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let config = config.clone();
                let path = write_package(temp.path(), &format!("Pkg{}.1.0.0.zip", i), 8);
                std::thread::spawn(move || {
                    pkgcache()
                        .arg("--config")
                        .arg(&config)
                        .args(["register", "--version", "1.0.0", "--package"])
                        .arg(format!("Pkg{}", i))
                        .arg("--path")
                        .arg(&path)
                        .args(["--task", "ServerTasks-1"])
                        .assert()
                        .success()
                        .stdout(predicate::str::contains("Registered"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let output = pkgcache()
            .arg("--config")
            .arg(&config)
            .args(["list", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(entries.len(), 8);
    }

    #[test]
    fn retain_disabled_is_noop() {
        let temp = TempDir::new().unwrap();
        let mut config = isolated_config(temp.path());
        config.retention.enabled = false;
        let config = with_config(&temp, &config);

        pkgcache()
            .arg("--config")
            .arg(&config)
            .arg("retain")
            .assert()
            .success()
            .stdout(predicate::str::contains("disabled"));
    }
}

mod journal_tests {
    use super::*;
    use pkgcache::journal::{DeploymentTaskId, PackageIdentity, PackageJournal, VersionFormat};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_registrations_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let config = Arc::new(isolated_config(temp.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let config = Arc::clone(&config);
                let path = write_package(temp.path(), &format!("pkg{}.zip", i), 10 + i);
                thread::spawn(move || {
                    let journal = PackageJournal::from_config(&config);
                    let package = PackageIdentity::new(
                        format!("Pkg{}", i),
                        "1.0.0",
                        VersionFormat::Semver,
                        "zip",
                    )
                    .unwrap();
                    let task = DeploymentTaskId::new(format!("ServerTasks-{}", i));
                    assert!(journal.register_package_use(&package, &path, &task));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = PackageJournal::from_config(&config).entries().unwrap();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|e| e.is_locked()));
    }
}

mod lock_tests {
    use super::*;
    use chrono::Utc;
    use pkgcache::lock::{
        CrossProcessLock, FsLockIo, LockIo, LockOptions, LockRecord, LockStrategy,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn options(dir: &Path, strategy: LockStrategy) -> LockOptions {
        LockOptions {
            directory: dir.to_path_buf(),
            strategy,
            poll_interval: Duration::from_millis(5),
            max_wait: Some(Duration::from_secs(30)),
            ..LockOptions::default()
        }
    }

    fn assert_mutual_exclusion(strategy: LockStrategy) {
        let temp = TempDir::new().unwrap();
        let locks = Arc::new(CrossProcessLock::new(options(temp.path(), strategy)));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _guard = locks.acquire("shared", "waiting").unwrap();
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn native_lock_excludes_threads() {
        assert_mutual_exclusion(LockStrategy::Auto);
    }

    #[test]
    fn lock_file_excludes_threads() {
        assert_mutual_exclusion(LockStrategy::LockFile);
    }

    #[test]
    fn lock_left_by_dead_process_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let io = FsLockIo::new(temp.path());
        let path = io.lock_path("journal");
        fs::create_dir_all(temp.path()).unwrap();

        // Above any Linux pid_max, so never alive
        let ghost = LockRecord::new(999_999_999, 1, "pkgcache", Utc::now());
        fs::write(&path, serde_json::to_vec(&ghost).unwrap()).unwrap();

        let locks = CrossProcessLock::new(options(temp.path(), LockStrategy::LockFile));
        let guard = locks
            .acquire_within("journal", "waiting", Duration::from_secs(5))
            .unwrap();
        assert_eq!(guard.path(), path.as_path());
        drop(guard);
        assert!(!path.exists());
    }
}
