//! Behaviour that only one driver exposes: worker lifecycle for the pool
//! driver, watcher lifecycle for the native one.

mod common;

use std::sync::Arc;
use std::time::Duration;

use afio::{Driver, FileError, Whence};
use afio_core::worker::Worker;
use afio_module::InlineWorkerFactory;
use common::*;

mod mocked {
    use super::*;

    #[tokio::test]
    async fn failed_close_replaces_the_worker() {
        init_tracing();
        let sandbox = Sandbox::new();
        let factory = Arc::new(InlineWorkerFactory::new());
        let driver = mocked_driver(Arc::clone(&factory));

        let file = driver.open(&sandbox.seeded("test.txt"), "r").await.unwrap();
        factory.fail("close");
        file.close();
        drop(file);
        factory.heal("close");

        let workers = factory.created();
        assert_eq!(workers.len(), 1);
        assert!(!workers[0].is_running());

        assert!(driver.is_file(&sandbox.path("test.txt")).await.unwrap());
        let workers = factory.created();
        assert_eq!(workers.len(), 2);
        assert!(workers[1].is_running());
        assert_eq!(driver.pool().len(), 1);
    }

    #[tokio::test]
    async fn failed_read_closes_the_handle() {
        let sandbox = Sandbox::new();
        let factory = Arc::new(InlineWorkerFactory::new());
        let driver = mocked_driver(Arc::clone(&factory));

        let file = driver.open(&sandbox.seeded("test.txt"), "r").await.unwrap();
        factory.fail("read");

        let err = file.read(0, None, None).await.unwrap_err();
        assert!(matches!(err, FileError::Task { .. }));
        assert!(err.to_string().starts_with("Reading from the file failed."));
        assert!(!file.is_open());
    }

    #[tokio::test]
    async fn failed_write_fails_the_writes_behind_it() {
        let sandbox = Sandbox::new();
        let factory = Arc::new(InlineWorkerFactory::new());
        let driver = mocked_driver(Arc::clone(&factory));

        let file = driver.open(&sandbox.path("test.txt"), "w").await.unwrap();
        factory.fail("write");

        let (first, second) = futures::join!(
            file.write(b"a".to_vec(), None),
            file.write(b"b".to_vec(), None),
        );
        assert!(matches!(first, Err(FileError::Task { .. })));
        assert!(second.is_err());
        assert!(!file.is_open());
        assert!(sandbox.contents("test.txt").is_empty());
    }

    #[tokio::test]
    async fn failed_copy_keeps_the_handle_open() {
        let sandbox = Sandbox::new();
        let factory = Arc::new(InlineWorkerFactory::new());
        let driver = mocked_driver(Arc::clone(&factory));

        let file = driver.open(&sandbox.seeded("test.txt"), "r").await.unwrap();
        factory.fail("copy");

        let err = file.copy(&sandbox.path("copy.txt")).await.unwrap_err();
        assert!(err.to_string().starts_with("Copying the file failed."));
        assert!(file.is_open());
        assert_eq!(file.read(3, None, None).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn each_open_file_pins_a_worker() {
        let sandbox = Sandbox::new();
        let factory = Arc::new(InlineWorkerFactory::new());
        let driver = mocked_driver(Arc::clone(&factory));
        let path = sandbox.seeded("test.txt");

        let first = driver.open(&path, "r").await.unwrap();
        let second = driver.open(&path, "r").await.unwrap();
        assert_eq!(factory.created().len(), 2);
        assert_eq!(driver.pool().idle(), 0);

        drop(first);
        assert_eq!(driver.pool().idle(), 1);
        drop(second);
        assert_eq!(driver.pool().idle(), 2);
    }
}

mod native {
    use super::*;

    async fn settle(driver: &afio::AioDriver) {
        for _ in 0..100 {
            if driver.poll().requests() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn watcher_follows_the_request_count() {
        init_tracing();
        let sandbox = Sandbox::new();
        for disable_uring in [false, true] {
            let driver = native_driver(disable_uring);
            assert!(!driver.poll().is_active());

            let file = driver.open(&sandbox.seeded("test.txt"), "r+").await.unwrap();
            file.write(b"!".to_vec(), None).await.unwrap();
            file.seek(0, Whence::Start, None).await.unwrap();
            assert_eq!(file.read(1, None, None).await.unwrap(), b"!");
            file.stat().await.unwrap();
            assert_eq!(driver.poll().requests(), 0);
            assert!(!driver.poll().is_active());

            file.close();
            settle(&driver).await;
            assert_eq!(driver.poll().requests(), 0);
            assert!(!driver.poll().is_active());
        }
    }

    #[tokio::test]
    async fn timed_out_write_still_lands() {
        let sandbox = Sandbox::new();
        let driver = native_driver(true);
        let file = driver.open(&sandbox.path("test.txt"), "w").await.unwrap();

        match file.write(WRITE_STRING.to_vec(), Some(Duration::ZERO)).await {
            Ok(_) => {}
            Err(e) => assert!(e.is_timeout()),
        }
        file.write(b"!".to_vec(), None).await.unwrap();

        assert_eq!(sandbox.contents("test.txt"), [WRITE_STRING, &b"!"[..]].concat());
        assert!(file.is_open());
    }

    #[tokio::test]
    async fn dropped_handle_releases_its_descriptor() {
        let sandbox = Sandbox::new();
        let driver = native_driver(false);
        let path = sandbox.seeded("test.txt");

        for _ in 0..32 {
            let file = driver.open(&path, "r").await.unwrap();
            assert_eq!(file.read(0, None, None).await.unwrap(), WRITE_STRING);
        }
        settle(&driver).await;
        assert_eq!(driver.poll().requests(), 0);
    }
}
