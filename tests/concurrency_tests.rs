use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use blockdb::{BlockId, Database, DbConfig, DbError};
use tempfile::TempDir;

fn open_db(dir: &TempDir, timeout: Duration) -> Arc<Database> {
    let config = DbConfig::new(dir.path().join("db"))
        .with_buffer_count(8)
        .with_sync_writes(false)
        .with_timeout(timeout);
    Arc::new(Database::open(config).unwrap())
}

#[test]
fn test_shared_lock_waits_for_writer_commit() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_secs(10));
    let b = BlockId::new("b.tbl", 0);

    let mut tx1 = db.new_transaction().unwrap();
    tx1.pin(&b).unwrap();
    tx1.set_int(&b, 0, 11).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        let b = b.clone();
        thread::spawn(move || {
            let mut tx2 = db.new_transaction().unwrap();
            tx2.pin(&b).unwrap();
            let v = tx2.get_int(&b, 0).unwrap();
            done.store(true, Ordering::SeqCst);
            tx2.commit().unwrap();
            v
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst));
    tx1.commit().unwrap();

    assert_eq!(reader.join().unwrap(), 11);
}

#[test]
fn test_lock_timeout_aborts_and_rollback_recovers() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_millis(100));
    let b = BlockId::new("b.tbl", 0);

    let mut tx1 = db.new_transaction().unwrap();
    tx1.pin(&b).unwrap();
    tx1.set_int(&b, 0, 1).unwrap();

    let mut tx2 = db.new_transaction().unwrap();
    let started = Instant::now();
    let err = tx2.pin(&b).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(err.is_abort());
    assert!(matches!(err, DbError::LockAbort { .. }));

    // Still active until the caller rolls it back.
    assert!(tx2.is_active());
    tx2.rollback().unwrap();

    tx1.commit().unwrap();
    let mut tx3 = db.new_transaction().unwrap();
    tx3.pin(&b).unwrap();
    assert_eq!(tx3.get_int(&b, 0).unwrap(), 1);
    tx3.commit().unwrap();
}

#[test]
fn test_readers_share_and_block_writer() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_millis(100));
    let b = BlockId::new("b.tbl", 0);

    let mut r1 = db.new_transaction().unwrap();
    let mut r2 = db.new_transaction().unwrap();
    r1.pin(&b).unwrap();
    r2.pin(&b).unwrap();
    assert_eq!(r1.get_int(&b, 0).unwrap(), 0);
    assert_eq!(r2.get_int(&b, 0).unwrap(), 0);

    // Neither reader can upgrade while the other holds its shared lock.
    assert!(r1.set_int(&b, 0, 5).unwrap_err().is_abort());
    r1.rollback().unwrap();

    r2.set_int(&b, 0, 5).unwrap();
    r2.commit().unwrap();
}

#[test]
fn test_concurrent_increments_are_serializable() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_millis(200));
    let counter = BlockId::new("counter.tbl", 0);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let counter = counter.clone();
            thread::spawn(move || {
                let mut done = 0;
                while done < 5 {
                    let mut tx = db.new_transaction().unwrap();
                    let attempt = (|| {
                        tx.pin(&counter)?;
                        let v = tx.get_int(&counter, 0)?;
                        tx.set_int(&counter, 0, v + 1)?;
                        tx.commit()
                    })();
                    match attempt {
                        Ok(()) => done += 1,
                        Err(e) if e.is_abort() => {
                            tx.rollback().unwrap();
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let mut tx = db.new_transaction().unwrap();
    tx.pin(&counter).unwrap();
    assert_eq!(tx.get_int(&counter, 0).unwrap(), 20);
    tx.commit().unwrap();
}

#[test]
fn test_checkpoint_waits_for_active_transactions() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_secs(5));

    let mut tx = db.new_transaction().unwrap();
    let checkpointer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let started = Instant::now();
            db.checkpoint().unwrap();
            started.elapsed()
        })
    };

    thread::sleep(Duration::from_millis(100));
    tx.commit().unwrap();
    assert!(checkpointer.join().unwrap() >= Duration::from_millis(50));
    assert_eq!(db.active_transactions(), 0);
}

#[test]
fn test_checkpoint_times_out_with_open_transaction() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_millis(50));
    let mut tx = db.new_transaction().unwrap();

    let err = db.checkpoint().unwrap_err();
    assert!(matches!(err, DbError::CheckpointAbort(_)));

    tx.commit().unwrap();
    db.checkpoint().unwrap();
    // The gate reopened after the failed attempt.
    db.new_transaction().unwrap().commit().unwrap();
}

#[test]
fn test_transaction_moves_across_threads() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir, Duration::from_secs(5));
    let b = BlockId::new("mix.tbl", 0);

    let mut writer = db.new_transaction().unwrap();
    writer.pin(&b).unwrap();
    writer.set_int(&b, 0, 1).unwrap();

    let mut reader = db.new_transaction().unwrap();
    let reader_handle = {
        let b = b.clone();
        thread::spawn(move || {
            reader.pin(&b).unwrap();
            let v = reader.get_int(&b, 0).unwrap();
            reader.commit().unwrap();
            v
        })
    };

    thread::sleep(Duration::from_millis(50));
    writer.commit().unwrap();
    assert_eq!(reader_handle.join().unwrap(), 1);
}
