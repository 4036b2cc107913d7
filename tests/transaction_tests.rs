use std::time::Duration;

use blockdb::config::{MIN_BLOCK_SIZE, MIN_LOGGED_FILENAME_LEN};
use blockdb::{BlockId, Database, DbConfig, DbError, TxState};
use tempfile::TempDir;

fn open_db(dir: &TempDir) -> Database {
    let config = DbConfig::new(dir.path().join("db"))
        .with_block_size(400)
        .with_buffer_count(3)
        .with_sync_writes(false);
    Database::open(config).unwrap()
}

fn read_int(db: &Database, block: &BlockId, offset: usize) -> i32 {
    let mut tx = db.new_transaction().unwrap();
    tx.pin(block).unwrap();
    let v = tx.get_int(block, offset).unwrap();
    tx.commit().unwrap();
    v
}

#[test]
fn test_commit_visible_to_next_transaction() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    assert!(db.is_new());
    let a = BlockId::new("a.tbl", 0);

    let mut tx1 = db.new_transaction().unwrap();
    tx1.pin(&a).unwrap();
    tx1.set_int(&a, 4, 42).unwrap();
    tx1.commit().unwrap();
    assert_eq!(tx1.state(), TxState::Committed);

    let mut tx2 = db.new_transaction().unwrap();
    tx2.pin(&a).unwrap();
    assert_eq!(tx2.get_int(&a, 4).unwrap(), 42);
    tx2.commit().unwrap();
}

#[test]
fn test_rollback_restores_last_committed_value() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let a = BlockId::new("a.tbl", 0);

    let mut tx1 = db.new_transaction().unwrap();
    tx1.pin(&a).unwrap();
    tx1.set_int(&a, 4, 42).unwrap();
    tx1.commit().unwrap();

    let mut tx3 = db.new_transaction().unwrap();
    tx3.pin(&a).unwrap();
    tx3.set_int(&a, 4, 99).unwrap();
    assert_eq!(tx3.get_int(&a, 4).unwrap(), 99);
    tx3.rollback().unwrap();
    assert_eq!(tx3.state(), TxState::RolledBack);

    assert_eq!(read_int(&db, &a, 4), 42);
}

#[test]
fn test_rollback_restores_every_touched_field() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let blocks: Vec<BlockId> = (0..3).map(|n| BlockId::new("many.tbl", n)).collect();

    let mut setup = db.new_transaction().unwrap();
    for (n, b) in blocks.iter().enumerate() {
        setup.pin(b).unwrap();
        setup.set_int(b, 0, n as i32).unwrap();
        setup.set_string(b, 40, &format!("row-{}", n)).unwrap();
    }
    setup.commit().unwrap();

    let mut tx = db.new_transaction().unwrap();
    for b in &blocks {
        tx.pin(b).unwrap();
        tx.set_int(b, 0, -1).unwrap();
        tx.set_int(b, 0, -2).unwrap();
        tx.set_string(b, 40, "scribbled over").unwrap();
        tx.set_int(b, 200, 5).unwrap();
    }
    tx.rollback().unwrap();

    let mut check = db.new_transaction().unwrap();
    for (n, b) in blocks.iter().enumerate() {
        check.pin(b).unwrap();
        assert_eq!(check.get_int(b, 0).unwrap(), n as i32);
        assert_eq!(check.get_string(b, 40).unwrap(), format!("row-{}", n));
        assert_eq!(check.get_int(b, 200).unwrap(), 0);
    }
    check.commit().unwrap();
}

#[test]
fn test_string_fields() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let b = BlockId::new("s.tbl", 0);

    let mut tx = db.new_transaction().unwrap();
    tx.pin(&b).unwrap();
    tx.set_string(&b, 0, "hello").unwrap();
    tx.set_string(&b, 100, "").unwrap();
    assert_eq!(tx.get_string(&b, 0).unwrap(), "hello");
    assert_eq!(tx.get_string(&b, 100).unwrap(), "");

    let err = tx.set_string(&b, 390, "too long to fit").unwrap_err();
    assert!(matches!(err, DbError::PageOutOfBounds { .. }));
    assert!(!err.is_abort());
    tx.commit().unwrap();
}

#[test]
fn test_append_and_size() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut tx = db.new_transaction().unwrap();
    assert_eq!(tx.size("grow.tbl").unwrap(), 0);
    let b0 = tx.append("grow.tbl").unwrap();
    let b1 = tx.append("grow.tbl").unwrap();
    assert_eq!(b0, BlockId::new("grow.tbl", 0));
    assert_eq!(b1, BlockId::new("grow.tbl", 1));
    assert_eq!(tx.size("grow.tbl").unwrap(), 2);

    tx.pin(&b1).unwrap();
    tx.set_int(&b1, 0, 7).unwrap();
    tx.commit().unwrap();

    assert_eq!(read_int(&db, &b1, 0), 7);
}

#[test]
fn test_repeated_pins_release_on_last_unpin() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let b = BlockId::new("p.tbl", 0);

    let mut tx = db.new_transaction().unwrap();
    tx.pin(&b).unwrap();
    tx.pin(&b).unwrap();
    assert_eq!(tx.available_buffers(), 2);
    tx.unpin(&b).unwrap();
    assert_eq!(tx.available_buffers(), 2);
    tx.unpin(&b).unwrap();
    assert_eq!(tx.available_buffers(), 3);
    assert!(matches!(tx.unpin(&b), Err(DbError::BlockNotPinned(_))));
    tx.commit().unwrap();
}

#[test]
fn test_transaction_ids_increase() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let mut t1 = db.new_transaction().unwrap();
    let mut t2 = db.new_transaction().unwrap();
    assert!(t2.id() > t1.id());
    assert_eq!(db.active_transactions(), 2);
    t1.commit().unwrap();
    t2.rollback().unwrap();
    assert_eq!(db.active_transactions(), 0);
}

#[test]
fn test_terminal_transaction_is_single_use() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let b = BlockId::new("t.tbl", 0);

    let mut tx = db.new_transaction().unwrap();
    tx.pin(&b).unwrap();
    tx.commit().unwrap();
    assert!(!tx.is_active());
    assert!(matches!(
        tx.get_int(&b, 0),
        Err(DbError::TransactionFinished(_))
    ));
    assert!(matches!(tx.commit(), Err(DbError::TransactionFinished(_))));
}

#[test]
fn test_block_and_transaction_history() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let b = BlockId::new("h.tbl", 0);

    let mut tx = db.new_transaction().unwrap();
    let txid = tx.id();
    tx.pin(&b).unwrap();
    tx.set_int(&b, 0, 1).unwrap();
    tx.set_int(&b, 0, 2).unwrap();
    tx.commit().unwrap();

    let history = db.block_history(&b).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].txid(), Some(txid));

    let activity = db.transaction_history(txid).unwrap();
    let kinds: Vec<_> = activity.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec!["COMMIT", "SETINT", "SETINT", "START"]);
}

#[test]
fn test_failed_rollback_keeps_locks_until_retried() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig::new(dir.path().join("db"))
        .with_buffer_count(2)
        .with_sync_writes(false)
        .with_timeout(Duration::from_millis(200));
    let db = Database::open(config).unwrap();
    let a = BlockId::new("a.tbl", 0);

    let mut tx1 = db.new_transaction().unwrap();
    tx1.pin(&a).unwrap();
    tx1.set_int(&a, 0, 99).unwrap();
    tx1.unpin(&a).unwrap();

    // Fill the pool so undo cannot pin `a`.
    let mut tx2 = db.new_transaction().unwrap();
    tx2.pin(&BlockId::new("b.tbl", 0)).unwrap();
    tx2.pin(&BlockId::new("b.tbl", 1)).unwrap();

    let err = tx1.rollback().unwrap_err();
    assert!(matches!(err, DbError::BufferAbort { .. }));
    assert!(tx1.is_active());
    tx2.commit().unwrap();

    // The uncommitted 99 stays behind tx1's exclusive lock.
    let mut tx3 = db.new_transaction().unwrap();
    assert!(matches!(tx3.pin(&a), Err(DbError::LockAbort { .. })));
    tx3.rollback().unwrap();

    tx1.rollback().unwrap();
    assert_eq!(tx1.state(), TxState::RolledBack);
    assert_eq!(read_int(&db, &a, 0), 0);
}

#[test]
fn test_overwrite_long_string() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let a = BlockId::new("a.tbl", 0);
    let first = "x".repeat(200);
    let second = "y".repeat(200);

    let mut tx1 = db.new_transaction().unwrap();
    tx1.pin(&a).unwrap();
    tx1.set_string(&a, 0, &first).unwrap();
    tx1.commit().unwrap();

    let mut tx2 = db.new_transaction().unwrap();
    tx2.pin(&a).unwrap();
    tx2.set_string(&a, 0, &second).unwrap();
    assert_eq!(tx2.get_string(&a, 0).unwrap(), second);
    tx2.rollback().unwrap();

    let mut tx3 = db.new_transaction().unwrap();
    tx3.pin(&a).unwrap();
    assert_eq!(tx3.get_string(&a, 0).unwrap(), first);
    tx3.set_string(&a, 0, &second).unwrap();
    tx3.commit().unwrap();

    let mut tx4 = db.new_transaction().unwrap();
    tx4.pin(&a).unwrap();
    assert_eq!(tx4.get_string(&a, 0).unwrap(), second);
    tx4.commit().unwrap();
}

#[test]
fn test_smallest_block_size_can_log_updates() {
    let dir = TempDir::new().unwrap();
    let config = DbConfig::new(dir.path().join("db"))
        .with_block_size(MIN_BLOCK_SIZE)
        .with_buffer_count(3)
        .with_sync_writes(false);
    let db = Database::open(config).unwrap();
    let b = BlockId::new("f".repeat(MIN_LOGGED_FILENAME_LEN), 0);

    let mut tx = db.new_transaction().unwrap();
    tx.pin(&b).unwrap();
    tx.set_int(&b, 0, 17).unwrap();
    tx.commit().unwrap();

    assert_eq!(read_int(&db, &b, 0), 17);
}
