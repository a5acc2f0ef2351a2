use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use pathdex::{Config, DocumentContent, ErrorKind, IndexManager, PathContent};

fn config(path: &Path) -> Config {
    let mut config = Config::new(path);
    config.background_compaction = false;
    config
}

fn sources(index: &IndexManager, query: &str) -> Vec<String> {
    index.search(query).unwrap().into_iter().map(|hit| hit.source_id).collect()
}

/// Copies the index directory as a crash would leave it.
fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

#[test]
fn test_reopen_after_close() -> pathdex::Result<()> {
    let temp_dir = TempDir::new().unwrap();

    let index = IndexManager::open(config(temp_dir.path()))?;
    index.index_document("doc1", DocumentContent::text("the quick brown fox"))?;
    index.index_document("doc2", DocumentContent::text("the lazy fox"))?;
    index.index_document("book.xml", DocumentContent::structured(vec![
        PathContent::new(["book", "chapter1"], "intro text"),
    ]))?;
    index.remove_document("doc2")?;
    let before = index.search("fox OR intro")?;
    index.close()?;

    let index = IndexManager::open(config(temp_dir.path()))?;
    assert_eq!(index.search("fox OR intro")?, before);
    assert_eq!(sources(&index, "path:/book/chapter1 intro"), vec!["book.xml"]);
    assert!(index.document("doc2")?.deleted);

    // Ids keep counting from where the previous session stopped.
    let next = index.index_document("doc3", DocumentContent::text("new"))?;
    assert_eq!(next.value(), 3);
    Ok(())
}

#[test]
fn test_wal_replay_after_crash() -> pathdex::Result<()> {
    let live_dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();

    let mut cfg = config(live_dir.path());
    cfg.checkpoint_every = 0;
    let index = IndexManager::open(cfg)?;
    index.index_document("a", DocumentContent::text("alpha"))?;
    index.checkpoint()?;
    index.index_document("b", DocumentContent::text("alpha beta"))?;
    index.index_document("a", DocumentContent::text("gamma"))?;
    index.remove_document("b")?;
    index.index_document("c", DocumentContent::text("gamma delta"))?;

    copy_dir(live_dir.path(), crash_dir.path());
    let expected = index.search("alpha OR beta OR gamma OR delta")?;
    drop(index);

    let recovered = IndexManager::open(config(crash_dir.path()))?;
    assert_eq!(recovered.search("alpha OR beta OR gamma OR delta")?, expected);
    assert_eq!(sources(&recovered, "gamma"), vec!["a", "c"]);
    assert!(sources(&recovered, "alpha").is_empty());
    assert_eq!(recovered.document("a")?.version, 2);
    // Replayed records are folded into a fresh checkpoint.
    assert_eq!(recovered.stats().wal_records_since_checkpoint, 0);
    Ok(())
}

#[test]
fn test_torn_wal_tail_is_discarded() -> pathdex::Result<()> {
    let live_dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();

    let index = IndexManager::open(config(live_dir.path()))?;
    index.index_document("a", DocumentContent::text("alpha"))?;
    index.index_document("b", DocumentContent::text("beta"))?;
    copy_dir(live_dir.path(), crash_dir.path());
    drop(index);

    // Chop the last record in half.
    let wal_dir = crash_dir.path().join("wal");
    let mut logs: Vec<_> = fs::read_dir(&wal_dir).unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    logs.sort();
    let last = logs.last().unwrap();
    let len = fs::metadata(last).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(last).unwrap();
    file.set_len(len - 5).unwrap();
    drop(file);

    let recovered = IndexManager::open(config(crash_dir.path()))?;
    assert_eq!(sources(&recovered, "alpha"), vec!["a"]);
    assert!(sources(&recovered, "beta").is_empty());
    Ok(())
}

#[test]
fn test_corrupted_checkpoint_refuses_to_open() {
    let temp_dir = TempDir::new().unwrap();

    let index = IndexManager::open(config(temp_dir.path())).unwrap();
    index.index_document("a", DocumentContent::text("alpha beta gamma")).unwrap();
    index.close().unwrap();

    let data_dir = temp_dir.path().join("data");
    let postings = fs::read_dir(&data_dir).unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("postings_"))
        .unwrap();
    let mut bytes = fs::read(&postings).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&postings, bytes).unwrap();

    let err = IndexManager::open(config(temp_dir.path())).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Corruption);
}

#[test]
fn test_directory_is_locked_while_open() {
    let temp_dir = TempDir::new().unwrap();

    let index = IndexManager::open(config(temp_dir.path())).unwrap();
    let err = IndexManager::open(config(temp_dir.path())).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    index.close().unwrap();
    assert!(IndexManager::open(config(temp_dir.path())).is_ok());
}

#[test]
fn test_timed_out_writes_leave_no_trace() -> pathdex::Result<()> {
    let temp_dir = TempDir::new().unwrap();

    let index = IndexManager::open(config(temp_dir.path()))?;
    let mut outcomes = Vec::new();
    for i in 0..20 {
        let source = format!("doc{}", i);
        let term = format!("unique{}", i);
        let result = index.index_document_with_timeout(&source, DocumentContent::text(term.clone()), Duration::ZERO);
        match &result {
            Ok(_) => {}
            Err(e) => assert_eq!(e.kind(), ErrorKind::Timeout),
        }
        outcomes.push((source, term, result.is_ok()));
    }

    let check = |index: &IndexManager| {
        for (source, term, committed) in &outcomes {
            let hits = sources(index, term);
            if *committed {
                assert_eq!(&hits, &vec![source.clone()]);
            } else {
                assert!(hits.is_empty(), "{} became visible after timing out", source);
            }
        }
    };

    check(&index);
    index.close()?;
    let index = IndexManager::open(config(temp_dir.path()))?;
    check(&index);
    Ok(())
}
