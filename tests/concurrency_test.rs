use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tempfile::TempDir;

use pathdex::{Config, DocumentContent, IndexManager, SearchOptions};

fn open(dir: &TempDir) -> IndexManager {
    let mut config = Config::new(dir.path());
    config.background_compaction = false;
    IndexManager::open(config).unwrap()
}

fn sources(hits: Vec<pathdex::SearchHit>) -> Vec<String> {
    hits.into_iter().map(|hit| hit.source_id).collect()
}

#[test]
fn test_snapshot_isolation() -> pathdex::Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let index = open(&temp_dir);

    index.index_document("a", DocumentContent::text("fox"))?;
    let snapshot = index.snapshot();

    index.index_document("b", DocumentContent::text("fox"))?;
    index.index_document("a", DocumentContent::text("dog"))?;

    let old = index.search_snapshot(&snapshot, "fox", SearchOptions::new())?;
    assert_eq!(sources(old), vec!["a"]);
    assert!(index.search_snapshot(&snapshot, "dog", SearchOptions::new())?.is_empty());

    assert_eq!(sources(index.search("fox")?), vec!["b"]);
    assert_eq!(sources(index.search("dog")?), vec!["a"]);
    assert_eq!(index.stats().active_readers, 1);
    drop(snapshot);
    assert_eq!(index.stats().active_readers, 0);
    Ok(())
}

#[test]
fn test_concurrent_writers_and_readers() {
    let temp_dir = TempDir::new().unwrap();
    let index = Arc::new(open(&temp_dir));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let source = format!("w{}-{}", w, i);
                    index.index_document(&source, DocumentContent::text("common words here")).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let index = index.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut seen = 0;
                while !done.load(Ordering::Acquire) {
                    let snapshot = index.snapshot();
                    let hits = index.search_snapshot(&snapshot, "common", SearchOptions::new()).unwrap();
                    // Writers only add documents, so visible results never shrink.
                    assert!(hits.len() >= seen);
                    assert_eq!(hits.len() as u64, snapshot.doc_count());
                    seen = hits.len();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(index.search("common").unwrap().len(), 100);
}

#[test]
fn test_same_source_writes_serialize() {
    let temp_dir = TempDir::new().unwrap();
    let index = Arc::new(open(&temp_dir));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    index.index_document("shared", DocumentContent::text(format!("t{} round{}", t, i))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let meta = index.document("shared").unwrap();
    assert_eq!(meta.version, 40);
    assert_eq!(index.snapshot().doc_count(), 1);
    // Only the last write's terms are visible.
    let rounds: usize = (0..10).map(|i| index.search(&format!("round{}", i)).unwrap().len()).sum();
    assert_eq!(rounds, 1);
}

#[test]
fn test_compaction_preserves_results() -> pathdex::Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let index = open(&temp_dir);

    for round in 0..5 {
        for i in 0..10 {
            let text = format!("stable doc{} round{}", i, round);
            index.index_document(&format!("doc{}", i), DocumentContent::text(text))?;
        }
    }
    index.remove_document("doc3")?;

    let queries = ["stable", "round4", "round0", "doc3 OR doc4", "stable AND NOT doc5"];
    let before: Vec<_> = queries.iter().map(|q| index.search(q)).collect::<pathdex::Result<_>>()?;
    let retired = index.stats().retired_postings;
    assert!(retired > 0);

    let report = index.compact()?;
    assert_eq!(report.postings_dropped as u64, retired);
    assert_eq!(index.stats().retired_postings, 0);

    let after: Vec<_> = queries.iter().map(|q| index.search(q)).collect::<pathdex::Result<_>>()?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_background_compaction_runs() -> pathdex::Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::new(temp_dir.path());
    config.compaction_threshold = 0.0;
    config.compaction_min_retired = 1;
    let index = IndexManager::open(config)?;

    index.index_document("a", DocumentContent::text("first version"))?;
    index.index_document("a", DocumentContent::text("second version"))?;

    // The pass runs on its own thread; give it a bounded amount of time.
    let mut compacted = false;
    for _ in 0..200 {
        if index.stats().retired_postings == 0 {
            compacted = true;
            break;
        }
        thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(compacted);
    assert_eq!(sources(index.search("version")?), vec!["a"]);
    Ok(())
}
