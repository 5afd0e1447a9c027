use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tempfile::tempdir;
use walkdir::WalkDir;

use treescan::finder::dedup::DedupTable;
use treescan::finder::filter::{IdClause, OwnerFilter, SizeFilter, TimeField, TimeWindow};
use treescan::finder::fs::EntryKind;
use treescan::finder::heap::{HeapOrder, TopK};
use treescan::finder::queue::QueuePolicy;
use treescan::finder::{
    CollectingSink, Diagnostics, Finder, MemoryFileSystem, RankMetric, Ranking, ScanOptions,
    TypeMask, ValuePredicates,
};

const POLICIES: [QueuePolicy; 3] = [QueuePolicy::Lifo, QueuePolicy::Fifo, QueuePolicy::InodeOrder];

/// 3 levels, 4 directories per level, 3 files per directory
fn wide_tree(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fn fill(dir: &Path, level: usize) -> std::io::Result<()> {
        for f in 0..3 {
            File::create(dir.join(format!("file{}.dat", f)))?.write_all(&vec![b'x'; f * 10])?;
        }
        if level == 0 {
            return Ok(());
        }
        for d in 0..4 {
            let sub = dir.join(format!("dir{}", d));
            fs::create_dir(&sub)?;
            fill(&sub, level - 1)?;
        }
        Ok(())
    }
    fill(root, 3)?;
    Ok(())
}

fn memory_tree(fs: &mut MemoryFileSystem) {
    for a in 0..5 {
        for b in 0..3 {
            fs.dir(format!("/t/d{}/e{}", a, b));
            for f in 0..4 {
                fs.file(format!("/t/d{}/e{}/f{}", a, b, f), (a * 100 + b * 10 + f) as u64);
            }
        }
    }
}

fn scan(finder: Finder, root: &str) -> Result<(u64, Vec<PathBuf>), Box<dyn std::error::Error>> {
    let sink = Arc::new(CollectingSink::new());
    let report = finder
        .with_sink(sink.clone())
        .with_diagnostics(Arc::new(Diagnostics::captured("treescan")))
        .run(&[PathBuf::from(root)])?;
    let mut paths = sink.paths();
    paths.sort();
    Ok((report.matched, paths))
}

#[test]
fn test_matches_walkdir_on_a_real_tree() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    wide_tree(dir.path())?;

    let mut expected: Vec<PathBuf> = WalkDir::new(dir.path())
        .min_depth(1)
        .into_iter()
        .map(|e| e.map(|e| e.into_path()))
        .collect::<Result<_, _>>()?;
    expected.sort();

    let root = dir.path().to_string_lossy().to_string();
    for policy in POLICIES {
        for threads in [1, 2, 5, 8] {
            for inline in [0, 2, u64::MAX] {
                let options = ScanOptions::new()
                    .with_threads(threads)
                    .with_queue_policy(policy)
                    .with_inline_threshold(inline);
                let (matched, paths) = scan(Finder::new(options), &root)?;
                assert_eq!(matched, expected.len() as u64, "{} threads, {}", threads, policy);
                assert_eq!(paths, expected);
            }
        }
    }
    Ok(())
}

#[test]
fn test_untrusted_link_counts_still_find_everything() -> Result<(), Box<dyn std::error::Error>> {
    let mut reference = MemoryFileSystem::new();
    memory_tree(&mut reference);
    let (expected, expected_paths) = scan(
        Finder::new(ScanOptions::new().with_threads(1)).with_filesystem(reference),
        "/t",
    )?;
    // 5 + 15 directories, 60 files
    assert_eq!(expected, 80);

    for nlink in [0, 1] {
        for threads in [1, 4] {
            let mut fs = MemoryFileSystem::new().with_directory_link_count(nlink);
            memory_tree(&mut fs);
            let finder = Finder::new(ScanOptions::new().with_threads(threads)).with_filesystem(fs);
            let (matched, paths) = scan(finder, "/t")?;
            assert_eq!(matched, expected, "nlink {} with {} threads", nlink, threads);
            assert_eq!(paths, expected_paths);
        }
    }

    let mut fs = MemoryFileSystem::new().with_unknown_types();
    memory_tree(&mut fs);
    let (matched, _) = scan(Finder::new(ScanOptions::new()).with_filesystem(fs), "/t")?;
    assert_eq!(matched, expected);
    Ok(())
}

#[test]
fn test_largest_three_of_ten() -> Result<(), Box<dyn std::error::Error>> {
    for threads in [1, 3, 8] {
        let mut fs = MemoryFileSystem::new();
        for i in 0..10u64 {
            fs.file(format!("/r/s{}/f{}", i % 3, i), i * 100);
        }
        let options = ScanOptions::new()
            .with_threads(threads)
            .with_ranking(Some(Ranking::new(RankMetric::Largest, 3)));
        let report = Finder::new(options)
            .with_filesystem(fs)
            .with_types(TypeMask::empty().with(TypeMask::FILE))
            .with_sink(Arc::new(CollectingSink::new()))
            .run(&[PathBuf::from("/r")])?;

        let keys: Vec<i64> = report.ranking.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![900, 800, 700]);
        assert_eq!(report.ranking[0].path, PathBuf::from("/r/s0/f9"));
    }
    Ok(())
}

#[test]
fn test_hardlinked_file_counts_once_in_disk_usage() -> Result<(), Box<dyn std::error::Error>> {
    let mut fs = MemoryFileSystem::new();
    fs.file("/r/a/data", 4096)
        .hardlink("/r/a/data", "/r/b/again")
        .hardlink("/r/a/data", "/r/c/third")
        .file("/r/c/plain", 1024);

    for threads in [1, 4] {
        let report = Finder::new(ScanOptions::new().with_threads(threads).with_disk_usage(true))
            .with_filesystem(fs.clone())
            .with_sink(Arc::new(CollectingSink::new()))
            .run(&[PathBuf::from("/r")])?;
        // 8 blocks for the linked file, 2 for the plain one
        assert_eq!(report.disk_usage_blocks, 10);
        assert_eq!(report.matched, 7);
    }
    Ok(())
}

#[test]
fn test_hardlink_dedup_can_be_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let mut fs = MemoryFileSystem::new();
    fs.file("/r/a/data", 4096).hardlink("/r/a/data", "/r/b/again");

    for (dedup, blocks) in [(true, 8), (false, 16)] {
        let options = ScanOptions::new()
            .with_disk_usage(true)
            .with_hardlink_dedup(dedup);
        let report = Finder::new(options)
            .with_filesystem(fs.clone())
            .with_sink(Arc::new(CollectingSink::new()))
            .run(&[PathBuf::from("/r")])?;
        assert_eq!(report.disk_usage_blocks, blocks, "dedup {}", dedup);
    }
    Ok(())
}

/// Entries with distinct times and owners:
///
/// | path        | mtime | atime | uid | gid |
/// |-------------|-------|-------|-----|-----|
/// | /r/a        | 100   | 900   | 0   | 0   |
/// | /r/a/old    | 100   | 600   | 7   | 0   |
/// | /r/b        | 500   | 700   | 0   | 0   |
/// | /r/b/mid    | 300   | 300   | 0   | 80  |
/// | /r/new      | 800   | 100   | 0   | 0   |
fn aged_tree() -> MemoryFileSystem {
    let mut fs = MemoryFileSystem::new();
    fs.file("/r/a/old", 10)
        .file("/r/b/mid", 20)
        .file("/r/new", 30)
        .set_times("/r/a", 100, 900)
        .set_times("/r/a/old", 100, 600)
        .set_times("/r/b", 500, 700)
        .set_times("/r/b/mid", 300, 300)
        .set_times("/r/new", 800, 100)
        .set_owner("/r/a/old", 7, 0)
        .set_owner("/r/b/mid", 0, 80);
    fs
}

fn select(predicates: ValuePredicates) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let finder = Finder::new(ScanOptions::new().with_threads(2))
        .with_filesystem(aged_tree())
        .with_predicates(predicates);
    Ok(scan(finder, "/r")?.1)
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

#[test]
fn test_time_window_selects_by_mtime_or_atime() -> Result<(), Box<dyn std::error::Error>> {
    let between = TimeWindow::new(TimeField::Modified, Some(400), Some(200))?;
    assert_eq!(select(ValuePredicates::new().with_time(between))?, paths(&["/r/b/mid"]));

    let recently_read = TimeWindow::new(TimeField::Accessed, None, Some(500))?;
    assert_eq!(
        select(ValuePredicates::new().with_time(recently_read))?,
        paths(&["/r/a", "/r/a/old", "/r/b"])
    );

    let older = TimeWindow::new(TimeField::Modified, Some(300), None)?;
    assert_eq!(
        select(ValuePredicates::new().with_time(older))?,
        paths(&["/r/a", "/r/a/old"])
    );
    Ok(())
}

#[test]
fn test_owner_filter_ors_uid_and_gid() -> Result<(), Box<dyn std::error::Error>> {
    let either = OwnerFilter {
        uid: Some(IdClause { ids: vec![7], negated: false }),
        gid: Some(IdClause { ids: vec![80], negated: false }),
    };
    assert_eq!(
        select(ValuePredicates::new().with_owner(either))?,
        paths(&["/r/a/old", "/r/b/mid"])
    );

    let not_seven = OwnerFilter {
        uid: Some(IdClause { ids: vec![7], negated: true }),
        gid: None,
    };
    assert_eq!(
        select(ValuePredicates::new().with_owner(not_seven))?,
        paths(&["/r/a", "/r/b", "/r/b/mid", "/r/new"])
    );
    Ok(())
}

#[test]
fn test_time_rankings_are_best_first() -> Result<(), Box<dyn std::error::Error>> {
    let cases = [
        (RankMetric::MostRecentlyModified, vec![800, 500]),
        (RankMetric::LeastRecentlyModified, vec![100, 100]),
        (RankMetric::MostRecentlyAccessed, vec![900, 700]),
        (RankMetric::LeastRecentlyAccessed, vec![100, 300]),
    ];
    for (metric, expected) in cases {
        let report = Finder::new(ScanOptions::new().with_ranking(Some(Ranking::new(metric, 2))))
            .with_filesystem(aged_tree())
            .with_sink(Arc::new(CollectingSink::new()))
            .run(&[PathBuf::from("/r")])?;
        let keys: Vec<i64> = report.ranking.iter().map(|r| r.key).collect();
        assert_eq!(keys, expected, "{:?}", metric);
    }
    Ok(())
}

#[test]
fn test_type_mask_on_special_kinds() -> Result<(), Box<dyn std::error::Error>> {
    let build = |fs: &mut MemoryFileSystem| {
        fs.file("/r/dev/plain", 1)
            .special("/r/dev/pipe", EntryKind::Fifo)
            .special("/r/dev/sock", EntryKind::Socket)
            .special("/r/dev/blk", EntryKind::BlockDevice)
            .special("/r/dev/chr", EntryKind::CharDevice)
            .special("/r/link", EntryKind::Symlink);
    };
    let mask = TypeMask::empty()
        .with(TypeMask::FIFO)
        .with(TypeMask::SOCKET)
        .with(TypeMask::CHAR_DEVICE);

    let mut typed = MemoryFileSystem::new();
    build(&mut typed);
    let mut untyped = MemoryFileSystem::new().with_unknown_types();
    build(&mut untyped);

    for fs in [typed, untyped] {
        let finder = Finder::new(ScanOptions::new()).with_filesystem(fs).with_types(mask);
        let (matched, found) = scan(finder, "/r")?;
        assert_eq!(matched, 3);
        assert_eq!(found, paths(&["/r/dev/chr", "/r/dev/pipe", "/r/dev/sock"]));
    }
    Ok(())
}

#[test]
fn test_size_predicate_skips_empty_entries() -> Result<(), Box<dyn std::error::Error>> {
    let mut fs = MemoryFileSystem::new();
    fs.file("/r/empty", 0).file("/r/one", 1).file("/r/sub/big", 5000);

    let finder = Finder::new(ScanOptions::new())
        .with_filesystem(fs)
        .with_predicates(ValuePredicates::new().with_size(SizeFilter::AtLeast(1)));
    let (matched, paths) = scan(finder, "/r")?;
    assert_eq!(matched, 2);
    assert_eq!(paths, vec![PathBuf::from("/r/one"), PathBuf::from("/r/sub/big")]);
    Ok(())
}

#[test]
fn test_concurrent_pushes_keep_at_most_k() {
    let heap = TopK::new(5, HeapOrder::Ascending);
    (0..10_000i64).into_par_iter().for_each(|i| {
        heap.push(i, format!("/p/{}", i));
    });

    let ranked = heap.into_ranked();
    let keys: Vec<i64> = ranked.iter().map(|r| r.key).collect();
    assert_eq!(keys, vec![9999, 9998, 9997, 9996, 9995]);
}

#[test]
fn test_concurrent_first_sightings_are_unique() {
    let table = DedupTable::new();
    let firsts: usize = (0..8)
        .into_par_iter()
        .map(|_| (0..1000u64).filter(|&inode| table.first_sighting(inode, 1, false)).count())
        .sum();
    assert_eq!(firsts, 1000);
    assert_eq!(table.len(), 1000);
}
