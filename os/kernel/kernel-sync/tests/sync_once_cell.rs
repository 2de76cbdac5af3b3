use kernel_sync::SyncOnceCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn set_once_then_reject() {
    let cell = SyncOnceCell::new();
    assert!(cell.get().is_none());
    assert_eq!(cell.set(5u32).copied(), Ok(5));
    assert_eq!(cell.set(6u32).err(), Some(6));
    assert_eq!(cell.get(), Some(&5));
}

#[test]
fn get_or_init_runs_once_across_threads() {
    let cell = Arc::new(SyncOnceCell::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cell = Arc::clone(&cell);
            let calls = Arc::clone(&calls);
            std::thread::spawn(move || {
                *cell.get_or_init(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    0xB8000u32
                })
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 0xB8000);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn drops_the_stored_value() {
    let marker = Arc::new(());
    {
        let cell = SyncOnceCell::new();
        assert!(cell.set(Arc::clone(&marker)).is_ok());
        assert_eq!(Arc::strong_count(&marker), 2);
    }
    assert_eq!(Arc::strong_count(&marker), 1);
}
