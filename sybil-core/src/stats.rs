use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::ImageKind;

/// Process-wide generation counters. Only ever incremented, and only after
/// an artifact has been saved. The total is derived from the per-kind counts
/// so a snapshot always adds up.
#[derive(Debug, Default)]
pub struct Counters {
    avatars: AtomicU64,
    banners: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total_generated: u64,
    pub avatars_generated: u64,
    pub banners_generated: u64,
}

impl Counters {
    pub fn record(&self, kind: ImageKind) {
        let per_kind = match kind {
            ImageKind::Avatar => &self.avatars,
            ImageKind::Banner => &self.banners,
        };
        per_kind.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let avatars_generated = self.avatars.load(Ordering::Relaxed);
        let banners_generated = self.banners.load(Ordering::Relaxed);
        CounterSnapshot {
            total_generated: avatars_generated + banners_generated,
            avatars_generated,
            banners_generated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_per_kind() {
        let counters = Counters::default();
        counters.record(ImageKind::Avatar);
        counters.record(ImageKind::Avatar);
        counters.record(ImageKind::Banner);
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                total_generated: 3,
                avatars_generated: 2,
                banners_generated: 1,
            }
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counters = Arc::new(Counters::default());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    let kind = if i % 2 == 0 {
                        ImageKind::Avatar
                    } else {
                        ImageKind::Banner
                    };
                    for _ in 0..1000 {
                        counters.record(kind);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_generated, 8000);
        assert_eq!(snapshot.avatars_generated, 4000);
        assert_eq!(snapshot.banners_generated, 4000);
    }

    #[test]
    fn snapshots_taken_during_recording_always_add_up() {
        let counters = Arc::new(Counters::default());
        let writer = {
            let counters = counters.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    let kind = if i % 3 == 0 {
                        ImageKind::Banner
                    } else {
                        ImageKind::Avatar
                    };
                    counters.record(kind);
                }
            })
        };
        while !writer.is_finished() {
            let snapshot = counters.snapshot();
            assert_eq!(
                snapshot.total_generated,
                snapshot.avatars_generated + snapshot.banners_generated
            );
        }
        writer.join().unwrap();
        assert_eq!(counters.snapshot().total_generated, 20_000);
    }
}
