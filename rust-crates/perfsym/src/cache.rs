// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-session memoization of loaded image tables.

use crate::image::ImageTable;
use crate::locator::{normalize_filename, Locator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Memo slot of a single file. `None` records a failed lookup.
type Slot = Arc<OnceLock<Option<Arc<ImageTable>>>>;

/// Loads every image at most once and hands out shared references.
///
/// Lookups of different files proceed in parallel. Concurrent lookups of the
/// same file block until the first one finished loading it.
pub struct ImageCache {
    locator: Locator,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ImageCache {
    /// Creates an empty cache loading images through `locator`.
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Mutable access to the locator, e.g. to swap its loader.
    pub fn locator_mut(&mut self) -> &mut Locator {
        &mut self.locator
    }

    /// Returns the tables for `filename`, loading them on first access.
    ///
    /// Failures are memoized as well: a file that couldn't be loaded is
    /// never retried.
    pub fn get(&self, filename: &str) -> Option<Arc<ImageTable>> {
        let (name, _) = normalize_filename(filename);

        // Only hold the map lock while fetching the slot: loading happens
        // outside of it.
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(name) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Slot::default();
                    slots.insert(name.to_owned(), slot.clone());
                    slot
                }
            }
        };

        slot.get_or_init(|| self.locator.locate(name).map(Arc::new))
            .clone()
    }

    /// Number of distinct files requested so far.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no file was requested yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functab::{FuncRange, FuncTable};
    use crate::image;
    use crate::locator::{BuildId, BuildIdRecord, ImageLoader};
    use crate::Config;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts loads; serves a table for every path except `/missing`.
    #[derive(Clone, Default)]
    struct CountingLoader {
        images: Arc<AtomicUsize>,
        kallsyms: Arc<AtomicUsize>,
    }

    impl CountingLoader {
        fn table(name: &str) -> ImageTable {
            ImageTable {
                functab: FuncTable::new(vec![FuncRange::plain(name, 0x1000, 0x1010)]),
                ..Default::default()
            }
        }
    }

    impl ImageLoader for CountingLoader {
        fn load_image(&self, path: &Path) -> image::Result<ImageTable> {
            self.images.fetch_add(1, Ordering::SeqCst);
            // Widen the window for racing lookups.
            std::thread::sleep(Duration::from_millis(10));
            if path == Path::new("/missing") || path.starts_with("/cache") {
                return Err(image::Error::Kallsyms(std::io::ErrorKind::NotFound.into()));
            }
            Ok(Self::table("image"))
        }

        fn load_kallsyms(&self, _: &Path) -> image::Result<ImageTable> {
            self.kallsyms.fetch_add(1, Ordering::SeqCst);
            Ok(Self::table("kernel"))
        }
    }

    fn cache(loader: &CountingLoader) -> ImageCache {
        let config = Config {
            build_id_dir: "/cache".into(),
        };
        let build_ids = vec![BuildIdRecord {
            filename: "[kernel.kallsyms]".into(),
            build_id: BuildId::new([0x12, 0x34]),
        }];

        let mut locator = Locator::new(config, build_ids);
        locator.set_loader(Box::new(loader.clone()));
        ImageCache::new(locator)
    }

    #[test]
    fn loads_once() {
        let loader = CountingLoader::default();
        let cache = cache(&loader);
        assert!(cache.is_empty());

        let a = cache.get("/bin/prog").unwrap();
        let b = cache.get("/bin/prog").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.images.load(Ordering::SeqCst), 1);

        cache.get("/bin/other").unwrap();
        assert_eq!(loader.images.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failures_are_memoized() {
        let loader = CountingLoader::default();
        let cache = cache(&loader);

        assert!(cache.get("/missing").is_none());
        assert!(cache.get("/missing").is_none());
        assert_eq!(loader.images.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn kernel_aliases() {
        let loader = CountingLoader::default();
        let cache = cache(&loader);

        let a = cache.get("[kernel.kallsyms]_text").unwrap();
        let b = cache.get("[kernel.kallsyms]").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.functab.lookup(0x1000).unwrap().raw_name(), "kernel");
        assert_eq!(loader.kallsyms.load(Ordering::SeqCst), 1);
        assert_eq!(loader.images.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_lookups_load_once() {
        let loader = CountingLoader::default();
        let cache = cache(&loader);

        let tables: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.get("/bin/prog").unwrap()))
                .collect();
            handles.into_iter().map(|x| x.join().unwrap()).collect()
        });

        assert_eq!(loader.images.load(Ordering::SeqCst), 1);
        assert!(tables.windows(2).all(|x| Arc::ptr_eq(&x[0], &x[1])));
    }
}
