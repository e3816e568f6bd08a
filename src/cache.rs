use std::collections::HashMap;

use stream_graph_gpu::runtime::{Gpu, GpuGraphExec};
use tracing::{debug, error};

use crate::{
    annotation::GraphAnnotation,
    error::{GraphError, GraphResult},
};

/// Owns at most one instantiated graph per annotation
pub struct GraphCache<G: Gpu> {
    graphs: HashMap<GraphAnnotation, GpuGraphExec<G>>,
}

impl<G: Gpu> Default for GraphCache<G> {
    fn default() -> Self {
        Self { graphs: HashMap::new() }
    }
}

impl<G: Gpu> Drop for GraphCache<G> {
    fn drop(&mut self) {
        for (annotation, exec) in self.graphs.drain() {
            if let Err(err) = exec.release() {
                error!(%annotation, ?err, "failed to release cached graph");
            }
        }
    }
}

impl<G: Gpu> GraphCache<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn contains(&self, annotation: GraphAnnotation) -> bool {
        self.graphs.contains_key(&annotation)
    }

    /// Borrow the graph stored under `annotation`, ownership stays
    /// with the cache
    pub fn get(&self, annotation: GraphAnnotation) -> Option<&GpuGraphExec<G>> {
        self.graphs.get(&annotation)
    }

    pub fn annotations(&self) -> impl Iterator<Item = GraphAnnotation> + '_ {
        self.graphs.keys().copied()
    }

    /// Store `exec` under `annotation`, releasing whatever was stored
    /// there before
    ///
    /// If releasing the old graph fails the new one is still stored,
    /// but the error is returned
    pub fn put(&mut self, annotation: GraphAnnotation, exec: GpuGraphExec<G>) -> GraphResult<(), G::Error> {
        let released = match self.graphs.remove(&annotation) {
            Some(old) => {
                debug!(%annotation, "evicting previously cached graph");
                old.release()
            }
            None => Ok(()),
        };

        self.graphs.insert(annotation, exec);

        released.map_err(GraphError::Release)
    }

    /// Release every stored graph
    ///
    /// The cache is always left empty, the first release failure
    /// (if any) is returned
    pub fn clear(&mut self) -> GraphResult<(), G::Error> {
        let mut result = Ok(());

        for (annotation, exec) in self.graphs.drain() {
            if let Err(err) = exec.release() {
                error!(%annotation, ?err, "failed to release cached graph");

                if result.is_ok() {
                    result = Err(GraphError::Release(err));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn put_get_contains_clear<G: Gpu>() {
        let stream = testing::stream::<G>();
        let cell = testing::alloc(&stream, 1);
        let key = GraphAnnotation(1);

        let mut cache = GraphCache::new();
        assert!(cache.is_empty());
        assert!(cache.get(key).is_none());
        assert!(!cache.contains(key));

        cache.put(key, testing::memset_graph(&stream, cell, 1, 11)).unwrap();
        assert!(cache.contains(key));
        assert!(!cache.contains(GraphAnnotation::DEFAULT));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.annotations().collect::<Vec<_>>(), [key]);

        cache.get(key).unwrap().launch(&stream).unwrap();
        assert_eq!(testing::read(&stream, cell, 1), [11]);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!cache.contains(key));

        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    fn put_replaces_existing<G: Gpu>() {
        let stream = testing::stream::<G>();
        let cell = testing::alloc(&stream, 4);
        let key = GraphAnnotation(3);

        let mut cache = GraphCache::new();
        cache.put(key, testing::memset_graph(&stream, cell, 4, 1)).unwrap();
        cache.put(key, testing::memset_graph(&stream, cell, 4, 2)).unwrap();
        assert_eq!(cache.len(), 1);

        cache.get(key).unwrap().launch(&stream).unwrap();
        assert_eq!(testing::read(&stream, cell, 4), [2; 4]);
    }

    #[cfg(feature = "cuda")]
    mod cuda {
        use stream_graph_gpu::runtime::cuda::Cuda;

        #[test]
        fn put_get_contains_clear() {
            super::put_get_contains_clear::<Cuda>()
        }

        #[test]
        fn put_replaces_existing() {
            super::put_replaces_existing::<Cuda>()
        }
    }

    #[cfg(feature = "rocm")]
    mod rocm {
        use stream_graph_gpu::runtime::rocm::ROCm;

        #[test]
        fn put_get_contains_clear() {
            super::put_get_contains_clear::<ROCm>()
        }

        #[test]
        fn put_replaces_existing() {
            super::put_replaces_existing::<ROCm>()
        }
    }

    mod host {
        use std::collections::HashMap;

        use rand::{Rng, SeedableRng, rngs::StdRng};
        use stream_graph_gpu::runtime::host::{Host, HostError, HostFault};

        use super::*;

        #[test]
        fn put_get_contains_clear() {
            super::put_get_contains_clear::<Host>()
        }

        #[test]
        fn put_replaces_existing() {
            super::put_replaces_existing::<Host>()
        }

        #[test]
        fn replaced_graph_released_exactly_once() {
            Host::clear_faults();
            let stream = testing::stream::<Host>();
            let cell = testing::alloc(&stream, 1);
            let key = GraphAnnotation(5);
            let before = Host::stats();

            let mut cache = GraphCache::new();
            cache.put(key, testing::memset_graph(&stream, cell, 1, 1)).unwrap();
            cache.put(key, testing::memset_graph(&stream, cell, 1, 2)).unwrap();

            let after = Host::stats();
            assert_eq!(after.execs_created - before.execs_created, 2);
            assert_eq!(after.execs_destroyed - before.execs_destroyed, 1);

            drop(cache);
            let dropped = Host::stats();
            assert_eq!(dropped.execs_destroyed - before.execs_destroyed, 2);
            assert_eq!(dropped.live_execs(), before.live_execs());
        }

        #[test]
        fn failed_eviction_keeps_new_graph() {
            Host::clear_faults();
            let stream = testing::stream::<Host>();
            let cell = testing::alloc(&stream, 1);
            let key = GraphAnnotation(2);

            let mut cache = GraphCache::new();
            cache.put(key, testing::memset_graph(&stream, cell, 1, 1)).unwrap();

            Host::inject_fault(HostFault::ExecDestroy);
            let result = cache.put(key, testing::memset_graph(&stream, cell, 1, 2));
            assert!(matches!(result, Err(GraphError::Release(HostError::Injected(HostFault::ExecDestroy)))));

            cache.get(key).unwrap().launch(&stream).unwrap();
            assert_eq!(testing::read(&stream, cell, 1), [2]);
        }

        #[test]
        fn failed_clear_still_empties() {
            Host::clear_faults();
            let stream = testing::stream::<Host>();
            let cell = testing::alloc(&stream, 1);

            let mut cache = GraphCache::new();
            for id in 0..3 {
                cache.put(GraphAnnotation(id), testing::memset_graph(&stream, cell, 1, 1)).unwrap();
            }

            Host::inject_fault(HostFault::ExecDestroy);
            assert!(matches!(cache.clear(), Err(GraphError::Release(_))));
            assert!(cache.is_empty());
        }

        #[test]
        fn random_sequences_match_model() {
            Host::clear_faults();
            let stream = testing::stream::<Host>();
            let cell = testing::alloc(&stream, 1);
            let before = Host::stats();

            let mut rng = StdRng::seed_from_u64(0x5eed);
            let mut model = HashMap::new();
            let mut cache = GraphCache::new();

            for _ in 0..400 {
                let key = GraphAnnotation(rng.gen_range(0..4));

                match rng.gen_range(0..20) {
                    0..10 => {
                        let value = rng.gen_range(1..=255u8);
                        cache.put(key, testing::memset_graph(&stream, cell, 1, value)).unwrap();
                        model.insert(key, value);
                        assert!(cache.contains(key));
                    }
                    10..18 => match (cache.get(key), model.get(&key)) {
                        (Some(exec), Some(&value)) => {
                            exec.launch(&stream).unwrap();
                            assert_eq!(testing::read(&stream, cell, 1), [value]);
                        }
                        (None, None) => {}
                        _ => panic!("cache and model disagree on {key}"),
                    },
                    18 => assert_eq!(cache.contains(key), model.contains_key(&key)),
                    _ => {
                        cache.clear().unwrap();
                        model.clear();
                        assert!(!cache.contains(key));
                    }
                }

                assert_eq!(cache.len(), model.len());
                assert_eq!(Host::stats().live_execs() - before.live_execs(), model.len());
            }
        }
    }
}
