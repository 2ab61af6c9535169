//! Cross-entity enrichment: batched lookups of referenced ids and the joins
//! that attach the results to primary records.

use std::collections::{HashMap, HashSet};
use std::fmt;

use futures_util::future::try_join_all;
use log::debug;
use serde_json::Value;

use crate::error::Result;
use crate::random::RandomSource;
use crate::store::{Document, DocumentStore, Query, MAX_BATCH};

/// What a join does with a primary record whose secondary entity is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Leave the record out of the result.
    Drop,
    /// Keep the record, joined with `S::default()`.
    UseDefault,
}

/// Distinct ids in first-seen order.
pub fn distinct_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

pub fn batches(ids: &[String]) -> Vec<Vec<String>> {
    ids.chunks(MAX_BATCH).map(<[String]>::to_vec).collect()
}

/// Issues one query per batch of at most [`MAX_BATCH`] ids, all in flight at
/// once, and waits for every one of them. Any failed batch fails the lookup.
pub async fn batch_lookup<S, F>(store: &S, ids: &[String], make_query: F) -> Result<Vec<Document>>
where
    S: DocumentStore,
    F: Fn(Vec<String>) -> Query,
{
    let lookups = batches(ids).into_iter().map(|batch| {
        let query = make_query(batch);
        async move { store.get(&query).await }
    });
    let results = try_join_all(lookups).await?;
    debug!("Resolved {} ids in {} batches", ids.len(), results.len());
    Ok(results.into_iter().flatten().collect())
}

/// Documents of `collection` whose id is in `ids`, keyed by id.
pub async fn lookup_by_ids<S: DocumentStore>(
    store: &S,
    collection: &str,
    ids: &[String],
) -> Result<HashMap<String, Document>> {
    let docs = batch_lookup(store, ids, |batch| {
        Query::collection(collection).where_id_in(batch)
    })
    .await?;
    Ok(docs.into_iter().map(|doc| (doc.id.clone(), doc)).collect())
}

/// Documents of `collection` whose `field` holds one of `ids`.
pub async fn lookup_by_field<S: DocumentStore>(
    store: &S,
    collection: &str,
    field: &str,
    ids: &[String],
) -> Result<Vec<Document>> {
    batch_lookup(store, ids, |batch| {
        let values = batch.into_iter().map(Value::String).collect();
        Query::collection(collection).where_in(field, values)
    })
    .await
}

/// Groups records by a string key, keeping their order within each group.
pub fn group_by<T>(items: Vec<T>, key: impl Fn(&T) -> &str) -> HashMap<String, Vec<T>> {
    let mut groups: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        groups.entry(key(&item).to_string()).or_default().push(item);
    }
    groups
}

/// Attaches to each primary record the secondary entity its key refers to,
/// applying `policy` when the key is not in `lookup`.
pub fn join<P, S, V>(
    primary: Vec<P>,
    lookup: &HashMap<String, S>,
    key: impl Fn(&P) -> &str,
    policy: MissingPolicy,
    mut combine: impl FnMut(P, &S) -> V,
) -> Vec<V>
where
    S: Default,
{
    let fallback = S::default();
    primary
        .into_iter()
        .filter_map(|record| {
            let found = lookup.get(key(&record));
            match (found, policy) {
                (Some(secondary), _) => Some(combine(record, secondary)),
                (None, MissingPolicy::Drop) => None,
                (None, MissingPolicy::UseDefault) => Some(combine(record, &fallback)),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub value: f64,
    /// Generated because there was no feedback to average.
    pub placeholder: bool,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.value)
    }
}

/// Mean of `ratings`; with no ratings, a placeholder drawn from `[4.0, 5.0)`.
pub fn average_rating(ratings: &[f64], rng: &dyn RandomSource) -> Rating {
    if ratings.is_empty() {
        return Rating {
            value: 4.0 + rng.next_f64(),
            placeholder: true,
        };
    }
    Rating {
        value: ratings.iter().sum::<f64>() / ratings.len() as f64,
        placeholder: false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use crate::random::{FixedRandom, SystemRng};
    use crate::storage::SqliteStore;
    use crate::store::Subscription;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts `get` calls made through it.
    pub(crate) struct CountingStore {
        pub inner: SqliteStore,
        pub gets: AtomicUsize,
    }

    impl CountingStore {
        pub fn new() -> Self {
            CountingStore {
                inner: SqliteStore::new(":memory:").unwrap(),
                gets: AtomicUsize::new(0),
            }
        }

        pub fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    impl DocumentStore for CountingStore {
        async fn get(&self, query: &Query) -> Result<Vec<Document>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(query).await
        }

        async fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Document>> {
            self.inner.get_doc(collection, id).await
        }

        async fn add(&self, collection: &str, data: Value) -> Result<String> {
            self.inner.add(collection, data).await
        }

        async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
            self.inner.set(collection, id, data).await
        }

        async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
            self.inner.update(collection, id, fields).await
        }

        async fn delete(&self, collection: &str, id: &str) -> Result<()> {
            self.inner.delete(collection, id).await
        }

        fn subscribe(&self, query: Query) -> Subscription {
            self.inner.subscribe(query)
        }
    }

    /// Serves reads from an in-memory store and rejects every write.
    pub(crate) struct FailingStore {
        pub inner: SqliteStore,
    }

    impl FailingStore {
        pub fn new() -> Self {
            FailingStore {
                inner: SqliteStore::new(":memory:").unwrap(),
            }
        }
    }

    fn rejected() -> Error {
        Error::Backend("write rejected".to_string())
    }

    impl DocumentStore for FailingStore {
        async fn get(&self, query: &Query) -> Result<Vec<Document>> {
            self.inner.get(query).await
        }

        async fn get_doc(&self, collection: &str, id: &str) -> Result<Option<Document>> {
            self.inner.get_doc(collection, id).await
        }

        async fn add(&self, _collection: &str, _data: Value) -> Result<String> {
            Err(rejected())
        }

        async fn set(&self, _collection: &str, _id: &str, _data: Value) -> Result<()> {
            Err(rejected())
        }

        async fn update(&self, _collection: &str, _id: &str, _fields: Value) -> Result<()> {
            Err(rejected())
        }

        async fn delete(&self, _collection: &str, _id: &str) -> Result<()> {
            Err(rejected())
        }

        fn subscribe(&self, query: Query) -> Subscription {
            self.inner.subscribe(query)
        }
    }

    #[test]
    fn test_distinct_ids_keep_first_seen_order() {
        let ids = distinct_ids(["d2", "d1", "d2", "d3", "d1"]);
        assert_eq!(ids, vec!["d2", "d1", "d3"]);
    }

    #[test]
    fn test_batches_hold_at_most_ten() {
        for n in [0usize, 1, 9, 10, 11, 20, 25] {
            let ids: Vec<String> = (0..n).map(|i| format!("d{}", i)).collect();
            let chunks = batches(&ids);
            assert_eq!(chunks.len(), (n + 9) / 10);
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= MAX_BATCH));
            assert_eq!(chunks.concat(), ids);
        }
    }

    #[tokio::test]
    async fn test_one_lookup_per_batch() {
        let store = CountingStore::new();
        for i in 0..23 {
            store
                .inner
                .set("doctors", &format!("d{:02}", i), json!({"fullName": format!("Dr {}", i)}))
                .await
                .unwrap();
        }
        let ids: Vec<String> = (0..23).map(|i| format!("d{:02}", i)).collect();

        let found = lookup_by_ids(&store, "doctors", &ids).await.unwrap();
        assert_eq!(found.len(), 23);
        assert_eq!(store.gets(), 3);
    }

    #[tokio::test]
    async fn test_no_ids_means_no_lookups() {
        let store = CountingStore::new();
        let found = lookup_by_ids(&store, "doctors", &[]).await.unwrap();
        assert!(found.is_empty());
        assert_eq!(store.gets(), 0);
    }

    #[tokio::test]
    async fn test_lookup_by_field_collects_all_batches() {
        let store = CountingStore::new();
        store.inner.add("feedback", json!({"doctorId": "d1", "rating": 4})).await.unwrap();
        store.inner.add("feedback", json!({"doctorId": "d1", "rating": 5})).await.unwrap();
        store.inner.add("feedback", json!({"doctorId": "d12", "rating": 3})).await.unwrap();
        let ids: Vec<String> = (0..12).map(|i| format!("d{}", i)).collect();

        let docs = lookup_by_field(&store, "feedback", "doctorId", &ids).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(store.gets(), 2);
    }

    #[test]
    fn test_join_policies() {
        let lookup: HashMap<String, String> =
            [("d1".to_string(), "Dr. Sana".to_string())].into_iter().collect();
        let primary = vec![("c1", "d1"), ("c2", "d9")];

        let dropped = join(primary.clone(), &lookup, |p| p.1, MissingPolicy::Drop, |p, name| {
            format!("{}:{}", p.0, name)
        });
        assert_eq!(dropped, vec!["c1:Dr. Sana"]);

        let kept = join(primary, &lookup, |p| p.1, MissingPolicy::UseDefault, |p, name| {
            format!("{}:{}", p.0, name)
        });
        assert_eq!(kept, vec!["c1:Dr. Sana", "c2:"]);
    }

    #[test]
    fn test_average_rating() {
        let rating = average_rating(&[4.0, 5.0, 3.0], &FixedRandom(0));
        assert_eq!(rating.to_string(), "4.0");
        assert!(!rating.placeholder);

        let rating = average_rating(&[5.0, 4.0], &FixedRandom(0));
        assert_eq!(rating.to_string(), "4.5");
    }

    #[test]
    fn test_placeholder_rating_within_bounds() {
        let rng = SystemRng::new();
        for _ in 0..100 {
            let rating = average_rating(&[], &rng);
            assert!(rating.placeholder);
            assert!((4.0..=5.0).contains(&rating.value));
            let shown: f64 = rating.to_string().parse().unwrap();
            assert!((4.0..=5.0).contains(&shown));
        }
        assert_eq!(average_rating(&[], &FixedRandom(u32::MAX)).to_string(), "5.0");
    }

    #[test]
    fn test_group_by() {
        let groups = group_by(vec![("d1", 4), ("d2", 5), ("d1", 3)], |r| r.0);
        assert_eq!(groups["d1"], vec![("d1", 4), ("d1", 3)]);
        assert_eq!(groups["d2"].len(), 1);
    }
}
