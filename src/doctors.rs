use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::json;

use crate::auth::AuthProvider;
use crate::enrich::{average_rating, group_by, join, lookup_by_field, MissingPolicy, Rating};
use crate::error::{Alert, Result};
use crate::filter::{filter_items, Searchable};
use crate::models::{Doctor, Feedback, DOCTORS, FEEDBACK};
use crate::random::RandomSource;
use crate::store::{Cursor, Document, DocumentStore, Query, SERVER_TIMESTAMP};

pub const PAGE_SIZE: usize = 10;
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A doctor with the rating derived from their feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct DoctorCard {
    pub doctor: Doctor,
    pub rating: Rating,
    pub review_count: usize,
}

impl DoctorCard {
    pub fn fee_label(&self) -> String {
        format_fee(self.doctor.consultation_fee.as_deref())
    }
}

impl Searchable for DoctorCard {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.doctor.full_name.as_str(),
            self.doctor.address.as_deref().unwrap_or(""),
            self.doctor.specialization.as_deref().unwrap_or(""),
        ]
    }
}

pub fn format_fee(fee: Option<&str>) -> String {
    match fee.map(str::trim) {
        Some(fee) if !fee.is_empty() => format!("Rs.{}", fee),
        _ => "N/A".to_string(),
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(docs: &[Document], what: &str) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed {} {}: {}", what, doc.id, e);
                None
            }
        })
        .collect()
}

/// Attaches the average feedback rating to each doctor. Doctors without
/// feedback keep a placeholder rating.
pub async fn enrich_doctors<S: DocumentStore>(
    store: &S,
    doctors: Vec<Doctor>,
    rng: &dyn RandomSource,
) -> Result<Vec<DoctorCard>> {
    let ids: Vec<String> = doctors.iter().map(|d| d.id.clone()).collect();
    let docs = lookup_by_field(store, FEEDBACK, "doctorId", &ids).await?;
    let feedback: Vec<Feedback> = decode_all(&docs, "feedback");
    let ratings: HashMap<String, Vec<f64>> = group_by(feedback, |f| f.doctor_id.as_str())
        .into_iter()
        .map(|(id, entries)| (id, entries.iter().map(|f| f.rating).collect()))
        .collect();

    Ok(join(
        doctors,
        &ratings,
        |doctor| doctor.id.as_str(),
        MissingPolicy::UseDefault,
        |doctor, ratings| DoctorCard {
            doctor,
            rating: average_rating(ratings, rng),
            review_count: ratings.len(),
        },
    ))
}

/// Average rating and review count for a single doctor, `None` without
/// reviews.
pub async fn doctor_rating<S: DocumentStore>(
    store: &S,
    doctor_id: &str,
) -> Result<(Option<Rating>, usize)> {
    let docs = store
        .get(&Query::collection(FEEDBACK).where_eq("doctorId", doctor_id))
        .await?;
    let ratings: Vec<f64> = decode_all::<Feedback>(&docs, "feedback")
        .into_iter()
        .map(|f| f.rating)
        .collect();
    if ratings.is_empty() {
        return Ok((None, 0));
    }
    let value = ratings.iter().sum::<f64>() / ratings.len() as f64;
    Ok((
        Some(Rating {
            value,
            placeholder: false,
        }),
        ratings.len(),
    ))
}

/// Paginated doctor directory with a short-lived memo of the loaded pages.
pub struct DoctorDirectory {
    rng: Box<dyn RandomSource>,
    doctors: Vec<DoctorCard>,
    cursor: Option<Cursor>,
    exhausted: bool,
    fetched_at: Option<Instant>,
    loading: bool,
    search: String,
}

impl DoctorDirectory {
    pub fn new(rng: Box<dyn RandomSource>) -> Self {
        DoctorDirectory {
            rng,
            doctors: Vec::new(),
            cursor: None,
            exhausted: false,
            fetched_at: None,
            loading: false,
            search: String::new(),
        }
    }

    pub fn doctors(&self) -> &[DoctorCard] {
        &self.doctors
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        self.fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < CACHE_TTL)
    }

    /// Loads the first page unless a fetch succeeded within [`CACHE_TTL`].
    /// Returns whether a query was issued.
    pub async fn load<S: DocumentStore>(&mut self, store: &S, now: Instant) -> Result<bool> {
        if self.is_fresh(now) {
            debug!("Using cached doctor list");
            return Ok(false);
        }
        self.fetch(store, true, now).await?;
        Ok(true)
    }

    /// Drops the cursor and replaces the list with a fresh first page.
    pub async fn refresh<S: DocumentStore>(&mut self, store: &S, now: Instant) -> Result<()> {
        self.fetch(store, true, now).await
    }

    /// Appends the next page. A no-op once an empty page was seen or while a
    /// fetch is running.
    pub async fn load_more<S: DocumentStore>(&mut self, store: &S, now: Instant) -> Result<()> {
        if self.exhausted || self.loading {
            return Ok(());
        }
        self.fetch(store, false, now).await
    }

    async fn fetch<S: DocumentStore>(&mut self, store: &S, reset: bool, now: Instant) -> Result<()> {
        self.loading = true;
        let result = self.fetch_page(store, reset, now).await;
        self.loading = false;
        if let Err(e) = &result {
            error!("Error fetching doctors: {}", e);
        }
        result
    }

    async fn fetch_page<S: DocumentStore>(&mut self, store: &S, reset: bool, now: Instant) -> Result<()> {
        let mut query = Query::collection(DOCTORS).limit(PAGE_SIZE);
        if !reset {
            if let Some(cursor) = self.cursor.clone() {
                query = query.start_after(cursor);
            }
        }

        let docs = store.get(&query).await?;
        let Some(last) = docs.last() else {
            self.exhausted = true;
            if reset {
                self.doctors.clear();
                self.cursor = None;
            }
            return Ok(());
        };
        let cursor = query.cursor_for(last);

        let doctors: Vec<Doctor> = decode_all(&docs, "doctor");
        let cards = enrich_doctors(store, doctors, self.rng.as_ref()).await?;

        if reset {
            self.doctors = cards;
        } else {
            self.doctors.extend(cards);
        }
        self.cursor = Some(cursor);
        self.exhausted = docs.len() < PAGE_SIZE;
        self.fetched_at = Some(now);
        debug!("Loaded {} doctors", self.doctors.len());
        Ok(())
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search = query.into();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn visible(&self) -> Vec<&DoctorCard> {
        filter_items(&self.doctors, &self.search, None)
    }

    pub fn find(&self, id: &str) -> Option<&DoctorCard> {
        self.doctors.iter().find(|card| card.doctor.id == id)
    }
}

/// Rating and comment being written on a doctor's page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackDraft {
    pub rating: u8,
    pub comment: String,
}

impl FeedbackDraft {
    pub fn is_complete(&self) -> bool {
        (1..=5).contains(&self.rating) && !self.comment.trim().is_empty()
    }
}

pub async fn submit_feedback<S, A>(
    store: &S,
    auth: &A,
    doctor_id: &str,
    draft: &FeedbackDraft,
) -> Alert
where
    S: DocumentStore,
    A: AuthProvider + ?Sized,
{
    let Some(session) = auth.current_session() else {
        return Alert::warning("Login Required", "Please log in to submit feedback.");
    };
    if !draft.is_complete() {
        return Alert::error("Please provide both rating and feedback.");
    }

    let record = json!({
        "doctorId": doctor_id,
        "rating": draft.rating,
        "comment": draft.comment.trim(),
        "timestamp": SERVER_TIMESTAMP,
        "userId": session.uid,
    });
    match store.add(FEEDBACK, record).await {
        Ok(id) => {
            info!("Feedback {} submitted for doctor {}", id, doctor_id);
            Alert::success("Feedback submitted successfully.")
        }
        Err(e) => {
            error!("Error submitting feedback: {}", e);
            Alert::failed("submit feedback")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LocalAuth, Session};
    use crate::enrich::tests::{CountingStore, FailingStore};
    use crate::random::FixedRandom;
    use crate::storage::SqliteStore;

    async fn seed_doctors(store: &SqliteStore, count: usize) {
        for i in 0..count {
            store
                .set(
                    DOCTORS,
                    &format!("d{:02}", i),
                    json!({
                        "fullName": format!("Dr. {}", i),
                        "specialization": if i % 2 == 0 { "Dermatologist" } else { "Cardiologist" },
                        "address": format!("{} Mall Road, Lahore", i),
                        "consultationFee": 1500
                    }),
                )
                .await
                .unwrap();
        }
    }

    fn directory() -> DoctorDirectory {
        DoctorDirectory::new(Box::new(FixedRandom(0)))
    }

    #[test]
    fn test_fee_label() {
        assert_eq!(format_fee(Some("1500")), "Rs.1500");
        assert_eq!(format_fee(Some("")), "N/A");
        assert_eq!(format_fee(None), "N/A");
    }

    #[tokio::test]
    async fn test_pages_until_exhausted() {
        let store = SqliteStore::new(":memory:").unwrap();
        seed_doctors(&store, 23).await;
        let mut dir = directory();
        let now = Instant::now();

        assert!(dir.load(&store, now).await.unwrap());
        assert_eq!(dir.doctors().len(), 10);
        dir.load_more(&store, now).await.unwrap();
        dir.load_more(&store, now).await.unwrap();
        assert_eq!(dir.doctors().len(), 23);
        assert!(dir.exhausted());
        assert_eq!(dir.doctors()[10].doctor.id, "d10");

        dir.load_more(&store, now).await.unwrap();
        assert_eq!(dir.doctors().len(), 23);
    }

    #[tokio::test]
    async fn test_load_is_memoized_for_five_minutes() {
        let store = CountingStore::new();
        seed_doctors(&store.inner, 3).await;
        let mut dir = directory();
        let start = Instant::now();

        assert!(dir.load(&store, start).await.unwrap());
        let after_first = store.gets();
        assert!(!dir.load(&store, start + Duration::from_secs(299)).await.unwrap());
        assert_eq!(store.gets(), after_first);
        assert!(dir.load(&store, start + Duration::from_secs(301)).await.unwrap());
        assert!(store.gets() > after_first);
    }

    #[tokio::test]
    async fn test_refresh_replaces_list() {
        let store = SqliteStore::new(":memory:").unwrap();
        seed_doctors(&store, 12).await;
        let mut dir = directory();
        let now = Instant::now();
        dir.load(&store, now).await.unwrap();
        dir.load_more(&store, now).await.unwrap();
        assert_eq!(dir.doctors().len(), 12);

        store.delete(DOCTORS, "d00").await.unwrap();
        dir.refresh(&store, now).await.unwrap();
        assert_eq!(dir.doctors().len(), 10);
        assert_eq!(dir.doctors()[0].doctor.id, "d01");
        assert!(!dir.exhausted());
    }

    #[tokio::test]
    async fn test_ratings_average_feedback_or_fall_back_to_placeholder() {
        let store = SqliteStore::new(":memory:").unwrap();
        seed_doctors(&store, 2).await;
        for rating in [4, 5, 3] {
            store
                .add(FEEDBACK, json!({"doctorId": "d00", "rating": rating}))
                .await
                .unwrap();
        }
        let mut dir = directory();
        dir.load(&store, Instant::now()).await.unwrap();

        let rated = dir.find("d00").unwrap();
        assert_eq!(rated.rating.to_string(), "4.0");
        assert_eq!(rated.review_count, 3);
        assert!(!rated.rating.placeholder);

        let unrated = dir.find("d01").unwrap();
        assert!(unrated.rating.placeholder);
        assert_eq!(unrated.rating.to_string(), "4.0");
        assert_eq!(unrated.fee_label(), "Rs.1500");
    }

    #[tokio::test]
    async fn test_search_over_name_address_and_specialization() {
        let store = SqliteStore::new(":memory:").unwrap();
        seed_doctors(&store, 4).await;
        let mut dir = directory();
        dir.load(&store, Instant::now()).await.unwrap();

        dir.set_search("cardio");
        assert_eq!(dir.visible().len(), 2);
        dir.set_search("3 mall");
        assert_eq!(dir.visible()[0].doctor.id, "d03");
        dir.set_search("Dr. 2");
        assert_eq!(dir.visible().len(), 1);
    }

    #[tokio::test]
    async fn test_doctor_rating_without_reviews() {
        let store = SqliteStore::new(":memory:").unwrap();
        assert_eq!(doctor_rating(&store, "d1").await.unwrap(), (None, 0));
        store.add(FEEDBACK, json!({"doctorId": "d1", "rating": 5})).await.unwrap();
        store.add(FEEDBACK, json!({"doctorId": "d1", "rating": 4})).await.unwrap();
        let (rating, count) = doctor_rating(&store, "d1").await.unwrap();
        assert_eq!(rating.unwrap().to_string(), "4.5");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_submit_feedback_validation_and_persistence() {
        let store = SqliteStore::new(":memory:").unwrap();
        let draft = FeedbackDraft {
            rating: 4,
            comment: "  Very helpful ".to_string(),
        };

        let alert = submit_feedback(&store, &LocalAuth::default(), "d1", &draft).await;
        assert_eq!(alert.title, "Login Required");

        let auth = LocalAuth::new(Some(Session::new("u1")));
        let incomplete = FeedbackDraft {
            rating: 0,
            comment: "ok".to_string(),
        };
        let alert = submit_feedback(&store, &auth, "d1", &incomplete).await;
        assert_eq!(alert.message, "Please provide both rating and feedback.");

        let alert = submit_feedback(&store, &auth, "d1", &draft).await;
        assert!(alert.is_success());
        let saved = store
            .get(&Query::collection(FEEDBACK).where_eq("doctorId", "d1"))
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        let feedback: Feedback = saved[0].decode().unwrap();
        assert_eq!(feedback.comment.as_deref(), Some("Very helpful"));
        assert_eq!(feedback.user_id.as_deref(), Some("u1"));
        assert!(feedback.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_failed_feedback_write_raises_alert() {
        let store = FailingStore::new();
        let auth = LocalAuth::new(Some(Session::new("u1")));
        let draft = FeedbackDraft {
            rating: 4,
            comment: "Very patient with questions".to_string(),
        };
        let alert = submit_feedback(&store, &auth, "d1", &draft).await;
        assert!(!alert.is_success());
        assert_eq!(alert.message, "Failed to submit feedback.");
    }
}
