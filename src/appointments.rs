use std::cmp::Ordering;

use chrono::NaiveDate;
use log::{error, info};
use serde_json::json;

use crate::auth::{AuthProvider, Session};
use crate::error::Alert;
use crate::models::{Appointment, AppointmentStatus, APPOINTMENTS};
use crate::store::{Direction, DocumentStore, Query};
use crate::sync::{ListSpec, ListState, ListSync};

const DEFAULT_SPECIALIZATION: &str = "Dermatologist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppointmentTab {
    All,
    Status(AppointmentStatus),
}

impl AppointmentTab {
    pub const TABS: [AppointmentTab; 5] = [
        AppointmentTab::All,
        AppointmentTab::Status(AppointmentStatus::Pending),
        AppointmentTab::Status(AppointmentStatus::Confirmed),
        AppointmentTab::Status(AppointmentStatus::Completed),
        AppointmentTab::Status(AppointmentStatus::Cancelled),
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AppointmentTab::All => "All",
            AppointmentTab::Status(status) => status.as_str(),
        }
    }

    pub fn includes(&self, appointment: &Appointment) -> bool {
        match self {
            AppointmentTab::All => true,
            AppointmentTab::Status(status) => appointment.status == *status,
        }
    }

    pub fn empty_message(&self) -> String {
        match self {
            AppointmentTab::All => "Your appointments will appear here".to_string(),
            AppointmentTab::Status(status) => format!(
                "Your {} appointments will appear here",
                status.as_str().to_lowercase()
            ),
        }
    }
}

pub fn count_for(appointments: &[Appointment], tab: AppointmentTab) -> usize {
    appointments.iter().filter(|a| tab.includes(a)).count()
}

pub fn tab_counts(appointments: &[Appointment]) -> Vec<(AppointmentTab, usize)> {
    AppointmentTab::TABS
        .iter()
        .map(|tab| (*tab, count_for(appointments, *tab)))
        .collect()
}

fn parse_date(date: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date.trim(), format).ok())
}

/// Newest creation time first, compared in whole seconds; appointments
/// without one, or created within the same second, fall back to the
/// appointment date, latest first.
pub fn newest_first(a: &Appointment, b: &Appointment) -> Ordering {
    let created_a = a.created_at.map(|t| t.timestamp()).unwrap_or(0);
    let created_b = b.created_at.map(|t| t.timestamp()).unwrap_or(0);
    created_b
        .cmp(&created_a)
        .then_with(|| parse_date(&b.date).cmp(&parse_date(&a.date)))
}

pub fn display_specialization(appointment: &Appointment) -> &str {
    appointment
        .specialization
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SPECIALIZATION)
}

/// Text encoded into the appointment's QR code.
pub fn qr_payload(appointment: &Appointment) -> String {
    json!({
        "appointmentId": appointment.id,
        "patientName": appointment.user_name,
        "patientAge": appointment.user_age,
        "patientMobile": appointment.user_mobile,
        "doctorName": appointment.doctor_name,
        "date": appointment.date,
        "time": appointment.time,
        "status": appointment.status.as_str(),
    })
    .to_string()
}

pub fn list_spec() -> ListSpec<Appointment> {
    ListSpec {
        query: Box::new(|session: &Session| {
            Query::collection(APPOINTMENTS)
                .where_eq("userId", session.uid.as_str())
                .order_by("createdAt", Direction::Descending)
        }),
        map: |doc, _| Ok(Some(doc.decode()?)),
        order: newest_first,
    }
}

pub async fn delete_appointment<S: DocumentStore>(store: &S, id: &str) -> Alert {
    match store.delete(APPOINTMENTS, id).await {
        Ok(()) => {
            info!("Deleted appointment {}", id);
            Alert::success("Appointment deleted successfully.")
        }
        Err(e) => {
            error!("Error deleting appointment {}: {}", id, e);
            Alert::failed("delete appointment")
        }
    }
}

/// Starts the live query behind the appointment list.
pub fn subscribe<S, A>(store: &S, auth: &A) -> ListSync<Appointment>
where
    S: DocumentStore,
    A: AuthProvider + ?Sized,
{
    ListSync::start(store, auth, list_spec())
}

/// The patient's appointment list with its tab, selection and pending delete.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentList {
    state: ListState<Appointment>,
    selected_tab: AppointmentTab,
    selected: Option<String>,
    pending_delete: Option<String>,
}

impl Default for AppointmentList {
    fn default() -> Self {
        AppointmentList {
            state: ListState {
                items: Vec::new(),
                loading: true,
                error: None,
            },
            selected_tab: AppointmentTab::All,
            selected: None,
            pending_delete: None,
        }
    }
}

impl AppointmentList {
    /// Takes a state published by the live query. A selection whose
    /// appointment is gone is cleared.
    pub fn apply(&mut self, state: ListState<Appointment>) {
        self.state = state;
        if let Some(id) = &self.selected {
            if !self.state.items.iter().any(|a| &a.id == id) {
                self.selected = None;
            }
        }
    }

    pub fn state(&self) -> &ListState<Appointment> {
        &self.state
    }

    pub fn selected_tab(&self) -> AppointmentTab {
        self.selected_tab
    }

    pub fn select_tab(&mut self, tab: AppointmentTab) {
        self.selected_tab = tab;
    }

    pub fn visible(&self) -> Vec<&Appointment> {
        self.state
            .items
            .iter()
            .filter(|a| self.selected_tab.includes(a))
            .collect()
    }

    pub fn counts(&self) -> Vec<(AppointmentTab, usize)> {
        tab_counts(&self.state.items)
    }

    pub fn select(&mut self, id: &str) {
        self.selected = Some(id.to_string());
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Appointment> {
        let id = self.selected.as_ref()?;
        self.state.items.iter().find(|a| &a.id == id)
    }

    pub fn request_delete(&mut self, id: &str) {
        self.pending_delete = Some(id.to_string());
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    /// Hands out the id awaiting confirmation; pass it to
    /// [`delete_appointment`].
    pub fn confirm_delete(&mut self) -> Option<String> {
        self.pending_delete.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LocalAuth, Session};
    use crate::enrich::tests::FailingStore;
    use crate::storage::SqliteStore;
    use chrono::{TimeZone, Utc};

    fn appointment(id: &str, status: AppointmentStatus, created: Option<i64>, date: &str) -> Appointment {
        Appointment {
            id: id.to_string(),
            user_id: "u1".to_string(),
            doctor_name: "Dr. Sana".to_string(),
            specialization: None,
            date: date.to_string(),
            time: "10:00 AM".to_string(),
            status,
            user_name: "Ali".to_string(),
            user_age: Some("34".to_string()),
            user_mobile: Some("03001234567".to_string()),
            created_at: created.map(|ms| Utc.timestamp_millis_opt(ms).unwrap()),
        }
    }

    #[test]
    fn test_tab_counts() {
        use AppointmentStatus::*;
        let items = vec![
            appointment("a1", Pending, Some(1), "2025-01-01"),
            appointment("a2", Pending, Some(2), "2025-01-01"),
            appointment("a3", Confirmed, Some(3), "2025-01-01"),
            appointment("a4", Cancelled, Some(4), "2025-01-01"),
        ];
        let counts = tab_counts(&items);
        assert_eq!(counts[0], (AppointmentTab::All, 4));
        assert_eq!(counts[1], (AppointmentTab::Status(Pending), 2));
        assert_eq!(counts[2], (AppointmentTab::Status(Confirmed), 1));
        assert_eq!(counts[3], (AppointmentTab::Status(Completed), 0));
        assert_eq!(counts[4], (AppointmentTab::Status(Cancelled), 1));
    }

    #[test]
    fn test_newest_first_falls_back_to_date() {
        use AppointmentStatus::*;
        let mut items = vec![
            appointment("old", Pending, Some(1_000), "2025-05-01"),
            appointment("undated-early", Pending, None, "2025-01-01"),
            appointment("new", Pending, Some(5_000), "2024-01-01"),
            appointment("undated-late", Pending, None, "2025-06-01"),
            appointment("tied-late", Pending, Some(1_000), "2025-07-01"),
        ];
        items.sort_by(newest_first);
        let ids: Vec<_> = items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["new", "tied-late", "old", "undated-late", "undated-early"]
        );
    }

    #[test]
    fn test_same_second_creation_falls_back_to_date() {
        use AppointmentStatus::*;
        let earlier_date = appointment("later-ms", Pending, Some(7_900), "2025-01-01");
        let later_date = appointment("earlier-ms", Pending, Some(7_100), "2025-02-01");
        assert_eq!(newest_first(&earlier_date, &later_date), Ordering::Greater);

        let next_second = appointment("next-second", Pending, Some(8_000), "2024-01-01");
        assert_eq!(newest_first(&next_second, &later_date), Ordering::Less);
    }

    #[test]
    fn test_qr_payload_fields() {
        let payload = qr_payload(&appointment("a1", AppointmentStatus::Confirmed, None, "2025-01-01"));
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["appointmentId"], "a1");
        assert_eq!(value["patientAge"], "34");
        assert_eq!(value["status"], "Confirmed");
        assert_eq!(value["doctorName"], "Dr. Sana");
    }

    #[test]
    fn test_display_specialization_default() {
        let mut a = appointment("a1", AppointmentStatus::Pending, None, "2025-01-01");
        assert_eq!(display_specialization(&a), "Dermatologist");
        a.specialization = Some("Cardiologist".to_string());
        assert_eq!(display_specialization(&a), "Cardiologist");
    }

    #[test]
    fn test_empty_messages() {
        assert_eq!(
            AppointmentTab::All.empty_message(),
            "Your appointments will appear here"
        );
        assert_eq!(
            AppointmentTab::Status(AppointmentStatus::Cancelled).empty_message(),
            "Your cancelled appointments will appear here"
        );
    }

    #[tokio::test]
    async fn test_list_tracks_store_and_deletes() {
        let store = SqliteStore::new(":memory:").unwrap();
        for (id, status, created) in [("a1", "Pending", 1_000), ("a2", "Confirmed", 2_000)] {
            store
                .set(
                    APPOINTMENTS,
                    id,
                    json!({"userId": "u1", "status": status, "createdAt": created, "date": "2025-01-01"}),
                )
                .await
                .unwrap();
        }
        store
            .set(APPOINTMENTS, "other", json!({"userId": "u2", "status": "Pending"}))
            .await
            .unwrap();

        let auth = LocalAuth::new(Some(Session::new("u1")));
        let mut feed = subscribe(&store, &auth);
        let mut list = AppointmentList::default();
        assert!(list.state().loading);
        list.apply(feed.next().await.unwrap().clone());
        let ids: Vec<_> = list.visible().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);

        list.select_tab(AppointmentTab::Status(AppointmentStatus::Pending));
        assert_eq!(list.visible().len(), 1);

        list.select("a1");
        list.request_delete("a1");
        let id = list.confirm_delete().unwrap();
        let alert = delete_appointment(&store, &id).await;
        assert_eq!(alert.message, "Appointment deleted successfully.");
        assert!(list.pending_delete().is_none());

        list.apply(feed.next().await.unwrap().clone());
        assert!(list.visible().is_empty());
        assert!(list.selected().is_none());
        assert_eq!(list.counts()[0], (AppointmentTab::All, 1));
    }

    #[test]
    fn test_confirm_without_request_does_nothing() {
        let mut list = AppointmentList::default();
        list.request_delete("a1");
        list.cancel_delete();
        assert!(list.confirm_delete().is_none());
    }

    #[tokio::test]
    async fn test_failed_delete_raises_alert() {
        let store = FailingStore::new();
        let alert = delete_appointment(&store, "a1").await;
        assert_eq!(alert.title, "Error");
        assert_eq!(alert.message, "Failed to delete appointment.");
    }
}
