use log::info;
use serde_json::json;

use crate::error::Result;
use crate::models::{
    heart_rate_collection, messages_collection, APPOINTMENTS, CHATS, DOCTORS, FEEDBACK, USERS,
};
use crate::store::{DocumentStore, Query, SERVER_TIMESTAMP};

pub const DEMO_USER: &str = "demo-user";

const DOCTORS_DATA: &[(&str, &str, &str, &str, u32, u32)] = &[
    ("dr-sana", "Dr. Sana Khan", "Dermatologist", "12 Mall Road, Lahore", 8, 2000),
    ("dr-bilal", "Dr. Bilal Ahmed", "Cardiologist", "4 Jail Road, Lahore", 12, 3500),
    ("dr-ayesha", "Dr. Ayesha Malik", "Dermatologist", "77 Clifton, Karachi", 5, 1500),
    ("dr-omar", "Dr. Omar Farooq", "General Physician", "9 Blue Area, Islamabad", 15, 1000),
];

/// Writes a small demo data set for `uid`. Does nothing when doctors exist.
pub async fn seed_demo<S: DocumentStore>(store: &S, uid: &str) -> Result<bool> {
    if !store.get(&Query::collection(DOCTORS).limit(1)).await?.is_empty() {
        return Ok(false);
    }

    store
        .set(USERS, uid, json!({"fullName": "Demo Patient", "email": "demo@example.com"}))
        .await?;

    for (id, name, specialization, address, years, fee) in DOCTORS_DATA {
        store
            .set(
                DOCTORS,
                id,
                json!({
                    "fullName": name,
                    "specialization": specialization,
                    "address": address,
                    "experienceYears": years,
                    "consultationFee": fee,
                }),
            )
            .await?;
    }

    for (doctor, rating, comment) in [
        ("dr-sana", 5, "Explained everything clearly."),
        ("dr-sana", 4, "Short wait, good advice."),
        ("dr-bilal", 3, "Helpful but rushed."),
    ] {
        store
            .add(
                FEEDBACK,
                json!({
                    "doctorId": doctor,
                    "rating": rating,
                    "comment": comment,
                    "userId": uid,
                    "timestamp": SERVER_TIMESTAMP,
                }),
            )
            .await?;
    }

    for (doctor, date, time, status) in [
        ("Dr. Sana Khan", "2025-03-14", "10:30 AM", "Pending"),
        ("Dr. Bilal Ahmed", "2025-02-20", "04:00 PM", "Confirmed"),
        ("Dr. Ayesha Malik", "2025-01-05", "11:00 AM", "Completed"),
    ] {
        store
            .add(
                APPOINTMENTS,
                json!({
                    "userId": uid,
                    "doctorName": doctor,
                    "date": date,
                    "time": time,
                    "status": status,
                    "userName": "Demo Patient",
                    "userAge": 29,
                    "userMobile": "03001234567",
                    "createdAt": SERVER_TIMESTAMP,
                }),
            )
            .await?;
    }

    for (doctor, message, sender, read) in [
        ("dr-sana", "Please send a photo of the affected area.", "dr-sana", false),
        ("dr-bilal", "Thank you, doctor.", uid, false),
    ] {
        let chat_id = store
            .add(
                CHATS,
                json!({
                    "participants": [uid, doctor],
                    "lastMessage": message,
                    "lastMessageTime": SERVER_TIMESTAMP,
                    "lastSenderId": sender,
                    "read": read,
                }),
            )
            .await?;
        let receiver = if sender == doctor { uid } else { doctor };
        store
            .add(
                &messages_collection(&chat_id),
                json!({
                    "text": message,
                    "senderId": sender,
                    "receiverId": receiver,
                    "timestamp": SERVER_TIMESTAMP,
                    "status": "delivered",
                }),
            )
            .await?;
    }

    store
        .add(
            &heart_rate_collection(uid),
            json!({"bpm": 72, "timestamp": SERVER_TIMESTAMP}),
        )
        .await?;

    info!("Seeded demo data for {}", uid);
    Ok(true)
}
