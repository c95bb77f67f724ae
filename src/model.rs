//! Records exchanged between the engine and its callers.
//!
//! Field names on the wire follow the persisted snapshot format, which is why
//! several fields carry `serde(rename)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A quota-limited resource (a pickup location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub region: String,
    pub capacity: u64,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
        capacity: u64,
    ) -> Self {
        Self { id: id.into(), name: name.into(), region: region.into(), capacity }
    }
}

/// A registered requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(rename = "nik")]
    pub national_id: String,
    #[serde(rename = "nama")]
    pub name: String,
    #[serde(rename = "whatsapp")]
    pub phone: String,
    pub email: String,
    /// Argon2 PHC string. Never leaves the engine through [`PublicUser`].
    #[serde(rename = "password")]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

/// [`User`] without its credential hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: String,
    #[serde(rename = "nik")]
    pub national_id: String,
    #[serde(rename = "nama")]
    pub name: String,
    #[serde(rename = "whatsapp")]
    pub phone: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            national_id: user.national_id.clone(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

/// Proof of one successful admission. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "location_id")]
    pub resource_id: String,
    #[serde(rename = "location_name")]
    pub resource_name: String,
    pub ticket_number: String,
    /// Redemption code.
    pub code: String,
    pub time_slot: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".into(),
            national_id: "3171234567890001".into(),
            name: "SITI".into(),
            phone: "081234567890".into(),
            email: "siti@example.com".into(),
            credential_hash: "$argon2id$v=19$...".into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn user_uses_stored_field_names() {
        let json = serde_json::to_value(user()).unwrap();
        assert_eq!(json["nik"], "3171234567890001");
        assert_eq!(json["nama"], "SITI");
        assert_eq!(json["whatsapp"], "081234567890");
        assert!(json["password"].as_str().unwrap().starts_with("$argon2id"));
    }

    #[test]
    fn public_user_drops_credential_hash() {
        let json = serde_json::to_value(PublicUser::from(&user())).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["email"], "siti@example.com");
    }

    #[test]
    fn ticket_uses_location_names() {
        let ticket = Ticket {
            id: "t1".into(),
            user_id: "u1".into(),
            resource_id: "juanda".into(),
            resource_name: "Butik Juanda".into(),
            ticket_number: "AAA-001".into(),
            code: "A1B2C3".into(),
            time_slot: "08:00-09:00".into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["location_id"], "juanda");
        assert_eq!(json["location_name"], "Butik Juanda");
        let back: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(back, ticket);
    }
}
