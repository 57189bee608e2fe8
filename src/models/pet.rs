use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{InvalidEnumInput, Resource};
use crate::errors::AppError;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PetStatus {
    Lost,
    Found,
    Resolved,
    /// Hidden by a moderator; only reachable through block/unblock
    Blocked,
}

impl PetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PetStatus::Lost => "lost",
            PetStatus::Found => "found",
            PetStatus::Resolved => "resolved",
            PetStatus::Blocked => "blocked",
        }
    }
}

impl FromStr for PetStatus {
    type Err = InvalidEnumInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lost" => Ok(PetStatus::Lost),
            "found" => Ok(PetStatus::Found),
            "resolved" => Ok(PetStatus::Resolved),
            "blocked" => Ok(PetStatus::Blocked),
            other => Err(InvalidEnumInput::new("pet status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    fn validate(&self) -> Result<(), AppError> {
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lng) {
            return Err(AppError::bad_request("coordinates out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Pet {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub pet_type: String,
    pub breed: String,
    pub color: Option<String>,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age: Option<String>,
    pub description: Option<String>,
    pub status: PetStatus,
    pub owner_id: Uuid,
    pub owner_name: String,
    pub owner_email: String,
    pub location: String,
    pub coordinates: Coordinates,
    pub reported_date: DateTime<Utc>,
    pub image_url: Option<String>,
    pub microchipped: Option<bool>,
    pub collar: Option<bool>,
    pub distinctive_features: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for Pet {
    fn resource() -> Resource {
        Resource::Pets
    }

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPet {
    pub id: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub pet_type: String,
    pub breed: String,
    pub color: Option<String>,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub owner_id: String,
    pub owner_name: String,
    pub owner_email: String,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    pub reported_date: DateTime<Utc>,
    pub image_url: Option<String>,
    pub microchipped: Option<bool>,
    pub collar: Option<bool>,
    pub distinctive_features: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbPet {
    pub const COLUMNS: &'static str = "id, name, type, breed, color, gender, size, age, description, status, owner_id, owner_name, owner_email, location, lat, lng, reported_date, image_url, microchipped, collar, distinctive_features, created_at, updated_at";
}

impl TryFrom<DbPet> for Pet {
    type Error = AppError;

    fn try_from(value: DbPet) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id)
            .map_err(|e| AppError::internal(format!("invalid pet id {}: {}", value.id, e)))?;
        let owner_id = Uuid::parse_str(&value.owner_id)
            .map_err(|e| AppError::internal(format!("pet {id}: invalid owner id: {e}")))?;
        let status = value
            .status
            .parse::<PetStatus>()
            .map_err(|e| AppError::internal(format!("pet {id}: {e}")))?;

        Ok(Pet {
            id,
            name: value.name,
            pet_type: value.pet_type,
            breed: value.breed,
            color: value.color,
            gender: value.gender,
            size: value.size,
            age: value.age,
            description: value.description,
            status,
            owner_id,
            owner_name: value.owner_name,
            owner_email: value.owner_email,
            location: value.location,
            coordinates: Coordinates {
                lat: value.lat,
                lng: value.lng,
            },
            reported_date: value.reported_date,
            image_url: value.image_url,
            microchipped: value.microchipped,
            collar: value.collar,
            distinctive_features: value.distinctive_features,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PetCreateRequest {
    #[schema(example = "Max")]
    pub name: String,
    #[serde(rename = "type")]
    #[schema(example = "Dog")]
    pub pet_type: String,
    #[schema(example = "Golden Retriever")]
    pub breed: String,
    pub color: Option<String>,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age: Option<String>,
    pub description: Option<String>,
    /// Only `lost` or `found` when reporting
    pub status: PetStatus,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    #[schema(example = "Central Park, New York")]
    pub location: String,
    pub coordinates: Coordinates,
    pub image_url: Option<String>,
    pub microchipped: Option<bool>,
    pub collar: Option<bool>,
    pub distinctive_features: Option<String>,
}

impl PetCreateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        require_text("name", &self.name)?;
        require_text("type", &self.pet_type)?;
        require_text("breed", &self.breed)?;
        require_text("location", &self.location)?;
        if !matches!(self.status, PetStatus::Lost | PetStatus::Found) {
            return Err(AppError::bad_request("status must be lost or found"));
        }
        self.coordinates.validate()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PetUpdateRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub pet_type: Option<String>,
    pub breed: Option<String>,
    pub color: Option<String>,
    pub gender: Option<String>,
    pub size: Option<String>,
    pub age: Option<String>,
    pub description: Option<String>,
    /// `lost`, `found` or `resolved`; blocking goes through its own endpoint
    pub status: Option<PetStatus>,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub image_url: Option<String>,
    pub microchipped: Option<bool>,
    pub collar: Option<bool>,
    pub distinctive_features: Option<String>,
}

impl PetUpdateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        for (field, value) in [
            ("name", &self.name),
            ("type", &self.pet_type),
            ("breed", &self.breed),
            ("location", &self.location),
        ] {
            if let Some(value) = value {
                require_text(field, value)?;
            }
        }
        if self.status == Some(PetStatus::Blocked) {
            return Err(AppError::bad_request("use the block endpoint to block a listing"));
        }
        if let Some(coordinates) = &self.coordinates {
            coordinates.validate()?;
        }
        Ok(())
    }

    /// Applies the present fields onto `pet`.
    pub fn apply(self, pet: &mut Pet) {
        if let Some(v) = self.name {
            pet.name = v;
        }
        if let Some(v) = self.pet_type {
            pet.pet_type = v;
        }
        if let Some(v) = self.breed {
            pet.breed = v;
        }
        if self.color.is_some() {
            pet.color = self.color;
        }
        if self.gender.is_some() {
            pet.gender = self.gender;
        }
        if self.size.is_some() {
            pet.size = self.size;
        }
        if self.age.is_some() {
            pet.age = self.age;
        }
        if self.description.is_some() {
            pet.description = self.description;
        }
        if let Some(v) = self.status {
            pet.status = v;
        }
        if let Some(v) = self.location {
            pet.location = v;
        }
        if let Some(v) = self.coordinates {
            pet.coordinates = v;
        }
        if self.image_url.is_some() {
            pet.image_url = self.image_url;
        }
        if self.microchipped.is_some() {
            pet.microchipped = self.microchipped;
        }
        if self.collar.is_some() {
            pet.collar = self.collar;
        }
        if self.distinctive_features.is_some() {
            pet.distinctive_features = self.distinctive_features;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UnblockPetRequest {
    /// Status to restore, `lost` when omitted
    pub status: Option<PetStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PetFilters {
    pub status: Option<PetStatus>,
    #[serde(rename = "type")]
    pub pet_type: Option<String>,
    /// Case-insensitive substring
    pub breed: Option<String>,
    /// Case-insensitive substring
    pub location: Option<String>,
    pub owner_id: Option<Uuid>,
    pub reported_after: Option<DateTime<Utc>>,
    pub reported_before: Option<DateTime<Utc>>,
    /// Ignored unless a positive integer
    pub limit: Option<String>,
    /// Ignored unless a non-negative integer
    pub offset: Option<String>,
}

impl PetFilters {
    pub fn page_size(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .map(|v| v.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn page_offset(&self) -> i64 {
        self.offset
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(0)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PetListResponse {
    pub pets: Vec<Pet>,
    pub count: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> PetCreateRequest {
        PetCreateRequest {
            name: "Max".into(),
            pet_type: "Dog".into(),
            breed: "Golden Retriever".into(),
            color: None,
            gender: None,
            size: None,
            age: None,
            description: None,
            status: PetStatus::Lost,
            owner_name: None,
            owner_email: None,
            location: "Central Park".into(),
            coordinates: Coordinates { lat: 40.78, lng: -73.96 },
            image_url: None,
            microchipped: Some(true),
            collar: None,
            distinctive_features: None,
        }
    }

    #[test]
    fn test_create_rejects_resolved_and_blocked_status() {
        let mut req = create_request();
        assert!(req.validate().is_ok());

        req.status = PetStatus::Resolved;
        assert!(req.validate().is_err());
        req.status = PetStatus::Blocked;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_create_rejects_blank_fields_and_bad_coordinates() {
        let mut req = create_request();
        req.breed = "   ".into();
        assert!(req.validate().is_err());

        let mut req = create_request();
        req.coordinates.lat = 91.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_cannot_block() {
        let req = PetUpdateRequest {
            status: Some(PetStatus::Blocked),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_lenient_pagination() {
        let filters = PetFilters {
            limit: Some("abc".into()),
            offset: Some("-3".into()),
            ..Default::default()
        };
        assert_eq!(filters.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(filters.page_offset(), 0);

        let filters = PetFilters {
            limit: Some("500".into()),
            offset: Some("20".into()),
            ..Default::default()
        };
        assert_eq!(filters.page_size(), MAX_PAGE_SIZE);
        assert_eq!(filters.page_offset(), 20);
    }
}
