use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::Auditable;
use crate::authz::{InvalidEnumInput, Resource};
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Pending,
    Confirmed,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = InvalidEnumInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "confirmed" => Ok(MatchStatus::Confirmed),
            "rejected" => Ok(MatchStatus::Rejected),
            other => Err(InvalidEnumInput::new("match status", other)),
        }
    }
}

/// A suggested pairing of a lost report with a found report
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PetMatch {
    pub id: Uuid,
    pub lost_pet_id: Uuid,
    pub found_pet_id: Uuid,
    /// 0..=100
    pub confidence_score: i64,
    pub status: MatchStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for PetMatch {
    fn resource() -> Resource {
        Resource::Matches
    }

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPetMatch {
    pub id: String,
    pub lost_pet_id: String,
    pub found_pet_id: String,
    pub confidence_score: i64,
    pub status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbPetMatch {
    pub const COLUMNS: &'static str =
        "id, lost_pet_id, found_pet_id, confidence_score, status, created_by, created_at, updated_at";
}

fn parse_id(label: &str, value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|e| AppError::internal(format!("invalid {label} {value}: {e}")))
}

impl TryFrom<DbPetMatch> for PetMatch {
    type Error = AppError;

    fn try_from(value: DbPetMatch) -> Result<Self, Self::Error> {
        Ok(PetMatch {
            id: parse_id("match id", &value.id)?,
            lost_pet_id: parse_id("lost pet id", &value.lost_pet_id)?,
            found_pet_id: parse_id("found pet id", &value.found_pet_id)?,
            confidence_score: value.confidence_score,
            status: value
                .status
                .parse()
                .map_err(|e| AppError::internal(format!("match {}: {}", value.id, e)))?,
            created_by: parse_id("creator id", &value.created_by)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MatchCreateRequest {
    pub lost_pet_id: Uuid,
    pub found_pet_id: Uuid,
    #[schema(example = 87)]
    pub confidence_score: i64,
}

impl MatchCreateRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(0..=100).contains(&self.confidence_score) {
            return Err(AppError::bad_request("confidence_score must be between 0 and 100"));
        }
        if self.lost_pet_id == self.found_pet_id {
            return Err(AppError::bad_request("a pet cannot be matched with itself"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MatchUpdateRequest {
    pub status: MatchStatus,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MatchListQuery {
    pub status: Option<MatchStatus>,
    /// Matches where this pet is either side
    pub pet_id: Option<Uuid>,
}
