use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::encode::IsNull;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::Postgres;
use utoipa::ToSchema;
use validator::Validate;

// Always Postgres backed (BIGSERIAL ids)
pub type Id = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "In Process")]
    InProcess,
    #[serde(rename = "Needs Revision")]
    NeedsRevision,
    #[serde(rename = "Complete")]
    Complete,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProcess => "In Process",
            JobStatus::NeedsRevision => "Needs Revision",
            JobStatus::Complete => "Complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "In Process" => Some(JobStatus::InProcess),
            "Needs Revision" => Some(JobStatus::NeedsRevision),
            "Complete" => Some(JobStatus::Complete),
            _ => None,
        }
    }
}

// Stored as TEXT holding the display label.
impl sqlx::Type<Postgres> for JobStatus {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for JobStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<Postgres>>::decode(value)?;
        JobStatus::parse(s).ok_or_else(|| format!("unknown job status '{s}'").into())
    }
}

impl sqlx::Encode<'_, Postgres> for JobStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        <&str as sqlx::Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct JobRequest {
    pub id: Id,
    pub request_number: String,
    pub requesting_person: String,
    pub request_date: NaiveDate,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub material_type: Option<String>,
    pub quantity: Option<i32>,
    pub assigned_to: Option<String>,
    pub status: JobStatus,
    pub date_completed: Option<NaiveDate>,
    pub image_url: Option<String>,
    pub image_filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Id>, // member id, null when the caller has no member row
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewJobRequest {
    #[validate(custom = "not_blank")]
    pub request_number: String,
    #[validate(custom = "not_blank")]
    pub requesting_person: String,
    pub request_date: NaiveDate,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub material_type: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, message = "quantity must be a positive integer"))]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_filename: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub date_completed: Option<NaiveDate>,
}

/// Sparse field set merged into a stored request.
///
/// Optional columns use `Option<Option<T>>`: an absent key is `None` (leave
/// untouched), an explicit JSON `null` is `Some(None)` (clear).
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateJobRequest {
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub request_number: Option<String>,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub requesting_person: Option<String>,
    #[serde(default)]
    pub request_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub file_path: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub file_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub material_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<i32>)]
    pub quantity: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub assigned_to: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>, format = Date)]
    pub date_completed: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub image_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub image_filename: Option<Option<String>>,
}

fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

impl UpdateJobRequest {
    /// Extra check the derive can't express: a present quantity must be positive.
    pub fn check_quantity(&self) -> Result<(), String> {
        match self.quantity {
            Some(Some(q)) if q < 1 => Err("quantity must be a positive integer".into()),
            _ => Ok(()),
        }
    }
}

impl JobRequest {
    /// Merge a sparse update into this record and advance `updated_at`.
    pub fn apply(&mut self, upd: UpdateJobRequest, now: DateTime<Utc>) {
        if let Some(v) = upd.request_number { self.request_number = v; }
        if let Some(v) = upd.requesting_person { self.requesting_person = v; }
        if let Some(v) = upd.request_date { self.request_date = v; }
        if let Some(v) = upd.file_path { self.file_path = v; }
        if let Some(v) = upd.file_name { self.file_name = v; }
        if let Some(v) = upd.material_type { self.material_type = v; }
        if let Some(v) = upd.quantity { self.quantity = v; }
        if let Some(v) = upd.assigned_to { self.assigned_to = v; }
        if let Some(v) = upd.status { self.status = v; }
        if let Some(v) = upd.date_completed { self.date_completed = v; }
        if let Some(v) = upd.image_url { self.image_url = v; }
        if let Some(v) = upd.image_filename { self.image_filename = v; }
        // strictly monotonic at the store's microsecond resolution
        let floor = self.updated_at + chrono::Duration::microseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct JobRequestComment {
    pub id: Id,
    pub job_request_id: Id,
    pub comment: String,
    pub author_name: String,
    pub created_by: Option<Id>,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /job-requests/{id}/comments`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CommentBody {
    #[validate(custom = "not_blank")]
    pub comment: String,
    #[serde(default)]
    pub author_name: Option<String>,
}

fn not_blank(s: &str) -> Result<(), validator::ValidationError> {
    if s.trim().is_empty() {
        let mut err = validator::ValidationError::new("blank");
        err.message = Some("cannot be blank".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub job_request_id: Id,
    pub comment: String,
    pub author_name: String,
    pub created_by: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Member {
    pub id: Id,
    pub external_id: String, // identity provider subject
    pub display_name: Option<String>,
}

/// Query parameters accepted by the list endpoint.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JobRequestFilter {
    /// Case-insensitive match on request number, requester or assignee.
    pub q: Option<String>,
    /// Exact status; `all` or absent disables the filter.
    pub status: Option<String>,
}

impl JobRequestFilter {
    pub fn matches(&self, r: &JobRequest) -> bool {
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            let hit = r.request_number.to_lowercase().contains(&q)
                || r.requesting_person.to_lowercase().contains(&q)
                || r.assigned_to.as_deref().map(|a| a.to_lowercase().contains(&q)).unwrap_or(false);
            if !hit { return false; }
        }
        match self.status.as_deref() {
            None | Some("all") | Some("") => true,
            Some(s) => r.status.as_str() == s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobRequest {
        let t = Utc::now();
        JobRequest {
            id: 1,
            request_number: "JR-1".into(),
            requesting_person: "A. Lee".into(),
            request_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            file_path: Some("/cad/part.step".into()),
            file_name: None,
            material_type: Some("PLA".into()),
            quantity: Some(3),
            assigned_to: Some("Sam".into()),
            status: JobStatus::InProcess,
            date_completed: None,
            image_url: None,
            image_filename: None,
            created_at: t,
            updated_at: t,
            created_by: None,
        }
    }

    #[test]
    fn status_only_update_leaves_other_fields() {
        let before = sample();
        let mut after = before.clone();
        let upd: UpdateJobRequest = serde_json::from_str(r#"{"status":"Complete"}"#).unwrap();
        after.apply(upd, before.updated_at);
        assert_eq!(after.status, JobStatus::Complete);
        assert!(after.updated_at > before.updated_at);
        after.status = before.status;
        after.updated_at = before.updated_at;
        assert_eq!(after, before);
    }

    #[test]
    fn explicit_null_clears_but_absent_keeps() {
        let mut r = sample();
        let upd: UpdateJobRequest = serde_json::from_str(r#"{"file_path":null}"#).unwrap();
        r.apply(upd, Utc::now());
        assert_eq!(r.file_path, None);
        assert_eq!(r.material_type.as_deref(), Some("PLA"));
    }

    #[test]
    fn status_serializes_with_spaces() {
        assert_eq!(serde_json::to_string(&JobStatus::NeedsRevision).unwrap(), "\"Needs Revision\"");
        assert_eq!(JobStatus::parse("In Process"), Some(JobStatus::InProcess));
        assert_eq!(JobStatus::parse("done"), None);
    }

    #[test]
    fn filter_matches_assignee_and_status() {
        let r = sample();
        let f = JobRequestFilter { q: Some("sam".into()), status: None };
        assert!(f.matches(&r));
        let f = JobRequestFilter { q: None, status: Some("Complete".into()) };
        assert!(!f.matches(&r));
        let f = JobRequestFilter { q: Some("nobody".into()), status: Some("all".into()) };
        assert!(!f.matches(&r));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let new: NewJobRequest = serde_json::from_str(
            r#"{"request_number":"JR-2","requesting_person":"B","request_date":"2024-02-01","quantity":0}"#,
        ).unwrap();
        assert!(new.validate().is_err());
        let upd: UpdateJobRequest = serde_json::from_str(r#"{"quantity":-4}"#).unwrap();
        assert!(upd.check_quantity().is_err());
    }

    #[test]
    fn whitespace_only_required_fields_are_rejected() {
        let new: NewJobRequest = serde_json::from_str(
            r#"{"request_number":"   ","requesting_person":"  ","request_date":"2024-02-01"}"#,
        ).unwrap();
        let errs = new.validate().unwrap_err();
        let fields = errs.field_errors();
        assert!(fields.contains_key("request_number"));
        assert!(fields.contains_key("requesting_person"));

        let upd: UpdateJobRequest = serde_json::from_str(r#"{"requesting_person":" \t"}"#).unwrap();
        assert!(upd.validate().is_err());
        let upd: UpdateJobRequest = serde_json::from_str(r#"{"status":"Complete"}"#).unwrap();
        assert!(upd.validate().is_ok());
    }
}
