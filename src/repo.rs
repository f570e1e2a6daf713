use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("store error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait JobRequestRepo: Send + Sync {
    /// Newest first by `created_at`.
    async fn list_job_requests(&self) -> RepoResult<Vec<JobRequest>>;
    async fn get_job_request(&self, id: Id) -> RepoResult<JobRequest>;
    async fn create_job_request(&self, new: NewJobRequest, created_by: Option<Id>) -> RepoResult<JobRequest>;
    async fn update_job_request(&self, id: Id, upd: UpdateJobRequest) -> RepoResult<JobRequest>;
    /// Removes the request and every comment that belongs to it.
    async fn delete_job_request(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Newest first by `created_at`.
    async fn list_comments(&self, job_request_id: Id) -> RepoResult<Vec<JobRequestComment>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<JobRequestComment>;
    async fn delete_comment(&self, job_request_id: Id, comment_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait MemberRepo: Send + Sync {
    /// Map an identity-provider subject to an internal member id.
    async fn resolve_member(&self, external_id: &str) -> RepoResult<Option<Id>>;
    async fn upsert_member(&self, external_id: &str, display_name: Option<&str>) -> RepoResult<Member>;
}

pub trait Repo: JobRequestRepo + CommentRepo + MemberRepo {}

impl<T> Repo for T where T: JobRequestRepo + CommentRepo + MemberRepo {}

fn newest_first<T>(v: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<Utc>, Id)) {
    v.sort_by(|a, b| key(b).cmp(&key(a)));
}

pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        job_requests: HashMap<Id, JobRequest>,
        comments: HashMap<Id, JobRequestComment>,
        members: HashMap<Id, Member>,
        next_id: Id,
    }

    /// Process-local store. With a snapshot path every write is flushed to a
    /// JSON file and reloaded on start.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        persist_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
                persist_lock: Arc::default(),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!("no snapshot at '{}': {e}; starting empty", path.display());
                    State::default()
                }
            }
        }

        /// Rewrite the snapshot from current state. Writers are serialized and
        /// each one replaces the file by renaming a fully written temp file.
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            let Ok(_guard) = self.persist_lock.lock() else { return };
            let bytes = match self.state.read() {
                Ok(s) => serde_json::to_vec_pretty(&*s),
                Err(_) => return,
            };
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("failed to serialize snapshot: {e}");
                    return;
                }
            };
            if let Err(e) = Self::replace_file(path, &bytes) {
                tracing::error!("failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
            use std::io::Write;
            let dir = match path.parent() {
                Some(d) if !d.as_os_str().is_empty() => d,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| e.error)?;
            Ok(())
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn read(&self) -> RepoResult<std::sync::RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<std::sync::RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    #[async_trait]
    impl JobRequestRepo for InMemRepo {
        async fn list_job_requests(&self) -> RepoResult<Vec<JobRequest>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.job_requests.values().cloned().collect();
            newest_first(&mut v, |r| (r.created_at, r.id));
            Ok(v)
        }

        async fn get_job_request(&self, id: Id) -> RepoResult<JobRequest> {
            let s = self.read()?;
            s.job_requests.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_job_request(&self, new: NewJobRequest, created_by: Option<Id>) -> RepoResult<JobRequest> {
            let mut s = self.write()?;
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let rec = JobRequest {
                id,
                request_number: new.request_number,
                requesting_person: new.requesting_person,
                request_date: new.request_date,
                file_path: new.file_path,
                file_name: new.file_name,
                material_type: new.material_type,
                quantity: new.quantity,
                assigned_to: new.assigned_to,
                status: new.status.unwrap_or_default(),
                date_completed: new.date_completed,
                image_url: new.image_url,
                image_filename: new.image_filename,
                created_at: now,
                updated_at: now,
                created_by,
            };
            s.job_requests.insert(id, rec.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(rec)
        }

        async fn update_job_request(&self, id: Id, upd: UpdateJobRequest) -> RepoResult<JobRequest> {
            let mut s = self.write()?;
            let rec = s.job_requests.get_mut(&id).ok_or(RepoError::NotFound)?;
            rec.apply(upd, Utc::now());
            let updated = rec.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_job_request(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.job_requests.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.comments.retain(|_, c| c.job_request_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, job_request_id: Id) -> RepoResult<Vec<JobRequestComment>> {
            let s = self.read()?;
            let mut v: Vec<_> = s
                .comments
                .values()
                .filter(|c| c.job_request_id == job_request_id)
                .cloned()
                .collect();
            newest_first(&mut v, |c| (c.created_at, c.id));
            Ok(v)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<JobRequestComment> {
            let mut s = self.write()?;
            // mirrors the foreign key in the Postgres schema
            if !s.job_requests.contains_key(&new.job_request_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let c = JobRequestComment {
                id,
                job_request_id: new.job_request_id,
                comment: new.comment,
                author_name: new.author_name,
                created_by: new.created_by,
                created_at: Utc::now(),
            };
            s.comments.insert(id, c.clone());
            drop(s);
            self.persist();
            Ok(c)
        }

        async fn delete_comment(&self, job_request_id: Id, comment_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            match s.comments.get(&comment_id) {
                Some(c) if c.job_request_id == job_request_id => {
                    s.comments.remove(&comment_id);
                }
                _ => return Err(RepoError::NotFound),
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl MemberRepo for InMemRepo {
        async fn resolve_member(&self, external_id: &str) -> RepoResult<Option<Id>> {
            let s = self.read()?;
            Ok(s.members.values().find(|m| m.external_id == external_id).map(|m| m.id))
        }

        async fn upsert_member(&self, external_id: &str, display_name: Option<&str>) -> RepoResult<Member> {
            let mut s = self.write()?;
            let existing = s.members.values().find(|m| m.external_id == external_id).map(|m| m.id);
            let id = match existing {
                Some(id) => id,
                None => Self::next_id(&mut s),
            };
            let member = Member {
                id,
                external_id: external_id.to_string(),
                display_name: display_name.map(str::to_string),
            };
            s.members.insert(id, member.clone());
            drop(s);
            self.persist();
            Ok(member)
        }
    }
}

pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const JOB_REQUEST_COLUMNS: &str = "id, request_number, requesting_person, request_date, file_path, file_name, \
        material_type, quantity, assigned_to, status, date_completed, image_url, image_filename, \
        created_at, updated_at, created_by";

    const COMMENT_COLUMNS: &str = "id, job_request_id, comment, author_name, created_by, created_at";

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub fn pool(&self) -> &Pool<Postgres> { &self.pool }
    }

    fn store_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            // 23503 foreign_key_violation: comment for a missing request
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23503") => RepoError::NotFound,
            other => {
                log::error!("postgres error: {other}");
                RepoError::Internal(other.to_string())
            }
        }
    }

    #[async_trait]
    impl JobRequestRepo for PgRepo {
        async fn list_job_requests(&self) -> RepoResult<Vec<JobRequest>> {
            let sql = format!("SELECT {JOB_REQUEST_COLUMNS} FROM job_requests ORDER BY created_at DESC, id DESC");
            sqlx::query_as::<_, JobRequest>(&sql)
                .fetch_all(&self.pool).await.map_err(store_err)
        }

        async fn get_job_request(&self, id: Id) -> RepoResult<JobRequest> {
            let sql = format!("SELECT {JOB_REQUEST_COLUMNS} FROM job_requests WHERE id = $1");
            sqlx::query_as::<_, JobRequest>(&sql)
                .bind(id)
                .fetch_one(&self.pool).await.map_err(store_err)
        }

        async fn create_job_request(&self, new: NewJobRequest, created_by: Option<Id>) -> RepoResult<JobRequest> {
            let sql = format!(
                "INSERT INTO job_requests (request_number, requesting_person, request_date, file_path, file_name, \
                 material_type, quantity, assigned_to, status, date_completed, image_url, image_filename, created_by) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13) RETURNING {JOB_REQUEST_COLUMNS}"
            );
            sqlx::query_as::<_, JobRequest>(&sql)
                .bind(&new.request_number)
                .bind(&new.requesting_person)
                .bind(new.request_date)
                .bind(&new.file_path)
                .bind(&new.file_name)
                .bind(&new.material_type)
                .bind(new.quantity)
                .bind(&new.assigned_to)
                .bind(new.status.unwrap_or_default())
                .bind(new.date_completed)
                .bind(&new.image_url)
                .bind(&new.image_filename)
                .bind(created_by)
                .fetch_one(&self.pool).await.map_err(store_err)
        }

        async fn update_job_request(&self, id: Id, upd: UpdateJobRequest) -> RepoResult<JobRequest> {
            // read-merge-write under a row lock so explicit nulls can clear columns
            let mut tx = self.pool.begin().await.map_err(store_err)?;
            let sql = format!("SELECT {JOB_REQUEST_COLUMNS} FROM job_requests WHERE id = $1 FOR UPDATE");
            let mut rec = sqlx::query_as::<_, JobRequest>(&sql)
                .bind(id)
                .fetch_one(&mut *tx).await.map_err(store_err)?;
            rec.apply(upd, Utc::now());
            let sql = format!(
                "UPDATE job_requests SET request_number=$2, requesting_person=$3, request_date=$4, file_path=$5, \
                 file_name=$6, material_type=$7, quantity=$8, assigned_to=$9, status=$10, date_completed=$11, \
                 image_url=$12, image_filename=$13, updated_at=$14 WHERE id=$1 RETURNING {JOB_REQUEST_COLUMNS}"
            );
            let updated = sqlx::query_as::<_, JobRequest>(&sql)
                .bind(id)
                .bind(&rec.request_number)
                .bind(&rec.requesting_person)
                .bind(rec.request_date)
                .bind(&rec.file_path)
                .bind(&rec.file_name)
                .bind(&rec.material_type)
                .bind(rec.quantity)
                .bind(&rec.assigned_to)
                .bind(rec.status)
                .bind(rec.date_completed)
                .bind(&rec.image_url)
                .bind(&rec.image_filename)
                .bind(rec.updated_at)
                .fetch_one(&mut *tx).await.map_err(store_err)?;
            tx.commit().await.map_err(store_err)?;
            Ok(updated)
        }

        async fn delete_job_request(&self, id: Id) -> RepoResult<()> {
            // comments go with it via ON DELETE CASCADE
            let res = sqlx::query("DELETE FROM job_requests WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(store_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, job_request_id: Id) -> RepoResult<Vec<JobRequestComment>> {
            let sql = format!(
                "SELECT {COMMENT_COLUMNS} FROM job_request_comments WHERE job_request_id = $1 ORDER BY created_at DESC, id DESC"
            );
            sqlx::query_as::<_, JobRequestComment>(&sql)
                .bind(job_request_id)
                .fetch_all(&self.pool).await.map_err(store_err)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<JobRequestComment> {
            let sql = format!(
                "INSERT INTO job_request_comments (job_request_id, comment, author_name, created_by) \
                 VALUES ($1,$2,$3,$4) RETURNING {COMMENT_COLUMNS}"
            );
            sqlx::query_as::<_, JobRequestComment>(&sql)
                .bind(new.job_request_id)
                .bind(&new.comment)
                .bind(&new.author_name)
                .bind(new.created_by)
                .fetch_one(&self.pool).await.map_err(store_err)
        }

        async fn delete_comment(&self, job_request_id: Id, comment_id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM job_request_comments WHERE id = $1 AND job_request_id = $2")
                .bind(comment_id)
                .bind(job_request_id)
                .execute(&self.pool).await.map_err(store_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl MemberRepo for PgRepo {
        async fn resolve_member(&self, external_id: &str) -> RepoResult<Option<Id>> {
            sqlx::query_scalar::<_, Id>("SELECT id FROM members WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool).await.map_err(store_err)
        }

        async fn upsert_member(&self, external_id: &str, display_name: Option<&str>) -> RepoResult<Member> {
            sqlx::query_as::<_, Member>(
                "INSERT INTO members (external_id, display_name) VALUES ($1,$2) \
                 ON CONFLICT (external_id) DO UPDATE SET display_name = EXCLUDED.display_name \
                 RETURNING id, external_id, display_name"
            )
            .bind(external_id)
            .bind(display_name)
            .fetch_one(&self.pool).await.map_err(store_err)
        }
    }
}
