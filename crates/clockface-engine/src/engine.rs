use crate::config::{ConfigError, EngineConfig};
use crate::store::GalleryStore;
use chrono::{DateTime, Utc};
use clockface_core::enrollment::PhotoReport;
use clockface_core::{
    CancelToken, DescriptorExtractor, DuplicateEnrollment, DuplicateGuard, Enrollment,
    EnrollmentAggregator, EnrollmentError, EnrollmentGallery, EnrollmentPolicy, ExtractionError,
    ExtractionProfile, FaceBackend, GalleryError, GallerySearch, MatchProfile, MatchVerdict,
};
use clockface_imaging::{Frame, QualityProfile, QualityRejection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EnrollFailure {
    #[error("invalid enrollment request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Rejected(#[from] EnrollmentError),
    #[error("face already enrolled for employee {employee} (confidence {confidence:.3})")]
    Duplicate { employee: String, confidence: f32 },
    #[error("enrollment timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DuplicateEnrollment<String>> for EnrollFailure {
    fn from(d: DuplicateEnrollment<String>) -> Self {
        EnrollFailure::Duplicate {
            employee: d.employee,
            confidence: d.confidence,
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyFailure {
    #[error("invalid photo: {0}")]
    InvalidInput(String),
    #[error("photo rejected: {0}")]
    LowQuality(#[from] QualityRejection),
    #[error("no usable face: {0}")]
    NoFace(ExtractionError),
    #[error("face not recognized (best confidence {best_confidence:.3})")]
    Unauthorized { best_confidence: f32 },
    #[error("verification timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ExtractionError> for VerifyFailure {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::EmbeddingFailed(_) | ExtractionError::Backend(_) => {
                VerifyFailure::Internal(e.to_string())
            }
            other => VerifyFailure::NoFace(other),
        }
    }
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct EnrollmentSummary {
    pub employee: String,
    pub photos_submitted: usize,
    pub photos_accepted: usize,
    pub variants: usize,
    pub landmarks: usize,
    pub average_quality: Option<f32>,
    pub reports: Vec<PhotoReport>,
}

/// A positive identification.
#[derive(Debug, Clone)]
pub struct Identification {
    pub employee: String,
    pub confidence: f32,
    pub verdict: MatchVerdict,
    /// Employees scored before the search stopped.
    pub scanned: usize,
    /// The search stopped early, so a better candidate may have been skipped.
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceKind {
    ClockIn,
    ClockOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceMethod {
    Facial,
}

/// Attendance event for the host to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub employee: String,
    pub kind: AttendanceKind,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
    pub method: AttendanceMethod,
}

/// Enrollment and verification front end.
///
/// Each call runs its CPU work on a blocking worker under a hard deadline.
/// Galleries live in memory; the host persists them through
/// [`export_gallery`](Self::export_gallery) and [`import_gallery`](Self::import_gallery).
pub struct AttendanceEngine {
    backend: Arc<dyn FaceBackend>,
    config: EngineConfig,
    profile: MatchProfile,
    store: Arc<GalleryStore>,
    /// Serializes the final duplicate check and store write of enrollments.
    commit: Mutex<()>,
}

impl AttendanceEngine {
    pub fn new(backend: Arc<dyn FaceBackend>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let profile = config.profile.resolve();
        tracing::info!(
            profile = %profile.name,
            verify_timeout_secs = config.verify_timeout_secs,
            enroll_timeout_secs = config.enroll_timeout_secs,
            "attendance engine ready"
        );
        Ok(Self {
            backend,
            config,
            profile,
            store: Arc::new(GalleryStore::new()),
            commit: Mutex::new(()),
        })
    }

    pub fn profile(&self) -> &MatchProfile {
        &self.profile
    }

    /// Build a gallery from `photos` and store it for `employee`, replacing
    /// any previous enrollment. Nothing is stored unless every step succeeds
    /// within the deadline.
    pub async fn enroll(
        &self,
        employee: &str,
        photos: Vec<Vec<u8>>,
    ) -> Result<EnrollmentSummary, EnrollFailure> {
        let employee = employee_key(employee).to_string();
        if employee.is_empty() {
            return Err(EnrollFailure::InvalidInput("employee id is empty".into()));
        }
        tracing::info!(employee = %employee, photos = photos.len(), "enroll requested");

        let backend = Arc::clone(&self.backend);
        let existing = self.store.snapshot();
        let seen = existing.clone();
        let policy = EnrollmentPolicy {
            min_photos: self.config.min_photos,
            min_valid_photos: self.config.min_valid_photos,
            ..EnrollmentPolicy::default()
        };
        let guard = DuplicateGuard::new(&self.profile, self.config.duplicate_threshold);
        let worker_guard = guard.clone();
        let photos_submitted = photos.len();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let worker_employee = employee.clone();

        let work = move || -> Result<Enrollment, EnrollFailure> {
            let enrollment = EnrollmentAggregator::new(backend.as_ref(), &policy)
                .aggregate(&photos, &worker_cancel)
                .map_err(|e| match e {
                    EnrollmentError::Cancelled => EnrollFailure::Timeout,
                    other => EnrollFailure::Rejected(other),
                })?;
            worker_guard.check(
                &enrollment.gallery.descriptors,
                &existing,
                Some(&worker_employee),
            )?;
            Ok(enrollment)
        };
        let enrollment = run_with_deadline(self.config.enroll_timeout(), cancel, work)
            .await
            .map_err(|e| match e {
                DeadlineError::Elapsed => EnrollFailure::Timeout,
                DeadlineError::Panicked(msg) => EnrollFailure::Internal(msg),
            })??;

        let gallery = enrollment.gallery;

        // Galleries stored while the worker ran were not in its snapshot.
        let _commit = self.commit.lock().await;
        let changed: Vec<(String, Arc<EnrollmentGallery>)> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|(id, g)| !seen.iter().any(|(sid, sg)| sid == id && Arc::ptr_eq(sg, g)))
            .collect();
        guard.check(&gallery.descriptors, &changed, Some(&employee))?;

        let summary = EnrollmentSummary {
            employee: employee.clone(),
            photos_submitted,
            photos_accepted: gallery.descriptors.len(),
            variants: gallery.environmental_variants.len(),
            landmarks: gallery.landmarks.len(),
            average_quality: gallery.average_quality(),
            reports: enrollment.reports,
        };
        self.store.replace(&employee, Arc::new(gallery));
        tracing::info!(
            employee = %employee,
            accepted = summary.photos_accepted,
            "employee enrolled"
        );
        Ok(summary)
    }

    /// Identify who is in `photo` among all enrolled employees.
    pub async fn verify(&self, photo: Vec<u8>) -> Result<Identification, VerifyFailure> {
        let backend = Arc::clone(&self.backend);
        let candidates = self.store.snapshot();
        let search = GallerySearch::new(
            self.profile.clone(),
            self.config.search_budget(),
            self.config.degrade_window(),
        );
        let extraction = ExtractionProfile {
            min_face_size: self.profile.min_face_size,
            ..ExtractionProfile::verification()
        };
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let result = run_with_deadline(self.config.verify_timeout(), cancel, move || {
            identify(
                backend.as_ref(),
                &photo,
                &extraction,
                &search,
                &candidates,
                &worker_cancel,
            )
        })
        .await
        .map_err(|e| match e {
            DeadlineError::Elapsed => VerifyFailure::Timeout,
            DeadlineError::Panicked(msg) => VerifyFailure::Internal(msg),
        })?;

        match &result {
            Ok(id) => tracing::info!(
                employee = %id.employee,
                confidence = id.confidence,
                partial = id.partial,
                "face verified"
            ),
            Err(e) => tracing::info!(error = %e, "verification failed"),
        }
        result
    }

    /// Verify `photo` and, on a positive identification, produce the attendance record.
    pub async fn record_attendance(
        &self,
        photo: Vec<u8>,
        kind: AttendanceKind,
    ) -> Result<AttendanceRecord, VerifyFailure> {
        let identification = self.verify(photo).await?;
        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            employee: identification.employee,
            kind,
            timestamp: Utc::now(),
            confidence: identification.confidence,
            method: AttendanceMethod::Facial,
        };
        tracing::info!(
            id = %record.id,
            employee = %record.employee,
            kind = ?record.kind,
            "attendance recorded"
        );
        Ok(record)
    }

    pub fn remove(&self, employee: &str) -> bool {
        let employee = employee_key(employee);
        let removed = self.store.remove(employee);
        if removed {
            tracing::info!(employee, "enrollment removed");
        }
        removed
    }

    pub fn has_face_registered(&self, employee: &str) -> bool {
        let employee = employee_key(employee);
        self.store
            .get(employee)
            .is_some_and(|g| g.has_face_registered())
    }

    /// Enrolled employees, in enrollment order.
    pub fn employees(&self) -> Vec<String> {
        self.store.snapshot().into_iter().map(|(id, _)| id).collect()
    }

    /// Load a persisted gallery (any supported format) for `employee`.
    pub fn import_gallery(&self, employee: &str, json: &str) -> Result<(), GalleryError> {
        let employee = employee_key(employee);
        let gallery = EnrollmentGallery::from_json(json)?;
        tracing::debug!(
            employee,
            descriptors = gallery.descriptors.len(),
            "gallery imported"
        );
        self.store.replace(employee, Arc::new(gallery));
        Ok(())
    }

    /// The employee's gallery in the current persisted format.
    pub fn export_gallery(&self, employee: &str) -> Result<Option<String>, GalleryError> {
        self.store
            .get(employee_key(employee))
            .map(|g| g.to_json())
            .transpose()
    }
}

/// Store key for an employee id; surrounding whitespace is not significant.
fn employee_key(employee: &str) -> &str {
    employee.trim()
}

enum DeadlineError {
    Elapsed,
    Panicked(String),
}

/// Run `work` on a blocking worker. If the deadline passes first, trip
/// `cancel` so the worker stops at its next checkpoint, and drop its result.
async fn run_with_deadline<T, F>(
    deadline: Duration,
    cancel: CancelToken,
    work: F,
) -> Result<T, DeadlineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => {
            tracing::error!(error = %join_error, "worker task failed");
            Err(DeadlineError::Panicked(join_error.to_string()))
        }
        Err(_) => {
            cancel.cancel();
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "deadline exceeded");
            Err(DeadlineError::Elapsed)
        }
    }
}

fn identify(
    backend: &dyn FaceBackend,
    photo: &[u8],
    extraction: &ExtractionProfile,
    search: &GallerySearch,
    candidates: &[(String, Arc<EnrollmentGallery>)],
    cancel: &CancelToken,
) -> Result<Identification, VerifyFailure> {
    let frame = Frame::decode(photo).map_err(|e| VerifyFailure::InvalidInput(e.to_string()))?;
    QualityProfile::permissive().evaluate(&frame)?;
    let extraction = DescriptorExtractor::new(backend, extraction).extract(&frame)?;
    if cancel.is_cancelled() {
        return Err(VerifyFailure::Timeout);
    }

    let result = search.search(
        &extraction.descriptor,
        extraction.landmarks.as_ref(),
        candidates,
        cancel,
    );
    match result.best {
        Some(best) => Ok(Identification {
            employee: best.employee,
            confidence: best.verdict.confidence,
            verdict: best.verdict,
            scanned: result.scanned,
            partial: result.partial,
        }),
        None => Err(VerifyFailure::Unauthorized {
            best_confidence: result.best_confidence,
        }),
    }
}
