use clockface_core::EnrollmentGallery;
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory galleries, kept in enrollment order.
///
/// Readers take a snapshot of `Arc`s and release the lock before scoring,
/// so a long verification never blocks an enrollment and vice versa.
#[derive(Debug, Default)]
pub struct GalleryStore {
    entries: RwLock<Vec<(String, Arc<EnrollmentGallery>)>>,
}

impl GalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<(String, Arc<EnrollmentGallery>)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, employee: &str) -> Option<Arc<EnrollmentGallery>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(id, _)| id == employee)
            .map(|(_, g)| Arc::clone(g))
    }

    /// Insert or swap an employee's gallery. A re-enrolled employee keeps
    /// their original position in the enrollment order.
    pub fn replace(&self, employee: &str, gallery: Arc<EnrollmentGallery>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|(id, _)| id == employee) {
            Some(entry) => entry.1 = gallery,
            None => entries.push((employee.to_string(), gallery)),
        }
    }

    pub fn remove(&self, employee: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(id, _)| id != employee);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
