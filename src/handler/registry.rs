//! Job registry for dispatching requests by name.
//!
//! Built once at startup, then shared read-only by every connection.
//!
//! # Example
//!
//! ```
//! use jobwire::handler::{JobDescriptor, JobRegistry};
//!
//! let mut registry = JobRegistry::new();
//! registry
//!     .register(JobDescriptor::plain("echo", |args| args.get::<String>("text")).param("text"))
//!     .unwrap();
//!
//! assert!(registry.lookup("echo").is_ok());
//! assert!(registry.register(JobDescriptor::plain("echo", |_| Ok(()))).is_err());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use super::JobDescriptor;
use crate::error::{JobwireError, Result};

/// Registry mapping job names to descriptors.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<JobDescriptor>>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Names are unique.
    pub fn register(&mut self, descriptor: JobDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(JobwireError::DuplicateJobName(name));
        }

        tracing::debug!(job = %name, kind = %descriptor.handler().kind(), "Registered job");
        self.jobs.insert(name, Arc::new(descriptor));
        Ok(())
    }

    /// Move every job from `other` into this registry.
    ///
    /// Stops at the first name already present.
    pub fn merge(&mut self, other: JobRegistry) -> Result<()> {
        for (name, descriptor) in other.jobs {
            if self.jobs.contains_key(&name) {
                return Err(JobwireError::DuplicateJobName(name));
            }
            self.jobs.insert(name, descriptor);
        }
        Ok(())
    }

    /// Find a job by exact name.
    pub fn lookup(&self, name: &str) -> Result<Arc<JobDescriptor>> {
        self.get(name)
            .ok_or_else(|| JobwireError::UnknownJob(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDescriptor>> {
        self.jobs.get(name).cloned()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<Arc<JobDescriptor>> {
        let mut jobs: Vec<Arc<JobDescriptor>> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerKind;

    fn job(name: &str) -> JobDescriptor {
        JobDescriptor::plain(name, |_| Ok(()))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = JobRegistry::new();
        registry.register(job("echo")).unwrap();

        let found = registry.lookup("echo").unwrap();
        assert_eq!(found.name(), "echo");
        assert_eq!(found.handler().kind(), HandlerKind::Plain);
        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = JobRegistry::new();
        registry.register(job("echo")).unwrap();

        let err = registry.register(job("echo")).unwrap_err();
        assert!(matches!(err, JobwireError::DuplicateJobName(ref n) if n == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_job() {
        let registry = JobRegistry::new();

        let err = registry.lookup("nonexistent").unwrap_err();
        assert_eq!(err.to_string(), "Job 'nonexistent' not found.");
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_returns_same_descriptor() {
        let mut registry = JobRegistry::new();
        registry.register(job("echo")).unwrap();

        let first = registry.lookup("echo").unwrap();
        let second = registry.lookup("echo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_merge() {
        let mut registry = JobRegistry::new();
        registry.register(job("echo")).unwrap();

        let mut other = JobRegistry::new();
        other.register(job("sum3")).unwrap();
        registry.merge(other).unwrap();
        assert_eq!(registry.names(), vec!["echo", "sum3"]);

        let mut clash = JobRegistry::new();
        clash.register(job("echo")).unwrap();
        let err = registry.merge(clash).unwrap_err();
        assert!(matches!(err, JobwireError::DuplicateJobName(ref n) if n == "echo"));
    }

    #[test]
    fn test_lookup_is_exact() {
        let mut registry = JobRegistry::new();
        registry.register(job("countUp")).unwrap();

        assert!(registry.lookup("countup").is_err());
        assert!(registry.lookup("countUp ").is_err());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = JobRegistry::new();
        for name in ["upload", "echo", "sum3"] {
            registry.register(job(name)).unwrap();
        }

        assert_eq!(registry.names(), vec!["echo", "sum3", "upload"]);
        let names: Vec<String> = registry
            .descriptors()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, registry.names());
    }
}
