//! Interfaces to the external patient data collaborators
//!
//! Both providers are asynchronous and may fail; callers treat failures as
//! non-fatal and degrade to "nothing loaded".

use anyhow::Result;
use futures_util::future::BoxFuture;

use crate::landmark::AnatomicalLandmark;
use crate::structure::{Lod, Structure};

/// Source of a patient's named anatomical landmarks (queried once per session)
pub trait PatientLandmarkProvider: Send + Sync {
    fn landmarks<'a>(&'a self, patient_id: &'a str) -> BoxFuture<'a, Result<Vec<AnatomicalLandmark>>>;
}

/// Source of a patient's structures and their mesh references
pub trait StructureProvider: Send + Sync {
    /// All structures segmented for this patient (queried once per session)
    fn structures<'a>(&'a self, patient_id: &'a str) -> BoxFuture<'a, Result<Vec<Structure>>>;

    /// Mesh reference for one structure at a level of detail
    fn mesh_url<'a>(
        &'a self,
        patient_id: &'a str,
        structure_code: &'a str,
        lod: Lod,
    ) -> BoxFuture<'a, Result<String>>;
}
