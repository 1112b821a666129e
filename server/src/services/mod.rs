pub mod admission;
pub mod reconciler;
pub mod sweeper;

pub use admission::{AdmissionController, AdmissionError};
pub use reconciler::{derive_status, StatusReconciler};
pub use sweeper::StatusSweeper;
