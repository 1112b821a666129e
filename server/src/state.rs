use std::sync::Arc;

use crate::clock::Clock;
use crate::services::{AdmissionController, StatusReconciler};
use crate::store::RegistrationStore;

pub struct AppState<S: RegistrationStore> {
    pub store: Arc<S>,
    pub admission: Arc<AdmissionController<S>>,
    pub reconciler: Arc<StatusReconciler<S>>,
}

impl<S: RegistrationStore> AppState<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            admission: Arc::new(AdmissionController::new(store.clone(), clock.clone())),
            reconciler: Arc::new(StatusReconciler::new(store.clone(), clock)),
            store,
        }
    }
}

// Manual impl: `S` itself need not be `Clone`.
impl<S: RegistrationStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            admission: Arc::clone(&self.admission),
            reconciler: Arc::clone(&self.reconciler),
        }
    }
}
