use std::sync::Arc;

use tracing::warn;

use super::Toaster;
use crate::geo::Coordinates;
use crate::models::Todo;
use crate::services::{GeolocationService, PermissionState};

/// Location access and background proximity monitoring for the caller.
pub struct GeolocationHook {
    service: GeolocationService,
    toaster: Arc<dyn Toaster>,
    permission: PermissionState,
}

impl GeolocationHook {
    /// Monitoring starts only when `enable_monitoring` is set and access
    /// was already granted; the hook never prompts on mount.
    pub async fn mount(
        service: GeolocationService,
        toaster: Arc<dyn Toaster>,
        enable_monitoring: bool,
    ) -> Self {
        let permission = service.check_permission().await;
        if enable_monitoring && permission == PermissionState::Granted {
            if let Err(err) = service.start_monitoring() {
                warn!(error = %err, "Could not start location monitoring");
            }
        }
        Self {
            service,
            toaster,
            permission,
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn is_monitoring(&self) -> bool {
        self.service.is_monitoring()
    }

    pub async fn request_permission(&mut self) -> bool {
        let granted = self.service.request_permission().await;
        self.permission = self.service.check_permission().await;
        if granted {
            self.toaster.success("Location access granted");
        } else {
            self.toaster.error("Location access denied");
        }
        granted
    }

    pub async fn get_current_position(&self) -> Option<Coordinates> {
        match self.service.get_current_position().await {
            Ok(at) => Some(at),
            Err(err) => {
                self.toaster.error(err.to_string());
                None
            }
        }
    }

    /// Open todos near the current position, nearest first.
    pub async fn check_proximity(&self) -> Vec<Todo> {
        let Some(at) = self.get_current_position().await else {
            return Vec::new();
        };
        match self.service.check_proximity_to_todos(at).await {
            Ok(todos) => todos,
            Err(err) => {
                self.toaster.error(err.to_string());
                Vec::new()
            }
        }
    }

    pub fn start_monitoring(&self) -> bool {
        match self.service.start_monitoring() {
            Ok(()) => {
                self.toaster.success("Location monitoring started");
                true
            }
            Err(err) => {
                self.toaster.error(err.to_string());
                false
            }
        }
    }

    pub fn stop_monitoring(&self) {
        self.service.stop_monitoring();
        self.toaster.info("Location monitoring stopped");
    }

    /// Stops monitoring. Dropping the hook does the same.
    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for GeolocationHook {
    fn drop(&mut self) {
        self.service.stop_monitoring();
    }
}
