use std::sync::Arc;

use super::{HookState, Store, Toaster};
use crate::models::{ListPermission, ListShare, ShareList};
use crate::realtime::Subscription;
use crate::services::ListService;

/// Shares of one list. Every mutation re-fetches the whole set.
pub struct ListSharingHook {
    service: ListService,
    toaster: Arc<dyn Toaster>,
    list_id: Option<String>,
    store: Store<Vec<ListShare>>,
    subscription: Option<Subscription>,
}

impl ListSharingHook {
    pub async fn mount(service: ListService, toaster: Arc<dyn Toaster>, list_id: Option<&str>) -> Self {
        let store = Store::new(Vec::new());
        let subscription = list_id.map(|id| {
            let pushes = store.clone();
            service.subscribe_to_list_shares(id, move |shares| pushes.push(shares))
        });

        let hook = Self {
            service,
            toaster,
            list_id: list_id.map(str::to_string),
            store,
            subscription,
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Vec<ListShare>> {
        self.store.snapshot()
    }

    pub fn shares(&self) -> Vec<ListShare> {
        self.store.data()
    }

    pub async fn refetch(&self) -> bool {
        let Some(list_id) = self.list_id.as_deref() else {
            return self.store.load(None, async { Ok(Vec::new()) }).await;
        };
        self.store
            .load(
                Some(self.toaster.as_ref()),
                self.service.get_list_shares(list_id),
            )
            .await
    }

    /// Invites `email` to the mounted list.
    pub async fn share_list(&self, email: &str, permission: ListPermission) -> Option<ListShare> {
        let list_id = self.list_id.clone()?;
        let input = ShareList {
            list_id,
            shared_with_email: email.to_string(),
            permission,
        };
        match self.service.share_list(input).await {
            Ok(share) => {
                self.toaster
                    .success(format!("Invite sent to {}", share.shared_with_email));
                self.refetch().await;
                Some(share)
            }
            Err(err) => {
                self.toaster.error(err.to_string());
                None
            }
        }
    }

    pub async fn update_permission(&self, share_id: &str, permission: ListPermission) -> bool {
        let result = self.service.update_share_permission(share_id, permission).await;
        self.finish(result.map(drop), "Permission updated").await
    }

    pub async fn remove_share(&self, share_id: &str) -> bool {
        let result = self.service.remove_share(share_id).await;
        self.finish(result, "Access removed").await
    }

    pub async fn accept_invite(&self, share_id: &str) -> bool {
        let result = self.service.accept_invite(share_id).await;
        self.finish(result.map(drop), "Invite accepted").await
    }

    pub fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    async fn finish(&self, result: Result<(), crate::error::AppError>, message: &str) -> bool {
        match result {
            Ok(()) => {
                self.toaster.success(message);
                self.refetch().await;
                true
            }
            Err(err) => {
                self.toaster.error(err.to_string());
                false
            }
        }
    }
}
