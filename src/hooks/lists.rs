use std::sync::Arc;

use super::{HookState, Store, Toaster};
use crate::models::{CreateList, List, UpdateList};
use crate::realtime::Subscription;
use crate::services::ListService;

/// All lists visible to the caller. Mutations do not touch local state;
/// the change feed delivers the new snapshot.
pub struct ListsHook {
    service: ListService,
    toaster: Arc<dyn Toaster>,
    store: Store<Vec<List>>,
    subscription: Option<Subscription>,
}

impl ListsHook {
    pub async fn mount(service: ListService, toaster: Arc<dyn Toaster>) -> Self {
        let store = Store::new(Vec::new());
        let pushes = store.clone();
        let subscription = service.subscribe_to_lists(move |lists| pushes.push(lists));

        let hook = Self {
            service,
            toaster,
            store,
            subscription: Some(subscription),
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Vec<List>> {
        self.store.snapshot()
    }

    pub fn lists(&self) -> Vec<List> {
        self.store.data()
    }

    pub async fn refetch(&self) -> bool {
        self.store
            .load(Some(self.toaster.as_ref()), self.service.get_lists())
            .await
    }

    pub async fn create_list(&self, input: CreateList) -> Option<List> {
        match self.service.create_list(input).await {
            Ok(list) => {
                self.toaster.success(format!("List \"{}\" created", list.title));
                Some(list)
            }
            Err(err) => {
                self.toaster.error(err.to_string());
                None
            }
        }
    }

    pub async fn update_list(&self, id: &str, input: UpdateList) -> Option<List> {
        match self.service.update_list(id, input).await {
            Ok(list) => {
                self.toaster.success("List updated");
                Some(list)
            }
            Err(err) => {
                self.toaster.error(err.to_string());
                None
            }
        }
    }

    pub async fn delete_list(&self, id: &str) -> bool {
        match self.service.delete_list(id).await {
            Ok(()) => {
                self.toaster.success("List deleted");
                true
            }
            Err(err) => {
                self.toaster.error(err.to_string());
                false
            }
        }
    }

    pub fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// One list by id. Without an id the hook is immediately ready and empty.
pub struct ListHook {
    service: ListService,
    toaster: Arc<dyn Toaster>,
    id: Option<String>,
    store: Store<Option<List>>,
    subscription: Option<Subscription>,
}

impl ListHook {
    pub async fn mount(service: ListService, toaster: Arc<dyn Toaster>, id: Option<&str>) -> Self {
        let store = Store::new(None);
        let subscription = id.map(|id| {
            let pushes = store.clone();
            let id = id.to_string();
            service.subscribe_to_lists(move |lists| {
                pushes.push(lists.into_iter().find(|l| l.id == id));
            })
        });

        let hook = Self {
            service,
            toaster,
            id: id.map(str::to_string),
            store,
            subscription,
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Option<List>> {
        self.store.snapshot()
    }

    pub fn list(&self) -> Option<List> {
        self.store.data()
    }

    pub async fn refetch(&self) -> bool {
        let Some(id) = self.id.as_deref() else {
            return self.store.load(None, async { Ok(None) }).await;
        };
        self.store
            .load(Some(self.toaster.as_ref()), self.service.get_list_by_id(id))
            .await
    }

    pub fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
