//! Applies reply actions inside the message transaction.

use anyhow::Result;
use murmur_schema::Action;
use murmur_store::{get_user_tx, insert_notification, Transaction};
use tracing::{error, info};

/// Executes actions for one tenant. Target users outside the tenant are
/// refused without failing the surrounding transaction.
pub struct ActionExecutor {
    tenant_id: i64,
}

impl ActionExecutor {
    pub fn new(tenant_id: i64) -> Self {
        Self { tenant_id }
    }

    /// Apply all actions, returning how many actually took effect.
    pub fn apply(
        &self,
        tx: &Transaction<'_>,
        from_user_id: i64,
        actions: &[Action],
    ) -> Result<usize> {
        let mut applied = 0;
        for action in actions {
            match action {
                Action::NotifyUser { user_id, message } => {
                    if self.notify(tx, from_user_id, *user_id, message)? {
                        applied += 1;
                    }
                }
                Action::LogEvent { event } => {
                    info!(tenant_id = self.tenant_id, from_user_id, %event, "agent event");
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    fn notify(
        &self,
        tx: &Transaction<'_>,
        from_user_id: i64,
        to_user_id: i64,
        message: &str,
    ) -> Result<bool> {
        match get_user_tx(tx, to_user_id)? {
            Some(recipient) if recipient.tenant_id == self.tenant_id => {
                insert_notification(tx, self.tenant_id, from_user_id, to_user_id, message)?;
                info!(
                    tenant_id = self.tenant_id,
                    from_user_id, to_user_id, "notification queued"
                );
                Ok(true)
            }
            _ => {
                error!(
                    tenant_id = self.tenant_id,
                    to_user_id, "cannot notify user: not in tenant"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_store::Store;

    struct Fixture {
        store: Store,
        t1: i64,
        t2: i64,
        mario: i64,
        luigi: i64,
        outsider: i64,
    }

    async fn two_tenants() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let t1 = store.insert_tenant("Mario's Pizza", "restaurant").await.unwrap();
        let t2 = store.insert_tenant("Wario's Garage", "workshop").await.unwrap();
        let mario = store
            .insert_user(t1, "Mario", "mario@pizza.test", "manager", "h")
            .await
            .unwrap();
        let luigi = store
            .insert_user(t1, "Luigi", "luigi@pizza.test", "employee", "h")
            .await
            .unwrap();
        let outsider = store
            .insert_user(t2, "Wario", "wario@garage.test", "manager", "h")
            .await
            .unwrap();
        Fixture {
            store,
            t1,
            t2,
            mario,
            luigi,
            outsider,
        }
    }

    #[tokio::test]
    async fn notify_user_in_tenant_inserts_row() {
        let f = two_tenants().await;
        let executor = ActionExecutor::new(f.t1);
        let actions = vec![Action::NotifyUser {
            user_id: f.mario,
            message: "Delivery arriving at 10am".into(),
        }];

        let luigi = f.luigi;
        let applied = f
            .store
            .transact(move |tx| executor.apply(tx, luigi, &actions))
            .await
            .unwrap();
        assert_eq!(applied, 1);

        let rows = f.store.notifications_for(f.t1, f.mario, true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].from_user_id, f.luigi);
        assert_eq!(rows[0].message, "Delivery arriving at 10am");
        assert!(!rows[0].read);
    }

    #[tokio::test]
    async fn notify_outside_tenant_is_refused_without_error() {
        let f = two_tenants().await;
        let executor = ActionExecutor::new(f.t1);
        let actions = vec![Action::NotifyUser {
            user_id: f.outsider,
            message: "psst".into(),
        }];

        let mario = f.mario;
        let applied = f
            .store
            .transact(move |tx| executor.apply(tx, mario, &actions))
            .await
            .unwrap();
        assert_eq!(applied, 0);
        assert!(f
            .store
            .notifications_for(f.t2, f.outsider, false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn notify_unknown_user_is_refused_without_error() {
        let f = two_tenants().await;
        let executor = ActionExecutor::new(f.t1);
        let actions = vec![Action::NotifyUser {
            user_id: 4096,
            message: "hello?".into(),
        }];
        let mario = f.mario;
        let applied = f
            .store
            .transact(move |tx| executor.apply(tx, mario, &actions))
            .await
            .unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn log_event_writes_nothing() {
        let f = two_tenants().await;
        let executor = ActionExecutor::new(f.t1);
        let actions = vec![Action::LogEvent {
            event: "shift started".into(),
        }];
        let mario = f.mario;
        let applied = f
            .store
            .transact(move |tx| executor.apply(tx, mario, &actions))
            .await
            .unwrap();
        assert_eq!(applied, 1);
        assert!(f
            .store
            .notifications_for(f.t1, f.mario, false)
            .await
            .unwrap()
            .is_empty());
    }
}
