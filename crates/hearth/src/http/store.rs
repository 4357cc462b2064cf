use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex, PoisonError},
};

use hearth_sync::HandlePool;

/// Credential backend leased from the handle pool during form actions. The
/// engine never sees the client library behind a real database handle.
pub trait UserStore {
    fn verify(&mut self, user: &str, password: &str) -> bool;
    fn register(&mut self, user: &str, password: &str) -> bool;
}

pub type UserPool = HandlePool<Box<dyn UserStore + Send>>;

/// In-memory credential store. Clones share one map, so every pooled handle
/// sees the same users.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: &str, password: &str) -> Self {
        self.lock().insert(user.to_string(), password.to_string());
        self
    }

    /// A pool of `size` handles over one shared map.
    pub fn pool(size: usize) -> UserPool {
        let store = Self::new();
        store.into_pool(size)
    }

    pub fn into_pool(self, size: usize) -> UserPool {
        match HandlePool::open(size, |_| {
            Ok::<Box<dyn UserStore + Send>, Infallible>(Box::new(self.clone()))
        }) {
            Ok(pool) => pool,
            Err(never) => match never {},
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UserStore for MemoryStore {
    fn verify(&mut self, user: &str, password: &str) -> bool {
        self.lock().get(user).is_some_and(|stored| stored == password)
    }

    fn register(&mut self, user: &str, password: &str) -> bool {
        if user.is_empty() || password.is_empty() {
            return false;
        }
        let mut users = self.lock();
        if users.contains_key(user) {
            return false;
        }
        users.insert(user.to_string(), password.to_string());
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_then_verify() {
        let mut store = MemoryStore::new();
        assert!(store.register("jane", "pw"));
        assert!(store.verify("jane", "pw"));
        assert!(!store.verify("jane", "wrong"));
        assert!(!store.verify("nobody", "pw"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut store = MemoryStore::new();
        assert!(store.register("jane", "pw"));
        assert!(!store.register("jane", "other"));
        assert!(store.verify("jane", "pw"));
    }

    #[test]
    fn pooled_handles_share_the_map() {
        let pool = MemoryStore::new().with_user("admin", "root").into_pool(2);
        {
            let mut lease = pool.acquire().unwrap();
            assert!(lease.register("jane", "pw"));
        }
        let mut lease = pool.acquire().unwrap();
        assert!(lease.verify("jane", "pw"));
        assert!(lease.verify("admin", "root"));
        assert_eq!(pool.free_count(), 1);
    }
}
