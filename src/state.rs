//! Type-keyed heterogeneous per-request state bag.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// A small map from type to boxed value, owned solely by one request.
#[derive(Default)]
pub struct StateBag {
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn try_get<T: 'static>(&self) -> Option<&T> {
        self.get::<T>()
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.slots
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, value: T) {
        self.slots.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Construct `T` in place and return a reference to it.
    pub fn emplace<T: Send + Sync + 'static>(&mut self, value: T) -> &T {
        self.slots.insert(TypeId::of::<T>(), Box::new(value));
        self.get::<T>().expect("just inserted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let mut bag = StateBag::new();
        assert!(!bag.has::<u32>());
        bag.set(42u32);
        assert!(bag.has::<u32>());
        assert_eq!(bag.get::<u32>(), Some(&42));
    }

    #[test]
    fn distinct_types_dont_collide() {
        let mut bag = StateBag::new();
        bag.set(1i32);
        bag.set("hello".to_string());
        assert_eq!(bag.get::<i32>(), Some(&1));
        assert_eq!(bag.get::<String>(), Some(&"hello".to_string()));
    }

    #[test]
    fn try_get_missing_is_none() {
        let bag = StateBag::new();
        assert_eq!(bag.try_get::<u32>(), None);
    }
}
