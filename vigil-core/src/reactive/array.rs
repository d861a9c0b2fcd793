//! Array Mutators
//!
//! Element writes by index are not intercepted; arrays report change through
//! their mutating methods instead. Each mutator:
//!
//! 1. applies the change to the underlying storage,
//! 2. observes any inserted elements (`push`, `unshift`, `splice`),
//! 3. notifies the array's shape dep.
//!
//! Plain (unobserved) arrays run the same methods without notification. The
//! notification fires for every mutator call on an observed array, even when
//! the call turned out to be a no-op (`pop` on an empty array).

use std::cmp::Ordering;

use super::runtime::Runtime;
use super::value::{Array, Value};

impl Array {
    /// Append values and return the new length.
    pub fn push(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.extend(inserted.iter().cloned());
            items.len()
        };
        self.after_mutation(&inserted);
        len
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        let removed = self.0.items.borrow_mut().pop();
        self.after_mutation(&[]);
        removed
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.after_mutation(&[]);
        removed
    }

    /// Prepend values and return the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.splice(0..0, inserted.iter().cloned());
            items.len()
        };
        self.after_mutation(&inserted);
        len
    }

    /// Remove `delete_count` elements at `start`, insert `values` there, and
    /// return the removed elements. Both bounds are clamped to the length.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = values.into_iter().collect();
        let removed = {
            let mut items = self.0.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, inserted.iter().cloned()).collect();
            removed
        };
        self.after_mutation(&inserted);
        removed
    }

    /// Sort with [`Value::default_cmp`].
    pub fn sort(&self) {
        self.sort_by(Value::default_cmp);
    }

    /// Sort with a comparator.
    ///
    /// The elements are taken out while sorting, so the comparator may read
    /// the array without a borrow conflict (it sees it empty).
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut items = std::mem::take(&mut *self.0.items.borrow_mut());
        items.sort_by(compare);
        *self.0.items.borrow_mut() = items;
        self.after_mutation(&[]);
    }

    /// Reverse the elements in place.
    pub fn reverse(&self) {
        self.0.items.borrow_mut().reverse();
        self.after_mutation(&[]);
    }

    fn after_mutation(&self, inserted: &[Value]) {
        let Some(observer) = self.observer() else {
            return;
        };
        if let Some(runtime) = observer.dep().runtime() {
            runtime.observe_array(inserted);
        }
        observer.dep().notify();
    }
}

/// Depend on the shape dep of every observed element, recursing into nested
/// arrays.
///
/// Element reads are not intercepted, so this is how a watcher reading an
/// array property learns about mutation of containers inside it.
pub(crate) fn depend_array(array: &Array) {
    for item in array.to_vec() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

impl Runtime {
    /// Build an observed array.
    pub fn reactive_array(&self, items: Vec<Value>) -> Array {
        let array = Array::from_vec(items);
        self.observe(&Value::Array(array.clone()));
        array
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Object;

    fn nums(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::from).collect()
    }

    #[test]
    fn mutators_behave_like_a_list() {
        let array = Array::from_vec(nums(&[1, 2, 3]));

        assert_eq!(array.push(nums(&[4])), 4);
        assert_eq!(array.pop(), Some(Value::from(4)));
        assert_eq!(array.shift(), Some(Value::from(1)));
        assert_eq!(array.unshift(nums(&[0])), 3);
        assert_eq!(array.splice(1, 1, nums(&[7, 8])), nums(&[2]));
        assert_eq!(array.to_vec(), nums(&[0, 7, 8, 3]));

        array.reverse();
        assert_eq!(array.to_vec(), nums(&[3, 8, 7, 0]));
        array.sort();
        assert_eq!(array.to_vec(), nums(&[0, 3, 7, 8]));
    }

    #[test]
    fn splice_clamps_out_of_range() {
        let array = Array::from_vec(nums(&[1, 2]));
        assert!(array.splice(5, 3, nums(&[9])).is_empty());
        assert_eq!(array.to_vec(), nums(&[1, 2, 9]));
        assert_eq!(array.splice(1, 100, []), nums(&[2, 9]));
    }

    #[test]
    fn pushed_objects_are_observed() {
        let runtime = Runtime::new();
        let array = runtime.reactive_array(Vec::new());
        let item = Object::from_pairs([("x", 1)]);

        array.push([Value::from(item.clone())]);

        assert!(item.observer().is_some());
        assert!(item.is_reactive("x"));
    }

    #[test]
    fn plain_array_inserts_stay_plain() {
        let array = Array::new();
        let item = Object::new();
        array.push([Value::from(item.clone())]);
        assert!(item.observer().is_none());
    }

    #[test]
    fn sort_by_custom_comparator() {
        let array = Array::from_vec(nums(&[1, 3, 2]));
        array.sort_by(|a, b| b.default_cmp(a));
        assert_eq!(array.to_vec(), nums(&[3, 2, 1]));
    }
}
