use std::ops::{Deref, DerefMut};

/// Speculative changes to a piece of parser state.
///
/// The transaction works on a private copy of the target. [`commit`](Self::commit) publishes the
/// copy, dropping the transaction discards it. Holding the exclusive borrow of the target for the
/// whole lifetime means only one transaction can be open against it.
pub struct Transaction<'a, T: Clone> {
    target: &'a mut T,
    scratch: T,
}

impl<'a, T: Clone> Transaction<'a, T> {
    pub fn begin(target: &'a mut T) -> Self {
        let scratch = target.clone();
        Transaction { target, scratch }
    }

    pub fn commit(self) {
        *self.target = self.scratch;
    }
}

impl<T: Clone> Deref for Transaction<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.scratch
    }
}

impl<T: Clone> DerefMut for Transaction<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.scratch
    }
}
