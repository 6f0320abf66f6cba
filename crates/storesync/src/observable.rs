//! Minimal publish/subscribe value container.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Handler<T> = Rc<dyn Fn(&T)>;

struct Subscribers<T> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(u64, Handler<T>)>>,
}

impl<T> Subscribers<T> {
    fn remove(&self, id: u64) {
        self.entries.borrow_mut().retain(|(existing, _)| *existing != id);
    }
}

/// A value whose changes are pushed to subscribers.
///
/// Subscribers are called synchronously from [`set`](Observable::set), with a
/// copy of the new value, so a handler may read or write the observable again.
pub struct Observable<T> {
    value: RefCell<T>,
    subscribers: Rc<Subscribers<T>>,
}

impl<T: Clone + 'static> Observable<T> {
    /// Create an observable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
            subscribers: Rc::new(Subscribers {
                next_id: Cell::new(0),
                entries: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Copy of the current value.
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Run `f` against the current value without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Replace the value and notify every subscriber.
    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value.clone();
        let handlers: Vec<Handler<T>> = self
            .subscribers
            .entries
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(&value);
        }
    }

    /// Register `handler`, call it once with the current value, then on
    /// every [`set`](Observable::set).
    pub fn subscribe(&self, handler: impl Fn(&T) + 'static) -> Subscription {
        let id = self.subscribers.next_id.get();
        self.subscribers.next_id.set(id + 1);
        let handler: Handler<T> = Rc::new(handler);
        self.subscribers
            .entries
            .borrow_mut()
            .push((id, Rc::clone(&handler)));

        let current = self.get();
        handler(&current);

        let subscribers: Weak<Subscribers<T>> = Rc::downgrade(&self.subscribers);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(subscribers) = subscribers.upgrade() {
                    subscribers.remove(id);
                }
            })),
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.entries.borrow().len()
    }
}

/// Handle for an active subscription.
///
/// Dropping the handle leaves the subscription active; call
/// [`unsubscribe`](Subscription::unsubscribe) to stop receiving values.
#[must_use = "a subscription can only be cancelled through its handle"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Stop delivering values to the handler.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
