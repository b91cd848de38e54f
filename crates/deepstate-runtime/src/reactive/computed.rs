#![forbid(unsafe_code)]

//! Derived views.
//!
//! A [`Computed<T>`] owns an [`Observable<T>`] that is recomputed eagerly
//! whenever one of its sources changes, so it can be read and subscribed to
//! like any other view. "Has errors" and "is dirty" are computed this way.

use std::rc::Rc;

use super::observable::{Observable, Subscription};

/// A view derived from one or two observables.
pub struct Computed<T> {
    value: Observable<T>,
    _sources: Vec<Subscription>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Derive from a single source.
    pub fn new<S>(source: &Observable<S>, f: impl Fn(&S) -> T + 'static) -> Self
    where
        S: Clone + PartialEq + 'static,
    {
        let value = Observable::new(source.with(&f));
        let target = value.clone();
        let sub = source.subscribe(move |s| target.set(f(s)));
        Self {
            value,
            _sources: vec![sub],
        }
    }

    /// Derive from two sources.
    pub fn new2<A, B>(a: &Observable<A>, b: &Observable<B>, f: impl Fn(&A, &B) -> T + 'static) -> Self
    where
        A: Clone + PartialEq + 'static,
        B: Clone + PartialEq + 'static,
    {
        let f = Rc::new(f);
        let value = Observable::new(a.with(|av| b.with(|bv| f(av, bv))));

        let (target, f_a, b_src) = (value.clone(), Rc::clone(&f), b.clone());
        let sub_a = a.subscribe(move |av| target.set(b_src.with(|bv| f_a(av, bv))));

        let (target, f_b, a_src) = (value.clone(), f, a.clone());
        let sub_b = b.subscribe(move |bv| target.set(a_src.with(|av| f_b(av, bv))));

        Self {
            value,
            _sources: vec![sub_a, sub_b],
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.value.get()
    }

    /// The backing observable, for subscribing.
    #[must_use]
    pub fn observable(&self) -> &Observable<T> {
        &self.value
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.value.subscribe(callback)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed").field("value", &self.value).finish()
    }
}
