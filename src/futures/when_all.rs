// whenAll combinator: joins N futures into one tuple-valued or vector-valued
// future, satisfied exactly once when every child has become done (with
// value or exception — the composite never synthesizes an aggregate
// exception; each child's own outcome is preserved in its slot).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::futures::promise::{Future, Promise};

struct Composite2<A, B> {
    remaining: Mutex<u32>,
    a: Mutex<Option<Future<A>>>,
    b: Mutex<Option<Future<B>>>,
}

/// `whenAll(f1, f2)`.
pub fn when_all2<A, B>(fa: Future<A>, fb: Future<B>) -> Future<(Future<A>, Future<B>)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let promise = Promise::new();
    let downstream = promise.future();
    let composite = Arc::new(Composite2 {
        remaining: Mutex::new(2),
        a: Mutex::new(None),
        b: Mutex::new(None),
    });

    let (composite_a, promise_a) = (composite.clone(), promise.clone());
    fa.register_internal(Box::new(move |done| {
        *composite_a.a.lock() = Some(done);
        if finish_u32(&composite_a.remaining) {
            let a = composite_a.a.lock().take().unwrap();
            let b = composite_a.b.lock().take().unwrap();
            let _ = promise_a.set_value((a, b));
        }
    }));

    let (composite_b, promise_b) = (composite.clone(), promise);
    fb.register_internal(Box::new(move |done| {
        *composite_b.b.lock() = Some(done);
        if finish_u32(&composite_b.remaining) {
            let a = composite_b.a.lock().take().unwrap();
            let b = composite_b.b.lock().take().unwrap();
            let _ = promise_b.set_value((a, b));
        }
    }));

    downstream
}

struct Composite3<A, B, C> {
    remaining: Mutex<u32>,
    a: Mutex<Option<Future<A>>>,
    b: Mutex<Option<Future<B>>>,
    c: Mutex<Option<Future<C>>>,
}

/// `whenAll(f1, f2, f3)`.
pub fn when_all3<A, B, C>(
    fa: Future<A>,
    fb: Future<B>,
    fc: Future<C>,
) -> Future<(Future<A>, Future<B>, Future<C>)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    let promise = Promise::new();
    let downstream = promise.future();
    let composite = Arc::new(Composite3 {
        remaining: Mutex::new(3),
        a: Mutex::new(None),
        b: Mutex::new(None),
        c: Mutex::new(None),
    });

    macro_rules! finish_if_done {
        ($composite:expr, $promise:expr) => {
            if finish_u32(&$composite.remaining) {
                let a = $composite.a.lock().take().unwrap();
                let b = $composite.b.lock().take().unwrap();
                let c = $composite.c.lock().take().unwrap();
                let _ = $promise.set_value((a, b, c));
            }
        };
    }

    let (composite_a, promise_a) = (composite.clone(), promise.clone());
    fa.register_internal(Box::new(move |done| {
        *composite_a.a.lock() = Some(done);
        finish_if_done!(composite_a, promise_a);
    }));

    let (composite_b, promise_b) = (composite.clone(), promise.clone());
    fb.register_internal(Box::new(move |done| {
        *composite_b.b.lock() = Some(done);
        finish_if_done!(composite_b, promise_b);
    }));

    let (composite_c, promise_c) = (composite.clone(), promise);
    fc.register_internal(Box::new(move |done| {
        *composite_c.c.lock() = Some(done);
        finish_if_done!(composite_c, promise_c);
    }));

    downstream
}

struct CompositeVec<T> {
    remaining: Mutex<usize>,
    slots: Mutex<Vec<Option<Future<T>>>>,
}

/// `whenAll(first, last)` in iterator form: the homogeneous vector case.
pub fn when_all_vec<T: Send + 'static>(futures: Vec<Future<T>>) -> Future<Vec<Future<T>>> {
    let promise = Promise::new();
    let downstream = promise.future();
    let n = futures.len();

    if n == 0 {
        let _ = promise.set_value(Vec::new());
        return downstream;
    }

    let composite = Arc::new(CompositeVec {
        remaining: Mutex::new(n),
        slots: Mutex::new((0..n).map(|_| None).collect()),
    });

    for (index, future) in futures.into_iter().enumerate() {
        let composite = composite.clone();
        let promise = promise.clone();
        future.register_internal(Box::new(move |done| {
            composite.slots.lock()[index] = Some(done);
            if finish_usize(&composite.remaining) {
                let slots = std::mem::take(&mut *composite.slots.lock());
                let results: Vec<Future<T>> = slots.into_iter().map(|s| s.expect("slot filled")).collect();
                let _ = promise.set_value(results);
            }
        }));
    }

    downstream
}

/// Decrements `remaining` and reports whether this call brought it to zero.
fn finish_u32(remaining: &Mutex<u32>) -> bool {
    let mut guard = remaining.lock();
    *guard -= 1;
    *guard == 0
}

fn finish_usize(remaining: &Mutex<usize>) -> bool {
    let mut guard = remaining.lock();
    *guard -= 1;
    *guard == 0
}
