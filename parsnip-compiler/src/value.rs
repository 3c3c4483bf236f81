//! Runtime values and the closures that transform them.
//!
//! The machine is untyped: every slot of its data stack is a [`Value`]. The
//! closure wrappers in this module compare and hash by identity, which lets
//! expression trees derive `Eq` and `Hash` while still carrying user code.

use std::any::Any;
use std::rc::Rc;

/// A dynamically typed value on the machine's data stack.
pub type Value = Rc<dyn Any>;

/// Wraps `a` into a [`Value`].
pub fn value<A: 'static>(a: A) -> Value {
    Rc::new(a)
}

/// The value pushed by parsers that produce nothing interesting.
pub fn unit() -> Value {
    Rc::new(())
}

/// Takes an `A` out of a [`Value`], cloning only when the value is shared.
///
/// Panics if the value does not hold an `A`; the typed front-end guarantees it does.
pub fn take<A: Clone + 'static>(v: Value) -> A {
    match v.downcast::<A>() {
        Ok(rc) => Rc::try_unwrap(rc).unwrap_or_else(|rc| (*rc).clone()),
        Err(_) => panic!(
            "value does not hold a `{}`; the expression was built with mismatched types",
            std::any::type_name::<A>()
        ),
    }
}

pub(crate) fn address<F: ?Sized>(rc: &Rc<F>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

/// Implements `PartialEq`, `Eq`, `Hash` and `Debug` for a newtype over an `Rc` by pointer.
macro_rules! identity_eq {
    ($name:ident $(<$t:ident>)?) => {
        impl$(<$t>)? PartialEq for $name$(<$t>)? {
            fn eq(&self, other: &Self) -> bool {
                $crate::value::address(&self.0) == $crate::value::address(&other.0)
            }
        }

        impl$(<$t>)? Eq for $name$(<$t>)? {}

        impl$(<$t>)? std::hash::Hash for $name$(<$t>)? {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                std::hash::Hash::hash(&$crate::value::address(&self.0), state)
            }
        }

        impl$(<$t>)? std::fmt::Debug for $name$(<$t>)? {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}@{:x}", stringify!($name), $crate::value::address(&self.0))
            }
        }
    };
}

/// A constant value, compared by identity.
#[derive(Clone)]
pub struct Constant(pub Value);
identity_eq!(Constant);

impl Constant {
    pub fn new<A: 'static>(a: A) -> Self {
        Self(value(a))
    }

    pub fn unit() -> Self {
        Self(unit())
    }

    pub fn get(&self) -> Value {
        self.0.clone()
    }
}

/// A unary function over values.
#[derive(Clone)]
pub struct Func1(Rc<dyn Fn(Value) -> Value>);
identity_eq!(Func1);

impl Func1 {
    pub fn new(f: impl Fn(Value) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// A function that ignores its argument and returns `c`.
    pub fn constant(c: Value) -> Self {
        Self::new(move |_| c.clone())
    }

    pub fn call(&self, v: Value) -> Value {
        (self.0)(v)
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &Func1) -> Func1 {
        let first = self.clone();
        let next = next.clone();
        Func1::new(move |v| next.call(first.call(v)))
    }
}

/// A binary function over values.
#[derive(Clone)]
pub struct Func2(Rc<dyn Fn(Value, Value) -> Value>);
identity_eq!(Func2);

impl Func2 {
    pub fn new(f: impl Fn(Value, Value) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, x: Value, y: Value) -> Value {
        (self.0)(x, y)
    }

    /// Fixes the first argument.
    pub fn bind_left(&self, x: Value) -> Func1 {
        let f = self.clone();
        Func1::new(move |y| f.call(x.clone(), y))
    }

    /// Fixes the second argument.
    pub fn bind_right(&self, y: Value) -> Func1 {
        let f = self.clone();
        Func1::new(move |x| f.call(x, y.clone()))
    }
}

/// A token predicate.
pub struct Pred<T>(Rc<dyn Fn(&T) -> bool>);
identity_eq!(Pred<T>);

impl<T> Clone for Pred<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> Pred<T> {
    pub fn new(f: impl Fn(&T) -> bool + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn test(&self, t: &T) -> bool {
        (self.0)(t)
    }
}

impl<T: PartialEq + 'static> Pred<T> {
    /// The predicate accepting exactly `token`.
    pub fn equals(token: T) -> Self {
        Self::new(move |t| *t == token)
    }
}

/// The value a selective branch inspects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R> Either<L, R> {
    pub fn map_left<M>(self, f: impl FnOnce(L) -> M) -> Either<M, R> {
        match self {
            Either::Left(l) => Either::Left(f(l)),
            Either::Right(r) => Either::Right(r),
        }
    }

    pub fn map_right<S>(self, f: impl FnOnce(R) -> S) -> Either<L, S> {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(f(r)),
        }
    }
}

/// The runtime shape of an [`Either`] inside the machine.
pub type Branch = Either<Value, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_compare_by_identity() {
        let f = Func1::new(|v| v);
        let g = Func1::new(|v| v);
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn take_unwraps_unique_values() {
        let v = value(String::from("abc"));
        assert_eq!(take::<String>(v), "abc");

        let shared = value(7u32);
        let other = shared.clone();
        assert_eq!(take::<u32>(shared), 7);
        assert_eq!(take::<u32>(other), 7);
    }

    #[test]
    fn composition_runs_left_to_right() {
        let inc = Func1::new(|v| value(take::<i32>(v) + 1));
        let dbl = Func1::new(|v| value(take::<i32>(v) * 2));
        assert_eq!(take::<i32>(inc.then(&dbl).call(value(3))), 8);
        assert_eq!(take::<i32>(dbl.then(&inc).call(value(3))), 7);
    }
}
