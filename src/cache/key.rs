//! Cache Key Module
//!
//! Turns call arguments into hashable keys.
//!
//! An argument that cannot produce a key (`cache_key` returns `None`) is not
//! an error: the wrapper calls the function directly and caches nothing.

use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

// == Cache Key Trait ==
/// Derives the key under which a call's result is stored.
pub trait CacheKey {
    /// Owned, hashable form of the argument
    type Key: Hash + Eq + Clone;

    /// Returns the key, or `None` if this value must not be cached.
    fn cache_key(&self) -> Option<Self::Key>;
}

macro_rules! impl_owned_key {
    ($($t:ty),* $(,)?) => {
        $(
            impl CacheKey for $t {
                type Key = $t;

                fn cache_key(&self) -> Option<Self::Key> {
                    Some(self.clone())
                }
            }
        )*
    };
}

impl_owned_key!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    String,
);

impl CacheKey for str {
    type Key = String;

    fn cache_key(&self) -> Option<Self::Key> {
        Some(self.to_owned())
    }
}

// Floats are keyed by bit pattern. NaN never equals itself, so it has no key;
// -0.0 == 0.0, so both share one.
impl CacheKey for f64 {
    type Key = u64;

    fn cache_key(&self) -> Option<Self::Key> {
        if self.is_nan() {
            None
        } else if *self == 0.0 {
            Some(0)
        } else {
            Some(self.to_bits())
        }
    }
}

impl CacheKey for f32 {
    type Key = u32;

    fn cache_key(&self) -> Option<Self::Key> {
        if self.is_nan() {
            None
        } else if *self == 0.0 {
            Some(0)
        } else {
            Some(self.to_bits())
        }
    }
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    type Key = T::Key;

    fn cache_key(&self) -> Option<Self::Key> {
        (**self).cache_key()
    }
}

impl<T: CacheKey + ?Sized> CacheKey for Box<T> {
    type Key = T::Key;

    fn cache_key(&self) -> Option<Self::Key> {
        (**self).cache_key()
    }
}

impl<T: CacheKey> CacheKey for Option<T> {
    type Key = Option<T::Key>;

    fn cache_key(&self) -> Option<Self::Key> {
        match self {
            Some(value) => value.cache_key().map(Some),
            None => Some(None),
        }
    }
}

impl<T: CacheKey> CacheKey for [T] {
    type Key = Vec<T::Key>;

    fn cache_key(&self) -> Option<Self::Key> {
        self.iter().map(CacheKey::cache_key).collect()
    }
}

impl<T: CacheKey> CacheKey for Vec<T> {
    type Key = Vec<T::Key>;

    fn cache_key(&self) -> Option<Self::Key> {
        self.as_slice().cache_key()
    }
}

impl<T: CacheKey, const N: usize> CacheKey for [T; N] {
    type Key = Vec<T::Key>;

    fn cache_key(&self) -> Option<Self::Key> {
        self.as_slice().cache_key()
    }
}

macro_rules! impl_tuple_key {
    ($($name:ident $var:ident),+) => {
        impl<$($name: CacheKey),+> CacheKey for ($($name,)+) {
            type Key = ($($name::Key,)+);

            fn cache_key(&self) -> Option<Self::Key> {
                let ($($var,)+) = self;
                Some(($($var.cache_key()?,)+))
            }
        }
    };
}

impl_tuple_key!(A a);
impl_tuple_key!(A a, B b);
impl_tuple_key!(A a, B b, C c);
impl_tuple_key!(A a, B b, C c, D d);
impl_tuple_key!(A a, B b, C c, D d, E e);
impl_tuple_key!(A a, B b, C c, D d, E e, F f);

// == Unhashable ==
/// Marks an argument that must never be cached.
///
/// Any call whose arguments contain an `Unhashable` runs the wrapped function
/// directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Unhashable<T>(pub T);

impl<T> CacheKey for Unhashable<T> {
    type Key = ();

    fn cache_key(&self) -> Option<Self::Key> {
        None
    }
}

impl<T> Deref for Unhashable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

// == By Address ==
/// Keys a shared value by identity instead of by content.
///
/// Used as the receiver of a bound method: two receivers with equal contents
/// but different allocations get separate entries. The key holds a clone of
/// the `Arc`, so the allocation cannot be reused while an entry refers to it.
#[derive(Debug)]
pub struct ByAddress<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> ByAddress<T> {
    pub fn new(value: Arc<T>) -> Self {
        Self(value)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl<T: ?Sized> Clone for ByAddress<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for ByAddress<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for ByAddress<T> {}

impl<T: ?Sized> Hash for ByAddress<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> Deref for ByAddress<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> CacheKey for ByAddress<T> {
    type Key = ByAddress<T>;

    fn cache_key(&self) -> Option<Self::Key> {
        Some(self.clone())
    }
}
