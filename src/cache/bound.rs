//! Method Binding Module
//!
//! Binds a receiver as the first key component of a memoized method.
//!
//! A method memo is an ordinary wrapper whose argument type is
//! `(receiver, args)`. All receivers share that one cache; the receiver's own
//! key keeps their entries apart. Use [`ByAddress`](crate::cache::ByAddress)
//! as the receiver to key by identity rather than by value.

// == Memoized Trait ==
/// A synchronous memoizing wrapper.
pub trait Memoized<A> {
    /// Value returned by the wrapped function
    type Output;
    /// Error returned by the wrapped function
    type Error;

    /// Answers a call, from cache when possible.
    fn invoke(&self, args: A) -> Result<Self::Output, Self::Error>;
}

// == Bound ==
/// A wrapper with its receiver fixed.
#[derive(Debug)]
pub struct Bound<'a, M: ?Sized, Recv> {
    memo: &'a M,
    receiver: Recv,
}

impl<'a, M: ?Sized, Recv: Clone> Bound<'a, M, Recv> {
    // == Constructor ==
    /// Pairs `memo` with the receiver every call will use.
    pub fn new(memo: &'a M, receiver: Recv) -> Self {
        Self { memo, receiver }
    }

    // == Receiver ==
    /// Returns the bound receiver.
    pub fn receiver(&self) -> &Recv {
        &self.receiver
    }

    // == Invoke ==
    /// Calls the method for the bound receiver.
    pub fn invoke<Args>(&self, args: Args) -> Result<M::Output, M::Error>
    where
        M: Memoized<(Recv, Args)>,
    {
        self.memo.invoke((self.receiver.clone(), args))
    }
}

impl<M: ?Sized, Recv: Clone> Clone for Bound<'_, M, Recv> {
    fn clone(&self) -> Self {
        Self {
            memo: self.memo,
            receiver: self.receiver.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    struct Recorder {
        calls: Cell<usize>,
    }

    impl Memoized<(u8, u8)> for Recorder {
        type Output = (u8, u8);
        type Error = Infallible;

        fn invoke(&self, args: (u8, u8)) -> Result<(u8, u8), Infallible> {
            self.calls.set(self.calls.get() + 1);
            Ok(args)
        }
    }

    #[test]
    fn test_bound_prepends_receiver() {
        let recorder = Recorder {
            calls: Cell::new(0),
        };
        let bound = Bound::new(&recorder, 7u8);

        assert_eq!(bound.invoke(3u8), Ok((7, 3)));
        assert_eq!(*bound.receiver(), 7);
        assert_eq!(recorder.calls.get(), 1);
    }
}
