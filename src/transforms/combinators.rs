//! Transform composition.
//!
//! [`Then`] feeds one transform into the next; chains of any length are
//! nested `Then`s, most conveniently written with [`chain!`](crate::chain).
//! Stage types are checked by the compiler: the output type of each stage
//! must be the input type of the next.

use async_trait::async_trait;
use tracing::trace;

use crate::core::{Error, Result, Transform};

/// Two transforms applied one after the other.
///
/// Short-circuits on the first error of either stage, `Drop` and `Quit`
/// included.
#[derive(Debug, Clone)]
pub struct Then<A, B> {
    first: A,
    second: B,
}

impl<A, B> Then<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

#[async_trait]
impl<A, B> Transform for Then<A, B>
where
    A: Transform,
    B: Transform<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn apply(&mut self, item: Self::Input) -> Result<Self::Output> {
        let intermediate = self.first.apply(item).await?;
        self.second.apply(intermediate).await
    }
}

/// Turns every failure of the inner transform except `Quit` into `Drop`.
#[derive(Debug, Clone)]
pub struct OrDrop<X> {
    inner: X,
}

impl<X> OrDrop<X> {
    pub fn new(inner: X) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<X: Transform> Transform for OrDrop<X> {
    type Input = X::Input;
    type Output = X::Output;

    async fn apply(&mut self, item: Self::Input) -> Result<Self::Output> {
        match self.inner.apply(item).await {
            Err(Error::Quit) => Err(Error::Quit),
            Err(Error::Drop) => Err(Error::Drop),
            Err(e) => {
                trace!(error = %e, "dropping value after transform error");
                Err(Error::Drop)
            }
            ok => ok,
        }
    }
}

/// Compose transforms left to right into a single transform.
///
/// ```rust
/// use notiweld::chain;
/// use notiweld::transforms::{from_fn, to_string};
///
/// let _double_then_show = chain!(from_fn(|x: i64| x * 2), to_string::<i64>());
/// ```
#[macro_export]
macro_rules! chain {
    ($first:expr $(,)?) => {
        $first
    };
    ($first:expr, $($rest:expr),+ $(,)?) => {
        $crate::core::TransformExt::then($first, $crate::chain!($($rest),+))
    };
}
