//! Boundary conversions to and from the `futures` ecosystem.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use crate::effect::node::Node;
use crate::effect::Effect;

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + fmt::Debug + 'static,
{
    /// Run the effect and expose its outcome as a future.
    ///
    /// The future resolves on the first result delivery. If the run never
    /// delivers (canceled, or suspended forever) the future never resolves.
    pub fn unsafe_to_future(self) -> BoxFuture<'static, Result<A, E>> {
        let (tx, rx) = futures::channel::oneshot::channel();
        self.unsafe_run_async(move |result| {
            let _ = tx.send(result);
        });
        Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => futures::future::pending().await,
            }
        })
    }

    /// Lift an effect producing a future into an effect of its output.
    ///
    /// Rust futures are inert until driven, so the inner future is driven
    /// to completion on a dedicated thread (`futures::executor::block_on`);
    /// the effect suspends until it resolves. Futures needing a particular
    /// runtime should be spawned there and adapted through
    /// [`async_`](Effect::async_) instead.
    pub fn from_future<Fut>(future_effect: Effect<Fut, E>) -> Effect<A, E>
    where
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        future_effect.and_then(|fut| {
            Effect::from_node(Node::Async {
                register: Box::new(move |_conn, completion| {
                    std::thread::spawn(move || {
                        let result = futures::executor::block_on(fut);
                        completion.complete(result.map(crate::effect::node::boxed));
                    });
                }),
            })
        })
    }
}
