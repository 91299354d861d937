//! Future types for gateway interactions.

use crate::error::{ConnectionResult, JoinError, JoinResult};
use core::{
    future::Future,
    marker::Unpin,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use flume::r#async::RecvFut;
use futures::ready;
use pin_project::pin_project;
use tokio::time::{self, Timeout};

/// Future for a call to [`Call::join`].
///
/// This future `await`s Discord's response *and*
/// connection via the [`Driver`]. Only the first phase is bound by
/// [`Config::gateway_timeout`]: the driver applies its own
/// [`Config::driver_timeout`].
///
/// This future ***must not*** be `await`ed while
/// holding the lock around a [`Call`].
///
/// [`Call::join`]: crate::Call::join
/// [`Call`]: crate::Call
/// [`Driver`]: crate::driver::Driver
/// [`Config::gateway_timeout`]: crate::Config::gateway_timeout
/// [`Config::driver_timeout`]: crate::Config::driver_timeout
#[pin_project]
pub struct Join {
    #[pin]
    gateway: Deadline<()>,
    #[pin]
    driver: Deadline<ConnectionResult<()>>,
    gateway_done: bool,
}

impl Join {
    pub(crate) fn new(
        driver: RecvFut<'static, ConnectionResult<()>>,
        gateway: RecvFut<'static, ()>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            gateway: Deadline::new(gateway, timeout),
            driver: Deadline::new(driver, None),
            gateway_done: false,
        }
    }
}

impl Future for Join {
    type Output = JoinResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if !*this.gateway_done {
            ready!(this.gateway.poll(cx))?;
            *this.gateway_done = true;
        }

        this.driver
            .poll(cx)
            .map(|res| res?.map_err(JoinError::Driver))
    }
}

/// A oneshot receive, optionally bounded in time.
#[pin_project(project = DeadlineProj)]
enum Deadline<T: 'static> {
    Bounded(#[pin] Timeout<RecvFut<'static, T>>),
    Unbounded(RecvFut<'static, T>),
}

impl<T: 'static> Deadline<T> {
    fn new(recv: RecvFut<'static, T>, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => Deadline::Bounded(time::timeout(t, recv)),
            None => Deadline::Unbounded(recv),
        }
    }
}

impl<T: Unpin> Future for Deadline<T> {
    type Output = JoinResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            DeadlineProj::Bounded(t) => t.poll(cx).map(|res| match res {
                Ok(Ok(val)) => Ok(val),
                Ok(Err(_)) => Err(JoinError::Dropped),
                Err(_) => Err(JoinError::TimedOut),
            }),
            DeadlineProj::Unbounded(recv) =>
                Pin::new(recv).poll(cx).map_err(|_| JoinError::Dropped),
        }
    }
}
