//! Request/reply over the bus.
//!
//! There are no request ids on the wire. A request is sent with a fresh
//! random callback channel as its `from`; whoever answers addresses the
//! reply to that channel, and a one-shot route on it hands the reply
//! back to the waiting caller.

use arcmesh_protocol::{Message, random_callback_channel};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{RequestConfig, RequestError, RouteId, Router};

/// Destroys the callback route however the request ends, including when
/// the caller drops the future.
struct RouteGuard<'a> {
    router: &'a Router,
    route: RouteId,
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        self.router.destroy_route_id(self.route);
    }
}

impl Router {
    /// Sends `message` and waits for the first reply on its callback
    /// channel, pumping this router every
    /// [`RequestConfig::pump_interval`] meanwhile.
    ///
    /// Each attempt waits [`RequestConfig::timeout`]; on timeout the same
    /// message is sent again, up to [`RequestConfig::retries`] times.
    ///
    /// # Errors
    /// - [`RequestError::NoReply`] after the last attempt times out
    /// - [`RequestError::Director`] if the message can't be sent
    pub async fn request(
        &self,
        mut message: Message,
        config: &RequestConfig,
    ) -> Result<Message, RequestError> {
        let callback = random_callback_channel();
        message.from = callback;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let route = self.register_route(
            move |reply| {
                let _ = tx.send(reply.clone());
                Ok(())
            },
            [callback],
        );
        let _guard = RouteGuard {
            router: self,
            route,
        };

        let attempts = config.attempts();
        for attempt in 1..=attempts {
            self.send(message.clone())?;
            self.pump();

            let deadline = time::sleep_until(Instant::now() + config.timeout());
            tokio::pin!(deadline);
            let mut ticker = time::interval(config.pump_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    reply = rx.recv() => match reply {
                        Some(reply) => return Ok(reply),
                        None => return Err(RequestError::NoReply { attempts: attempt }),
                    },
                    _ = &mut deadline => break,
                    _ = ticker.tick() => {
                        self.pump();
                    }
                }
            }
            tracing::debug!(
                %callback,
                attempt,
                attempts,
                msg_type = ?message.msg_type(),
                "request timed out"
            );
        }
        Err(RequestError::NoReply { attempts })
    }
}
