//! Creates the endpoints listed in the configuration
//!
//! Every configured endpoint is activated concurrently. The script reports
//! success once all of them are exposed, or the first error. Endpoints it
//! created are destroyed together with their nodes when it is deactivated,
//! or before the error is reported when activation fails.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::Plugin;
use crate::activation::activate_endpoint;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::object::Completion;
use crate::session::Session;

#[derive(Default)]
pub struct StaticEndpoints {
    endpoints: RefCell<Vec<Endpoint>>,
}

impl StaticEndpoints {
    pub const NAME: &'static str = "static-endpoints";

    pub fn build() -> Rc<dyn Plugin> {
        Rc::new(Self::default())
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.borrow().clone()
    }

    fn release(&self) {
        let endpoints: Vec<Endpoint> = self.endpoints.borrow_mut().drain(..).collect();
        for endpoint in endpoints {
            debug!(endpoint = endpoint.name(), "destroying static endpoint");
            endpoint.object().destroy();
            if let Some(node) = endpoint.backing() {
                node.destroy();
            }
        }
    }
}

/// Shared bookkeeping for one activation round
struct Round {
    pending: Cell<usize>,
    error: RefCell<Option<Error>>,
    done: RefCell<Option<Completion>>,
}

impl Round {
    /// One activation finished; resolve `done` after the last
    fn finish_one(&self) {
        let left = self.pending.get() - 1;
        self.pending.set(left);
        if left > 0 {
            return;
        }
        let Some(done) = self.done.borrow_mut().take() else {
            return;
        };
        match self.error.borrow_mut().take() {
            Some(error) => done.fail(error),
            None => done.succeed(),
        }
    }
}

impl Plugin for StaticEndpoints {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn activate(self: Rc<Self>, session: &Session, done: Completion) {
        let descriptors = session.config().endpoints.clone();
        info!(count = descriptors.len(), "creating static endpoints");

        let me = Rc::downgrade(&self);
        let done = Completion::new(move |result| {
            if result.is_err() {
                if let Some(me) = me.upgrade() {
                    me.release();
                }
            }
            done.resolve(result);
        });

        // Held at one until every activation is started
        let round = Rc::new(Round {
            pending: Cell::new(descriptors.len() + 1),
            error: RefCell::new(None),
            done: RefCell::new(Some(done)),
        });

        for descriptor in descriptors {
            let me = Rc::downgrade(&self);
            let round = round.clone();
            let name = descriptor.name.clone();
            activate_endpoint(
                Rc::clone(session.remote()),
                session.collection().clone(),
                descriptor,
                move |result| {
                    match result {
                        Ok(endpoint) => {
                            if let Some(me) = me.upgrade() {
                                me.endpoints.borrow_mut().push(endpoint);
                            }
                        }
                        Err(e) => {
                            warn!(endpoint = %name, error = %e, "failed to create endpoint");
                            let mut first = round.error.borrow_mut();
                            if first.is_none() {
                                *first = Some(e);
                            }
                        }
                    }
                    round.finish_one();
                },
            );
        }
        round.finish_one();
    }

    fn deactivate(&self, _session: &Session) {
        self.release();
    }
}
