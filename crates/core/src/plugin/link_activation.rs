//! Activates every link that appears in the session

use std::cell::Cell;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::Plugin;
use crate::endpoint::{EndpointLink, LinkState};
use crate::object::Completion;
use crate::remote::RemoteConnection;
use crate::session::Session;
use crate::signal::HandlerId;

#[derive(Default)]
pub struct LinkActivation {
    handler: Cell<Option<HandlerId>>,
}

impl LinkActivation {
    pub const NAME: &'static str = "link-activation";

    pub fn build() -> Rc<dyn Plugin> {
        Rc::new(Self::default())
    }
}

fn activate_link(remote: &dyn RemoteConnection, link: &EndpointLink) {
    if link.state() == LinkState::Inactive {
        debug!(
            id = link.id(),
            source = link.source().name(),
            sink = link.sink().name(),
            "activating link"
        );
        remote.request_link_state(link, LinkState::Active);
    }
}

impl Plugin for LinkActivation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn activate(self: Rc<Self>, session: &Session, done: Completion) {
        let collection = session.collection();
        let remote: Weak<dyn RemoteConnection> = Rc::downgrade(session.remote());
        let id = collection.connect_link_added(move |link| {
            if let Some(remote) = remote.upgrade() {
                activate_link(remote.as_ref(), link);
            }
        });
        self.handler.set(Some(id));

        for link in collection.links() {
            activate_link(session.remote().as_ref(), &link);
        }
        done.succeed();
    }

    fn deactivate(&self, session: &Session) {
        if let Some(id) = self.handler.take() {
            session.collection().disconnect(id);
        }
    }
}
