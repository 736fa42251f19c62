//! The watched collection of session endpoints and links
//!
//! Endpoints are announced only after the collection's wanted features have
//! been negotiated on them, so observers never see a half-initialized object.
//! An endpoint whose remote object is destroyed drops out of the collection
//! and is announced as removed.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::endpoint::{Direction, Endpoint, EndpointLink};
use crate::features::Features;
use crate::object::Completion;
use crate::signal::{HandlerId, Signal};

/// Selects endpoints from a collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub media_class: Option<String>,
    pub direction: Option<Direction>,
}

impl ObjectFilter {
    /// Matches every endpoint
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_media_class(mut self, media_class: impl Into<String>) -> Self {
        self.media_class = Some(media_class.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        self.media_class
            .as_deref()
            .map_or(true, |class| endpoint.media_class() == class)
            && self.direction.map_or(true, |d| endpoint.direction() == d)
    }
}

struct CollectionInner {
    wanted: Features,
    endpoints: RefCell<Vec<(Endpoint, HandlerId)>>,
    links: RefCell<Vec<EndpointLink>>,
    object_added: Signal<Endpoint>,
    object_removed: Signal<Endpoint>,
    link_added: Signal<EndpointLink>,
    link_removed: Signal<EndpointLink>,
}

/// Cloneable handle to the shared collection
#[derive(Clone)]
pub struct ObjectCollection(Rc<CollectionInner>);

impl Default for ObjectCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCollection {
    pub fn new() -> Self {
        Self::with_features(Features::STANDARD)
    }

    /// Collection that negotiates `wanted` before announcing endpoints
    pub fn with_features(wanted: Features) -> Self {
        Self(Rc::new(CollectionInner {
            wanted,
            endpoints: RefCell::new(Vec::new()),
            links: RefCell::new(Vec::new()),
            object_added: Signal::new(),
            object_removed: Signal::new(),
            link_added: Signal::new(),
            link_removed: Signal::new(),
        }))
    }

    pub fn wanted_features(&self) -> Features {
        self.0.wanted
    }

    /// Negotiate the wanted features on `endpoint`, then insert it
    pub fn expose(&self, endpoint: Endpoint) {
        let collection = Rc::downgrade(&self.0);
        let pending = endpoint.clone();
        endpoint.object().request_with(
            self.0.wanted,
            Completion::new(move |result| match result {
                Ok(()) => {
                    if let Some(inner) = collection.upgrade() {
                        ObjectCollection(inner).insert(pending);
                    }
                }
                Err(e) => warn!(endpoint = pending.name(), error = %e, "failed to prepare endpoint"),
            }),
        );
    }

    /// Insert an endpoint that is already prepared. Returns `false` if it
    /// was already present.
    pub fn insert(&self, endpoint: Endpoint) -> bool {
        if self.contains(&endpoint) {
            return false;
        }
        if endpoint.object().is_destroyed() {
            debug!(endpoint = endpoint.name(), "not inserting destroyed endpoint");
            return false;
        }

        let collection: Weak<CollectionInner> = Rc::downgrade(&self.0);
        let weak_endpoint = endpoint.downgrade();
        let handler = endpoint.object().connect_destroyed(move |_| {
            if let (Some(inner), Some(endpoint)) = (collection.upgrade(), weak_endpoint.upgrade()) {
                ObjectCollection(inner).remove(&endpoint);
            }
        });

        self.0
            .endpoints
            .borrow_mut()
            .push((endpoint.clone(), handler));
        debug!(endpoint = endpoint.name(), class = endpoint.media_class(), "endpoint added");
        self.0.object_added.emit(&endpoint);
        true
    }

    /// Returns `false` if the endpoint was not present
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let removed = {
            let mut endpoints = self.0.endpoints.borrow_mut();
            let index = endpoints.iter().position(|(e, _)| e == endpoint);
            index.map(|i| endpoints.remove(i))
        };
        let Some((endpoint, handler)) = removed else {
            return false;
        };
        endpoint.object().disconnect_destroyed(handler);
        debug!(endpoint = endpoint.name(), "endpoint removed");
        self.0.object_removed.emit(&endpoint);
        true
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.0.endpoints.borrow().iter().any(|(e, _)| e == endpoint)
    }

    /// Endpoints matching `filter`, in insertion order
    pub fn list(&self, filter: &ObjectFilter) -> Vec<Endpoint> {
        self.0
            .endpoints
            .borrow()
            .iter()
            .map(|(e, _)| e)
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Endpoint> {
        self.0
            .endpoints
            .borrow()
            .iter()
            .map(|(e, _)| e)
            .find(|e| e.name() == name)
            .cloned()
    }

    pub fn find_by_global(&self, global_id: u32) -> Option<Endpoint> {
        self.0
            .endpoints
            .borrow()
            .iter()
            .map(|(e, _)| e)
            .find(|e| e.global_id() == Some(global_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.0.endpoints.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Links
    // =========================================================================

    pub fn add_link(&self, link: EndpointLink) {
        if self.0.links.borrow().contains(&link) {
            return;
        }
        self.0.links.borrow_mut().push(link.clone());
        self.0.link_added.emit(&link);
    }

    pub fn remove_link(&self, link: &EndpointLink) -> bool {
        let removed = {
            let mut links = self.0.links.borrow_mut();
            let before = links.len();
            links.retain(|l| l != link);
            links.len() != before
        };
        if removed {
            self.0.link_removed.emit(link);
        }
        removed
    }

    pub fn links(&self) -> Vec<EndpointLink> {
        self.0.links.borrow().clone()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn connect_object_added(&self, handler: impl Fn(&Endpoint) + 'static) -> HandlerId {
        self.0.object_added.connect(handler)
    }

    pub fn connect_object_removed(&self, handler: impl Fn(&Endpoint) + 'static) -> HandlerId {
        self.0.object_removed.connect(handler)
    }

    pub fn connect_link_added(&self, handler: impl Fn(&EndpointLink) + 'static) -> HandlerId {
        self.0.link_added.connect(handler)
    }

    pub fn connect_link_removed(&self, handler: impl Fn(&EndpointLink) + 'static) -> HandlerId {
        self.0.link_removed.connect(handler)
    }

    /// Disconnect a handler from whichever notification it was connected to
    pub fn disconnect(&self, id: HandlerId) {
        let _ = self.0.object_added.disconnect(id)
            || self.0.object_removed.disconnect(id)
            || self.0.link_added.disconnect(id)
            || self.0.link_removed.disconnect(id);
    }
}

impl std::fmt::Debug for ObjectCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCollection")
            .field("wanted", &self.0.wanted)
            .field("endpoints", &self.len())
            .field("links", &self.0.links.borrow().len())
            .finish()
    }
}
