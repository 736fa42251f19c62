//! Creating a session-owned endpoint
//!
//! An endpoint the session creates itself is backed by a node. The node is
//! created through the descriptor's factory and prepared first; the endpoint
//! object refers to it by id and is exposed in the collection once it has
//! the features the collection asks for. On failure whatever was already
//! created is destroyed again.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::collection::ObjectCollection;
use crate::endpoint::{keys, Endpoint, EndpointDescriptor};
use crate::error::{Error, Result};
use crate::features::Features;
use crate::object::{Completion, InterfaceType, ManagedObject};
use crate::remote::RemoteConnection;
use crate::transition::{Step, Transition, TransitionDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationStep {
    CreateNode,
    WaitNode,
    CreateEndpoint,
    WaitEndpoint,
}

pub struct EndpointActivation {
    remote: Rc<dyn RemoteConnection>,
    collection: ObjectCollection,
    descriptor: EndpointDescriptor,
    node: RefCell<Option<ManagedObject>>,
    endpoint: RefCell<Option<Endpoint>>,
}

impl EndpointActivation {
    pub fn new(
        remote: Rc<dyn RemoteConnection>,
        collection: ObjectCollection,
        descriptor: EndpointDescriptor,
    ) -> Self {
        Self {
            remote,
            collection,
            descriptor,
            node: RefCell::new(None),
            endpoint: RefCell::new(None),
        }
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    /// The backing node, once created
    pub fn node(&self) -> Option<ManagedObject> {
        self.node.borrow().clone()
    }

    /// The endpoint, once created
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.borrow().clone()
    }

    fn create_node(&self, transition: &Transition<Self>) {
        let props = self.descriptor.to_properties();
        let handle = match self
            .remote
            .create_object(&self.descriptor.factory, InterfaceType::Node, &props)
        {
            Ok(handle) => handle,
            Err(e) => return transition.return_error(e),
        };
        debug!(endpoint = %self.descriptor.name, node = handle.id(), "node created");
        *self.node.borrow_mut() = Some(ManagedObject::wrap(&self.remote, handle, props));
        transition.advance();
    }

    fn create_endpoint(&self, transition: &Transition<Self>) {
        let Some(node) = self.node() else {
            return transition.return_error(Error::invariant("endpoint step without a node"));
        };
        let Some(node_id) = node.global_id() else {
            return transition.return_error(Error::operation_failed("node has no id"));
        };

        let props = self
            .descriptor
            .to_properties()
            .with(keys::NODE_ID, node_id.to_string());
        let handle = match self
            .remote
            .create_object("endpoint", InterfaceType::Endpoint, &props)
        {
            Ok(handle) => handle,
            Err(e) => return transition.return_error(e),
        };
        let object = ManagedObject::wrap(&self.remote, handle, props.clone());
        match Endpoint::with_backing(object.clone(), &props, node) {
            Ok(endpoint) => {
                *self.endpoint.borrow_mut() = Some(endpoint);
                transition.advance();
            }
            Err(e) => {
                object.destroy();
                transition.return_error(e);
            }
        }
    }

    fn wait(&self, transition: &Transition<Self>, object: &ManagedObject, wanted: Features) {
        let transition = transition.clone();
        object.request_with(
            wanted,
            Completion::new(move |result| match result {
                Ok(()) => transition.advance(),
                Err(e) => transition.return_error(e),
            }),
        );
    }

    fn rollback(&self) {
        if let Some(endpoint) = self.endpoint.borrow_mut().take() {
            endpoint.object().destroy();
        }
        if let Some(node) = self.node.borrow_mut().take() {
            node.destroy();
        }
    }
}

impl TransitionDef for EndpointActivation {
    type Step = ActivationStep;

    fn next_step(&self, step: Step<ActivationStep>) -> Step<ActivationStep> {
        use ActivationStep::*;
        match step {
            Step::None => Step::Custom(CreateNode),
            Step::Custom(CreateNode) => Step::Custom(WaitNode),
            Step::Custom(WaitNode) => Step::Custom(CreateEndpoint),
            Step::Custom(CreateEndpoint) => Step::Custom(WaitEndpoint),
            Step::Custom(WaitEndpoint) => Step::None,
            Step::Error => Step::Error,
        }
    }

    fn execute_step(&self, transition: &Transition<Self>, step: Step<ActivationStep>) {
        match step {
            Step::Custom(ActivationStep::CreateNode) => self.create_node(transition),
            Step::Custom(ActivationStep::WaitNode) => match self.node() {
                Some(node) => self.wait(transition, &node, Features::STANDARD),
                None => transition.return_error(Error::invariant("no node to wait for")),
            },
            Step::Custom(ActivationStep::CreateEndpoint) => self.create_endpoint(transition),
            Step::Custom(ActivationStep::WaitEndpoint) => match self.endpoint() {
                Some(endpoint) => {
                    self.wait(transition, endpoint.object(), self.collection.wanted_features())
                }
                None => transition.return_error(Error::invariant("no endpoint to wait for")),
            },
            Step::Error => {
                warn!(endpoint = %self.descriptor.name, "endpoint activation failed, rolling back");
                self.rollback();
            }
            Step::None => {}
        }
    }
}

/// Create the endpoint `descriptor` describes and insert it into
/// `collection`. `on_done` receives the endpoint or the first error.
pub fn activate_endpoint(
    remote: Rc<dyn RemoteConnection>,
    collection: ObjectCollection,
    descriptor: EndpointDescriptor,
    on_done: impl FnOnce(Result<Endpoint>) + 'static,
) -> Transition<EndpointActivation> {
    let transition = Transition::new(
        EndpointActivation::new(remote, collection, descriptor),
        move |transition: &Transition<EndpointActivation>, result| {
            let def = transition.definition();
            let result = result.and_then(|()| {
                def.endpoint()
                    .ok_or_else(|| Error::invariant("activation finished without an endpoint"))
            });
            if let Ok(endpoint) = &result {
                def.collection.insert(endpoint.clone());
                info!(endpoint = endpoint.name(), class = endpoint.media_class(), "endpoint activated");
            }
            on_done(result);
        },
    );
    transition.start();
    transition
}
