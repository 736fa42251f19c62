//! Rule-driven link arbitration
//!
//! Every time an endpoint appears or disappears the policy schedules a
//! rescan behind a remote barrier, so the scan sees the graph after the
//! remote side has caught up. The scan walks every endpoint, matches it
//! against the rule table, resolves a target and decides whether to link.
//!
//! Only one rescan and one link attempt per target are in flight at a time.
//! A trigger arriving while an earlier one is still unresolved is dropped
//! with a warning. Each trigger gets exactly one `done` notification,
//! carrying the link that was created for it or `None`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use super::{Policy, PolicyManager, Target, TargetQuery, RANK_UPSTREAM};
use crate::collection::{ObjectCollection, ObjectFilter};
use crate::config::{EqualPriority, PolicySettings};
use crate::endpoint::{Endpoint, EndpointLink};
use crate::error::Result;
use crate::remote::{LinkRequest, RemoteConnection};
use crate::rules::{LinkRule, RuleLookup};
use crate::signal::{HandlerId, Signal};

/// Payload of the `done` notification
#[derive(Debug, Clone)]
pub struct LinkDone {
    /// The endpoint whose arrival or removal triggered the rescan
    pub endpoint: Endpoint,
    /// Link created for it, if any
    pub link: Option<EndpointLink>,
}

#[derive(Default)]
struct PendingState {
    rescan: bool,
    endpoint: Option<Endpoint>,
    target: Option<Endpoint>,
}

pub struct ConfigPolicy {
    me: Weak<ConfigPolicy>,
    remote: Rc<dyn RemoteConnection>,
    collection: ObjectCollection,
    rules: Rc<dyn RuleLookup>,
    settings: PolicySettings,
    manager: RefCell<Weak<PolicyManager>>,
    pending: RefCell<PendingState>,
    done: Signal<LinkDone>,
}

impl ConfigPolicy {
    pub const NAME: &'static str = "config-policy";

    pub fn new(
        remote: Rc<dyn RemoteConnection>,
        collection: ObjectCollection,
        rules: Rc<dyn RuleLookup>,
        settings: PolicySettings,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            remote,
            collection,
            rules,
            settings,
            manager: RefCell::new(Weak::new()),
            pending: RefCell::new(PendingState::default()),
            done: Signal::new(),
        })
    }

    /// Fires once per trigger when its rescan has fully resolved
    pub fn connect_done(&self, handler: impl Fn(&LinkDone) + 'static) -> HandlerId {
        self.done.connect(handler)
    }

    pub fn disconnect_done(&self, id: HandlerId) -> bool {
        self.done.disconnect(id)
    }

    pub fn has_pending_rescan(&self) -> bool {
        self.pending.borrow().rescan
    }

    /// The target currently claimed by an in-flight link attempt
    pub fn pending_target(&self) -> Option<Endpoint> {
        self.pending.borrow().target.clone()
    }

    // =========================================================================
    // Rescan
    // =========================================================================

    fn rescan(&self, trigger: &Endpoint) {
        {
            let mut pending = self.pending.borrow_mut();
            if pending.rescan {
                debug!(endpoint = trigger.name(), "rescan already scheduled");
                return;
            }
            if let Some(current) = &pending.endpoint {
                warn!(
                    endpoint = trigger.name(),
                    pending = current.name(),
                    "not handling endpoint because of pending link"
                );
                return;
            }
            pending.endpoint = Some(trigger.clone());
            pending.rescan = true;
        }

        let me = self.me.clone();
        self.remote.barrier(Box::new(move || {
            if let Some(policy) = me.upgrade() {
                policy.sync_rescan();
            }
        }));
    }

    fn sync_rescan(&self) {
        let trigger = self.pending.borrow().endpoint.clone();
        let mut handled = false;

        for endpoint in self.collection.list(&ObjectFilter::any()) {
            if self.handle_endpoint(&endpoint) {
                handled |= trigger.as_ref() == Some(&endpoint);
            }
        }

        // The link callback may already have resolved the trigger
        if !handled {
            let trigger = self.pending.borrow_mut().endpoint.take();
            if let Some(endpoint) = trigger {
                self.emit_done(endpoint, None);
            }
        }
        self.pending.borrow_mut().rescan = false;
    }

    /// Returns `true` if a link was requested for `endpoint`
    fn handle_endpoint(&self, endpoint: &Endpoint) -> bool {
        let Some(rule) = self.rules.match_endpoint(endpoint) else {
            return false;
        };
        let Some(target_rule) = rule.target.as_ref() else {
            debug!(endpoint = endpoint.name(), rule = %rule.name, "rule has no target");
            return false;
        };

        let query = TargetQuery {
            media_class: target_rule.endpoint.media_class.clone(),
            role: endpoint.role().map(str::to_string),
            stream: target_rule.stream.clone(),
            matcher: Some(target_rule.endpoint.clone()),
        };
        let Some(target) = self.find_target(&query) else {
            info!(endpoint = endpoint.name(), rule = %rule.name, "target not found");
            return false;
        };
        if target.endpoint == *endpoint {
            return false;
        }

        if !self.can_link_stream(&target.endpoint, &rule) {
            debug!(
                endpoint = endpoint.name(),
                target = target.endpoint.name(),
                "linked stream has precedence"
            );
            return false;
        }

        self.link_endpoint_with_target(endpoint, &target, &rule)
    }

    fn find_target(&self, query: &TargetQuery) -> Option<Target> {
        let manager = self.manager.borrow().upgrade();
        match manager {
            Some(manager) => manager.find_target(query),
            None => self.resolve_target(query),
        }
    }

    /// Stream arbitration on a target that may already be linked
    fn can_link_stream(&self, target: &Endpoint, rule: &LinkRule) -> bool {
        let Some(target_rule) = rule.target.as_ref() else {
            return true;
        };
        let Some(group_name) = target_rule.streams.as_deref() else {
            return true;
        };
        let links = target.links();
        let Some(link) = links.first() else {
            return true;
        };

        let linked_stream = if target.is_capture() {
            link.sink_stream()
        } else {
            link.source_stream()
        };

        // Same stream as requested: allowed, the newest request wins
        if let Some(stream) = target_rule.stream.as_deref() {
            if linked_stream.is_some() && linked_stream == target.find_stream(stream) {
                return true;
            }
        }

        let Some(linked_name) = linked_stream.and_then(|id| target.stream_name(id)) else {
            return true;
        };
        let linked = self.rules.stream_priority(group_name, linked_name);
        let requested = target_rule
            .stream
            .as_deref()
            .and_then(|s| self.rules.stream_priority(group_name, s));

        match (linked, requested) {
            (Some(linked), Some(requested)) if linked == requested => {
                self.settings.equal_priority == EqualPriority::PreferIncoming
            }
            (Some(linked), Some(requested)) => linked < requested,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Returns `true` if a link-create request was issued
    fn link_endpoint_with_target(&self, endpoint: &Endpoint, target: &Target, rule: &LinkRule) -> bool {
        let is_capture = endpoint.is_capture();

        // An endpoint is linked to at most one target
        if let Some(link) = endpoint.links().first() {
            let existing = if is_capture { link.source() } else { link.sink() };
            if *existing == target.endpoint {
                debug!(
                    endpoint = endpoint.name(),
                    target = target.endpoint.name(),
                    "already linked correctly"
                );
                return false;
            }
            debug!(endpoint = endpoint.name(), old = existing.name(), "moving to a new target");
            self.remote.destroy_link(link);
        }

        {
            let mut pending = self.pending.borrow_mut();
            if pending.target.as_ref() == Some(&target.endpoint) {
                debug!(
                    endpoint = endpoint.name(),
                    target = target.endpoint.name(),
                    "target has a link attempt in flight"
                );
                return false;
            }
            pending.target = Some(target.endpoint.clone());
        }

        // Playback takes over the target, except for links that must stay
        if !is_capture {
            for link in target.endpoint.links().iter().filter(|l| !l.keep()) {
                self.remote.destroy_link(link);
            }
        }

        let request = if is_capture {
            LinkRequest {
                source: target.endpoint.clone(),
                source_stream: target.stream,
                sink: endpoint.clone(),
                sink_stream: None,
                keep: rule.keep,
            }
        } else {
            LinkRequest {
                source: endpoint.clone(),
                source_stream: None,
                sink: target.endpoint.clone(),
                sink_stream: target.stream,
                keep: rule.keep,
            }
        };

        let me = self.me.clone();
        let requester = endpoint.clone();
        self.remote.create_link(
            request,
            Box::new(move |result| {
                if let Some(policy) = me.upgrade() {
                    policy.on_link_created(&requester, result);
                }
            }),
        );
        true
    }

    fn on_link_created(&self, requester: &Endpoint, result: Result<EndpointLink>) {
        self.pending.borrow_mut().target = None;

        let link = match result {
            Ok(link) => {
                info!(
                    source = link.source().name(),
                    sink = link.sink().name(),
                    "endpoints linked"
                );
                link
            }
            Err(e) => {
                warn!(endpoint = requester.name(), error = %e, "could not link endpoint");
                let is_trigger = self.pending.borrow().endpoint.as_ref() == Some(requester);
                if is_trigger {
                    let trigger = self.pending.borrow_mut().endpoint.take();
                    if let Some(endpoint) = trigger {
                        self.emit_done(endpoint, None);
                    }
                }
                return;
            }
        };

        let trigger = self.pending.borrow().endpoint.clone();
        if let Some(trigger) = trigger {
            let client = if trigger.is_capture() { link.sink() } else { link.source() };
            if *client == trigger {
                self.pending.borrow_mut().endpoint = None;
                self.emit_done(trigger, Some(link));
            }
        }
    }

    fn emit_done(&self, endpoint: Endpoint, link: Option<EndpointLink>) {
        debug!(endpoint = endpoint.name(), linked = link.is_some(), "rescan done");
        self.done.emit(&LinkDone { endpoint, link });
    }
}

impl Policy for ConfigPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rank(&self) -> u32 {
        RANK_UPSTREAM
    }

    fn attached(&self, manager: &Rc<PolicyManager>) {
        *self.manager.borrow_mut() = Rc::downgrade(manager);
    }

    fn detached(&self) {
        *self.manager.borrow_mut() = Weak::new();
    }

    fn object_added(&self, endpoint: &Endpoint) {
        self.rescan(endpoint);
    }

    fn object_removed(&self, endpoint: &Endpoint) {
        self.rescan(endpoint);
    }

    /// First endpoint of the requested media class the matcher accepts
    fn resolve_target(&self, query: &TargetQuery) -> Option<Target> {
        let media_class = query.media_class.as_deref()?;
        let filter = ObjectFilter::any().with_media_class(media_class);
        let endpoint = self
            .collection
            .list(&filter)
            .into_iter()
            .find(|candidate| query.matcher.as_ref().map_or(true, |m| m.matches(candidate)))?;

        let stream = query
            .role
            .as_deref()
            .and_then(|role| endpoint.find_stream(role))
            .or_else(|| query.stream.as_deref().and_then(|s| endpoint.find_stream(s)));
        Some(Target { endpoint, stream })
    }
}

impl std::fmt::Debug for ConfigPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.pending.borrow();
        f.debug_struct("ConfigPolicy")
            .field("pending_rescan", &pending.rescan)
            .field("pending_endpoint", &pending.endpoint.as_ref().map(|e| e.name().to_string()))
            .field("pending_target", &pending.target.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}
