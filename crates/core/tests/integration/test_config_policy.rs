//! Integration tests for rule-driven link arbitration
//!
//! Each test runs a `ConfigPolicy` registered in a `PolicyManager` against
//! an in-process graph and drives the main loop by hand.

use std::cell::RefCell;
use std::rc::Rc;

use remotemedia_session::config::{EqualPriority, PolicySettings};
use remotemedia_session::policy::{LinkDone, Target, TargetQuery, RANK_VENDOR};
use remotemedia_session::remote::RemoteConnection;
use remotemedia_session::rules::{EndpointMatch, LinkRule, RuleSet, StreamGroup, TargetMatch};
use remotemedia_session::{
    ConfigPolicy, Direction, Endpoint, EndpointDescriptor, LocalGraph, MainLoop, ObjectCollection,
    Policy, PolicyManager,
};

struct Fixture {
    main_loop: MainLoop,
    graph: Rc<LocalGraph>,
    policy: Rc<ConfigPolicy>,
    manager: Rc<PolicyManager>,
    done: Rc<RefCell<Vec<LinkDone>>>,
}

impl Fixture {
    fn new(rules: RuleSet, settings: PolicySettings) -> Self {
        let main_loop = MainLoop::new();
        let collection = ObjectCollection::new();
        let graph = LocalGraph::new(&main_loop, &collection);
        graph.connect(Box::new(|_| {}));
        main_loop.run_until_idle();

        let manager = PolicyManager::new(&collection);
        let policy = ConfigPolicy::new(graph.clone(), collection, Rc::new(rules), settings);
        manager.register(policy.clone());

        let done = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&done);
        policy.connect_done(move |event| sink.borrow_mut().push(event.clone()));

        Self {
            main_loop,
            graph,
            policy,
            manager,
            done,
        }
    }

    fn add(&self, descriptor: EndpointDescriptor) -> Endpoint {
        let endpoint = self.graph.add_endpoint(&descriptor).unwrap();
        self.main_loop.run_until_idle();
        endpoint
    }

    fn last_done(&self) -> LinkDone {
        self.done.borrow().last().cloned().unwrap()
    }
}

fn sink(name: &str, streams: &[&str]) -> EndpointDescriptor {
    EndpointDescriptor::new(name, "Audio/Sink", Direction::Input).with_streams(streams.iter().copied())
}

fn client(name: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(name, "Stream/Output/Audio", Direction::Output)
}

fn to_sink(name: &str) -> LinkRule {
    LinkRule::new(name, EndpointMatch::new().with_name(name.parse().unwrap()))
        .with_target(TargetMatch::new(EndpointMatch::new().with_media_class("Audio/Sink")))
}

fn to_stream(name: &str, stream: &str) -> LinkRule {
    LinkRule::new(name, EndpointMatch::new().with_name(name.parse().unwrap())).with_target(
        TargetMatch::new(EndpointMatch::new().with_media_class("Audio/Sink"))
            .with_stream(stream)
            .with_stream_group("default"),
    )
}

fn stream_rules(x: u32, y: u32) -> RuleSet {
    RuleSet::new(
        [to_stream("client-x", "x"), to_stream("client-y", "y")],
        [StreamGroup::new("default").with_stream("x", x).with_stream("y", y)],
    )
}

/// Target present first, then the client: the client's own rescan links it
/// and reports the link
#[test]
fn test_client_linked_to_matching_target() {
    let rules = RuleSet::new(
        [LinkRule::new("a-to-b", EndpointMatch::new().with_media_class("A"))
            .with_priority(5)
            .with_target(TargetMatch::new(EndpointMatch::new().with_media_class("B")))],
        [],
    );
    let f = Fixture::new(rules, PolicySettings::default());

    let b = f.add(EndpointDescriptor::new("b", "B", Direction::Input));
    assert_eq!(f.last_done().endpoint, b);
    assert!(f.last_done().link.is_none());

    let a = f.add(EndpointDescriptor::new("a", "A", Direction::Output));
    let done = f.last_done();
    assert_eq!(done.endpoint, a);
    let link = done.link.unwrap();
    assert!(link.connects(&a, &b));
    assert_eq!(f.done.borrow().len(), 2);
    assert!(f.policy.pending_target().is_none());
    assert!(!f.policy.has_pending_rescan());
}

/// A rescan caused by an unrelated endpoint leaves a correct link alone
#[test]
fn test_unrelated_rescan_keeps_existing_link() {
    let f = Fixture::new(RuleSet::new([to_sink("player")], []), PolicySettings::default());
    f.add(sink("speakers", &[]));
    let player = f.add(client("player"));
    let link = f.last_done().link.unwrap();
    let requests = f.graph.link_requests();

    let other = f.add(EndpointDescriptor::new("mic", "Audio/Source", Direction::Output));

    let done = f.last_done();
    assert_eq!(done.endpoint, other);
    assert!(done.link.is_none());
    assert_eq!(f.graph.link_requests(), requests);
    assert_eq!(f.graph.links(), vec![link.clone()]);
    assert_eq!(player.links(), vec![link]);
}

/// A higher priority stream takes the target over
#[test]
fn test_higher_priority_stream_replaces_link() {
    let f = Fixture::new(stream_rules(3, 7), PolicySettings::default());
    let speakers = f.add(sink("speakers", &["x", "y"]));

    let x = f.add(client("client-x"));
    let first = f.last_done().link.unwrap();
    assert_eq!(first.sink_stream(), Some(0));

    let y = f.add(client("client-y"));
    let done = f.last_done();
    assert_eq!(done.endpoint, y);
    let link = done.link.unwrap();
    assert!(link.connects(&y, &speakers));
    assert_eq!(link.sink_stream(), speakers.find_stream("y"));

    assert!(!x.is_linked());
    assert_eq!(f.graph.links(), vec![link]);
}

/// A lower priority stream is refused while the target is taken
#[test]
fn test_lower_priority_stream_is_refused() {
    let f = Fixture::new(stream_rules(7, 3), PolicySettings::default());
    f.add(sink("speakers", &["x", "y"]));
    let x = f.add(client("client-x"));
    let link = f.last_done().link.unwrap();

    let y = f.add(client("client-y"));
    let done = f.last_done();
    assert_eq!(done.endpoint, y);
    assert!(done.link.is_none());
    assert!(!y.is_linked());
    assert_eq!(x.links(), vec![link]);
}

#[test]
fn test_equal_priority_keeps_existing_by_default() {
    let f = Fixture::new(stream_rules(5, 5), PolicySettings::default());
    f.add(sink("speakers", &["x", "y"]));
    let x = f.add(client("client-x"));
    let y = f.add(client("client-y"));

    assert!(f.last_done().link.is_none());
    assert!(x.is_linked());
    assert!(!y.is_linked());
}

#[test]
fn test_equal_priority_can_prefer_incoming() {
    let settings = PolicySettings {
        equal_priority: EqualPriority::PreferIncoming,
    };
    let f = Fixture::new(stream_rules(5, 5), settings);
    f.add(sink("speakers", &["x", "y"]));
    let x = f.add(client("client-x"));
    let y = f.add(client("client-y"));

    assert_eq!(f.last_done().endpoint, y);
    assert!(f.last_done().link.is_some());
    assert!(!x.is_linked());
    assert!(y.is_linked());
}

/// Two clients competing for one target in the same rescan: only one
/// link-create is issued
#[test]
fn test_one_link_attempt_per_target() {
    let rules = RuleSet::new([to_sink("player-*")], []);
    let f = Fixture::new(rules, PolicySettings::default());
    let speakers = f.add(sink("speakers", &[]));
    let requests = f.graph.link_requests();

    // Both appear before the loop runs, so one rescan sees both
    let first = f.graph.add_endpoint(&client("player-1")).unwrap();
    let second = f.graph.add_endpoint(&client("player-2")).unwrap();
    f.main_loop.run_until_idle();

    assert_eq!(f.graph.link_requests(), requests + 1);
    assert!(first.is_linked());
    assert!(!second.is_linked());
    assert_eq!(speakers.links().len(), 1);

    let done = f.last_done();
    assert_eq!(done.endpoint, first);
    assert!(done.link.is_some());
}

/// A failed link-create is reported once and not retried
#[test]
fn test_link_failure_reported_without_retry() {
    let f = Fixture::new(RuleSet::new([to_sink("player")], []), PolicySettings::default());
    f.add(sink("speakers", &[]));
    let events = f.done.borrow().len();

    f.graph.fail_next_link("no compatible ports");
    let player = f.add(client("player"));

    assert_eq!(f.done.borrow().len(), events + 1);
    let done = f.last_done();
    assert_eq!(done.endpoint, player);
    assert!(done.link.is_none());
    assert!(f.policy.pending_target().is_none());
    assert!(f.graph.links().is_empty());
    assert_eq!(f.graph.link_requests(), 1);
}

/// Removing a linked client drops its link and still reports the trigger
#[test]
fn test_removed_client_reports_done() {
    let f = Fixture::new(RuleSet::new([to_sink("player")], []), PolicySettings::default());
    let speakers = f.add(sink("speakers", &[]));
    let player = f.add(client("player"));
    assert!(player.is_linked());

    f.graph.remove_endpoint(&player);
    f.main_loop.run_until_idle();

    let done = f.last_done();
    assert_eq!(done.endpoint, player);
    assert!(done.link.is_none());
    assert!(!speakers.is_linked());
    assert!(f.graph.links().is_empty());
}

/// The endpoint's role selects the target stream before the rule's stream
#[test]
fn test_role_selects_target_stream() {
    let rules = RuleSet::new(
        [LinkRule::new("player", EndpointMatch::new().with_name("player".parse().unwrap()))
            .with_target(
                TargetMatch::new(EndpointMatch::new().with_media_class("Audio/Sink"))
                    .with_stream("multimedia"),
            )],
        [],
    );
    let f = Fixture::new(rules, PolicySettings::default());
    let speakers = f.add(sink("speakers", &["multimedia", "navigation"]));
    f.add(client("player").with_role("navigation"));

    let link = f.last_done().link.unwrap();
    assert_eq!(link.sink_stream(), speakers.find_stream("navigation"));
}

/// A trigger arriving while the previous trigger's link is in flight is
/// dropped: it is not queued and gets no `done`
#[test]
fn test_trigger_during_link_in_flight_is_dropped() {
    let f = Fixture::new(RuleSet::new([to_sink("player")], []), PolicySettings::default());
    f.add(sink("speakers", &[]));
    let mic = f.add(EndpointDescriptor::new("mic", "Audio/Source", Direction::Output));
    let events = f.done.borrow().len();

    let player = f.graph.add_endpoint(&client("player")).unwrap();
    for _ in 0..100 {
        if f.policy.pending_target().is_some() {
            break;
        }
        assert!(f.main_loop.dispatch_one());
    }
    assert!(f.policy.pending_target().is_some());

    f.policy.object_added(&mic);
    assert!(!f.policy.has_pending_rescan());
    f.main_loop.run_until_idle();

    let done = f.done.borrow();
    assert_eq!(done.len(), events + 1);
    assert_eq!(done[events].endpoint, player);
    assert!(done[events].link.is_some());
    assert_eq!(f.graph.link_requests(), 1);
}

/// A capture client is the sink of its link, fed by the target source
#[test]
fn test_capture_client_linked_as_sink() {
    let rules = RuleSet::new(
        [LinkRule::new("rec", EndpointMatch::new().with_name("rec".parse().unwrap()))
            .with_target(TargetMatch::new(EndpointMatch::new().with_media_class("Audio/Source")))],
        [],
    );
    let f = Fixture::new(rules, PolicySettings::default());
    let mic = f.add(EndpointDescriptor::new("mic", "Audio/Source", Direction::Output));
    let rec = f.add(EndpointDescriptor::new("rec", "Stream/Input/Audio", Direction::Input));

    let done = f.last_done();
    assert_eq!(done.endpoint, rec);
    let link = done.link.unwrap();
    assert!(link.connects(&mic, &rec));
    assert!(!link.connects(&rec, &mic));
    assert_eq!(rec.links(), vec![link.clone()]);
    assert_eq!(mic.links(), vec![link]);
}

/// Playback taking over a target tears down its links except those marked
/// `keep`
#[test]
fn test_kept_link_survives_playback_takeover() {
    let kept = RuleSet::new([to_sink("monitor").with_keep(true), to_sink("player")], []);
    let f = Fixture::new(kept, PolicySettings::default());
    let speakers = f.add(sink("speakers", &[]));
    let monitor = f.add(client("monitor"));
    let player = f.add(client("player"));

    assert!(monitor.is_linked());
    assert!(monitor.links()[0].keep());
    assert!(player.is_linked());
    assert_eq!(speakers.links().len(), 2);

    let plain = RuleSet::new([to_sink("monitor"), to_sink("player")], []);
    let f = Fixture::new(plain, PolicySettings::default());
    let speakers = f.add(sink("speakers", &[]));
    let monitor = f.add(client("monitor"));
    let player = f.add(client("player"));

    assert!(!monitor.is_linked());
    assert!(player.is_linked());
    assert_eq!(speakers.links().len(), 1);
}

/// Answers every target query with a fixed endpoint once one is set
struct Preferred {
    target: RefCell<Option<Endpoint>>,
}

impl Policy for Preferred {
    fn name(&self) -> &str {
        "preferred"
    }

    fn rank(&self) -> u32 {
        RANK_VENDOR
    }

    fn resolve_target(&self, _query: &TargetQuery) -> Option<Target> {
        self.target.borrow().clone().map(|endpoint| Target {
            endpoint,
            stream: None,
        })
    }
}

/// An endpoint linked elsewhere is unlinked before moving to its new target
#[test]
fn test_moving_to_new_target_tears_down_old_link() {
    let f = Fixture::new(RuleSet::new([to_sink("player")], []), PolicySettings::default());
    let preferred = Rc::new(Preferred {
        target: RefCell::new(None),
    });
    f.manager.register(preferred.clone());

    let speakers = f.add(sink("speakers", &[]));
    let player = f.add(client("player"));
    assert!(f.last_done().link.unwrap().connects(&player, &speakers));

    let headset = f.graph.add_endpoint(&sink("headset", &[])).unwrap();
    *preferred.target.borrow_mut() = Some(headset.clone());
    f.main_loop.run_until_idle();

    assert!(!speakers.is_linked());
    assert_eq!(player.links().len(), 1);
    assert!(player.links()[0].connects(&player, &headset));
    assert_eq!(f.graph.links().len(), 1);
    assert_eq!(f.graph.link_requests(), 2);
}
