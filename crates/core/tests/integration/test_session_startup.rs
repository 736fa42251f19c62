//! End-to-end startup from a configuration file
//!
//! Loads a TOML configuration, brings the session up against an in-process
//! graph and checks that configured endpoints exist and that clients get
//! linked and activated.

use std::cell::RefCell;
use std::rc::Rc;

use remotemedia_session::startup::{self, ConfigSource};
use remotemedia_session::{
    Direction, EndpointDescriptor, Error, LinkState, RemoteConnection, Result, Session,
};

const CONFIG: &str = r#"
[[components]]
name = "config-policy"
type = "plugin"

[[components]]
name = "link-activation"
type = "plugin"

[[components]]
name = "static-endpoints"
type = "script"

[[rules]]
name = "playback"
[rules.match]
media_class = "Stream/Output/Audio"
[rules.target]
media_class = "Audio/Sink"
stream = "multimedia"

[[endpoints]]
name = "speakers"
media_class = "Audio/Sink"
direction = "input"
streams = ["multimedia", "navigation"]
"#;

fn start_from(text: &str) -> (Session, Rc<remotemedia_session::LocalGraph>, Option<Result<()>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.toml");
    std::fs::write(&path, text).unwrap();

    let (session, graph) = Session::local();
    let outcome = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);
    startup::start(session.clone(), ConfigSource::File(path), move |result| {
        *slot.borrow_mut() = Some(result);
    });
    session.main_loop().run_until_idle();

    let result = outcome.borrow_mut().take();
    (session, graph, result, dir)
}

/// Static endpoints are created and a new client is linked and activated
#[test]
fn test_startup_links_and_activates_clients() {
    let (session, graph, result, _dir) = start_from(CONFIG);
    assert!(matches!(result, Some(Ok(()))));
    assert!(graph.is_connected());

    let speakers = session.collection().find_by_name("speakers").unwrap();
    assert!(speakers.backing().is_some());

    let player = graph
        .add_endpoint(&EndpointDescriptor::new("player", "Stream/Output/Audio", Direction::Output))
        .unwrap();
    session.main_loop().run_until_idle();

    let links = graph.links();
    assert_eq!(links.len(), 1);
    assert!(links[0].connects(&player, &speakers));
    assert_eq!(links[0].sink_stream(), speakers.find_stream("multimedia"));
    assert_eq!(links[0].state(), LinkState::Active);
}

/// Shutting the session down removes the endpoints it created
#[test]
fn test_shutdown_destroys_static_endpoints() {
    let (session, _graph, result, _dir) = start_from(CONFIG);
    assert!(matches!(result, Some(Ok(()))));
    assert_eq!(session.collection().len(), 1);

    session.shutdown();
    session.main_loop().run_until_idle();

    assert!(session.collection().is_empty());
    assert!(session.plugins().is_empty());
    assert!(session.policies().policies().is_empty());
}

#[test]
fn test_invalid_configuration_fails_startup() {
    let (session, _graph, result, _dir) = start_from("[[components]]\nname = 3\n");
    let error = result.unwrap().unwrap_err();
    assert!(matches!(error, Error::Parse(_)));
    assert_eq!(error.exit_code(), 3);
    assert!(session.plugins().is_empty());
}
