//! The process-wide node, in its own test binary so it starts in a fresh process.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use dstack::{EventCategory, Error, Handler};

#[test]
fn process_wide_node() {
    assert!(matches!(
        dstack::send(&"0".repeat(40), 16, b"payload"),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        dstack::get_local_node_key(),
        Err(Error::NotInitialized)
    ));

    // Handlers can be set before the node is started.
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    dstack::set_deliver_handler(move |key, type_code, payload| {
        sink.lock()
            .unwrap()
            .push((key.to_string(), type_code, payload.to_vec()));
        Ok(())
    })
    .unwrap();

    dstack::initialize(9001, None).unwrap();

    let key = dstack::get_local_node_key().unwrap();
    assert!(!key.is_empty());

    dstack::send(&key, 16, b"payload").unwrap();

    let start = Instant::now();
    while delivered.lock().unwrap().is_empty() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out");
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(
        delivered.lock().unwrap().as_slice(),
        &[(key, 16, b"payload".to_vec())]
    );

    assert!(matches!(
        dstack::initialize(9002, None),
        Err(Error::AlreadyInitialized)
    ));

    assert!(matches!(
        dstack::set_forward_handler(|_, _, _, _| Ok(())),
        Err(Error::NotImplemented(EventCategory::Forward))
    ));
    assert!(matches!(
        dstack::global::set_handler(EventCategory::Deliver, Handler::update(|_, _, _| Ok(()))),
        Err(Error::NotCallable(EventCategory::Deliver))
    ));

    assert!(matches!(
        dstack::send("xyz", 16, b"payload"),
        Err(Error::InvalidKey(_))
    ));
}
