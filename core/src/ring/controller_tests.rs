//! Tests for the ring controller
//!
//! Covers idempotent attach, leak-free teardown, viewport eviction with
//! dismissal callbacks, realignment triggers and label feedback timing.

use std::cell::RefCell;
use std::rc::Rc;

use postshot_types::Settings;

use super::{OVERLAY_LAYER_ID, RingAction, RingConfig, RingController, RingError, RingHandle, RingOutcome};
use crate::dom::{Document, NodeId, NodeSpec, PageSpec, Selector};
use crate::geometry::{Rect, Viewport};

struct Page {
    doc: Document,
    first: NodeId,
    second: NodeId,
    third: NodeId,
}

fn article(id: &str, top: f64) -> NodeSpec {
    NodeSpec::new("article")
        .attr("id", id)
        .rect(top, 0.0, 540.0, 300.0)
        .child(NodeSpec::new("p").text(id))
}

/// Three items: two visible in a 600px viewport, one below the fold.
/// The second carries a "keep reading" control.
fn page() -> Page {
    let spec = PageSpec {
        viewport: Viewport {
            width: 800.0,
            height: 600.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        },
        body: vec![
            NodeSpec::new("div").attr("id", "root").child(
                NodeSpec::new("div")
                    .attr("id", "base-container")
                    .child(article("a1", 0.0))
                    .child(
                        article("a2", 320.0).child(
                            NodeSpec::new("button")
                                .attr("aria-label", "Keep reading")
                                .text("Keep reading"),
                        ),
                    )
                    .child(article("a3", 900.0)),
            ),
        ],
    };
    let doc = spec.build().unwrap();
    let first = doc.find_by_id("a1").unwrap();
    let second = doc.find_by_id("a2").unwrap();
    let third = doc.find_by_id("a3").unwrap();
    Page {
        doc,
        first,
        second,
        third,
    }
}

fn controller() -> RingController {
    RingController::new(RingConfig::from_settings(&Settings::default()).unwrap())
}

fn ring_surfaces(doc: &Document) -> usize {
    let sel = Selector::parse(".ts-ring-selector").unwrap();
    doc.query_all(doc.root(), &sel).len()
}

/// Deliver everything queued on the document to the controller
fn pump(rings: &mut RingController, doc: &mut Document) -> Vec<RingHandle> {
    let notices = doc.take_notices();
    rings.handle_notices(doc, &notices)
}

fn append_marker(doc: &mut Document, parent: NodeId, tag: &str, class: &str) -> NodeId {
    let node = doc.create_element(tag);
    doc.set_attribute(node, "class", class).unwrap();
    doc.append_child(parent, node).unwrap();
    node
}

#[test]
fn attaching_twice_yields_one_ring() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();

    let a = rings.attach(&mut doc, first).unwrap();
    let b = rings.attach(&mut doc, first).unwrap();

    assert_eq!(a, b);
    assert_eq!(rings.len(), 1);
    assert_eq!(ring_surfaces(&doc), 1);
    assert_eq!(rings.stats().attached, 1);
    assert_eq!(doc.observer_count(), 4);
}

#[test]
fn repeated_attach_detach_leaves_no_observers() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();

    for _ in 0..5 {
        let handle = rings.attach(&mut doc, first).unwrap();
        rings.invoke(&mut doc, handle, RingAction::Select, 0).unwrap();
        pump(&mut rings, &mut doc);
        assert!(rings.detach(&mut doc, handle));
    }

    assert_eq!(doc.observer_count(), 0);
    assert_eq!(ring_surfaces(&doc), 0);
    assert!(doc.find_by_id(OVERLAY_LAYER_ID).is_none());
    assert!(rings.next_deadline().is_none());

    // Geometry churn after the last detach must not reach any ring
    let before = rings.stats().realignments;
    doc.set_layout(first, Some(Rect::new(40.0, 0.0, 500.0, 280.0)))
        .unwrap();
    let container = doc.find_by_id("base-container").unwrap();
    append_marker(&mut doc, container, "div", "late");
    doc.resize_viewport(1024.0, 700.0);

    let notices = doc.take_notices();
    assert!(notices.is_empty());
    rings.handle_notices(&mut doc, &notices);
    assert_eq!(rings.stats().realignments, before);
}

#[test]
fn leaving_viewport_evicts_and_fires_dismissals_once_in_order() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();

    let fired: Rc<RefCell<Vec<(u8, RingHandle)>>> = Rc::default();
    for tag in [1u8, 2] {
        let fired = Rc::clone(&fired);
        rings
            .on_dismiss(handle, move |h| fired.borrow_mut().push((tag, h)))
            .unwrap();
    }

    // Initial intersection notice keeps the ring
    assert!(pump(&mut rings, &mut doc).is_empty());
    assert!(rings.get(handle).is_some());

    doc.scroll_to(0.0, 400.0);
    assert_eq!(pump(&mut rings, &mut doc), vec![handle]);
    assert_eq!(*fired.borrow(), vec![(1, handle), (2, handle)]);
    assert!(rings.get(handle).is_none());
    assert_eq!(doc.observer_count(), 0);
    assert_eq!(ring_surfaces(&doc), 0);
    assert_eq!(rings.stats().evictions, 1);

    // Nothing fires a second time
    doc.scroll_to(0.0, 0.0);
    doc.scroll_to(0.0, 900.0);
    assert!(pump(&mut rings, &mut doc).is_empty());
    assert!(!rings.detach(&mut doc, handle));
    assert_eq!(fired.borrow().len(), 2);
}

#[test]
fn dismiss_registration_requires_live_ring() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    rings.detach(&mut doc, handle);
    assert_eq!(
        rings.on_dismiss(handle, |_| {}),
        Err(RingError::UnknownRing(handle))
    );
}

#[test]
fn realigns_on_mutation_and_resize_coalescing_bursts() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    pump(&mut rings, &mut doc);
    assert_eq!(rings.stats().realignments, 0);
    assert_eq!(
        rings.get(handle).unwrap().position(),
        Some(Rect::new(0.0, 0.0, 540.0, 300.0))
    );

    // Moving without resizing is silent until the page mutates
    doc.set_layout(first, Some(Rect::new(50.0, 0.0, 540.0, 300.0)))
        .unwrap();
    doc.scroll_to(0.0, 20.0);
    let container = doc.find_by_id("base-container").unwrap();
    append_marker(&mut doc, container, "div", "a");
    append_marker(&mut doc, container, "div", "b");
    append_marker(&mut doc, container, "div", "c");
    pump(&mut rings, &mut doc);

    assert_eq!(rings.stats().realignments, 1);
    let ring = rings.get(handle).unwrap();
    assert_eq!(ring.position(), Some(Rect::new(50.0, 0.0, 540.0, 300.0)));
    assert_eq!(doc.layout_rect(ring.surface()), ring.position());

    doc.resize_viewport(1024.0, 700.0);
    pump(&mut rings, &mut doc);
    assert_eq!(rings.stats().realignments, 2);
}

#[test]
fn realigns_when_only_the_tracked_element_resizes() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    pump(&mut rings, &mut doc);

    // An image finishing its load grows the item without touching the tree
    doc.set_layout(first, Some(Rect::new(0.0, 0.0, 540.0, 500.0)))
        .unwrap();
    pump(&mut rings, &mut doc);

    assert_eq!(rings.stats().realignments, 1);
    let ring = rings.get(handle).unwrap();
    assert_eq!(ring.position(), doc.layout_rect(first));
    assert_eq!(doc.layout_rect(ring.surface()), ring.position());
}

#[test]
fn notices_for_foreign_observers_are_ignored() {
    let Page {
        mut doc, first, third, ..
    } = page();
    let mut rings = controller();
    rings.attach(&mut doc, first).unwrap();
    pump(&mut rings, &mut doc);

    let _foreign = doc.observe_intersection(third);
    let evicted = pump(&mut rings, &mut doc);
    assert!(evicted.is_empty());
    assert_eq!(rings.len(), 1);
}

#[test]
fn falls_back_to_document_root_without_mutation_root() {
    let spec = PageSpec {
        viewport: Viewport::default(),
        body: vec![article("solo", 0.0)],
    };
    let mut doc = spec.build().unwrap();
    let item = doc.find_by_id("solo").unwrap();
    let mut rings = controller();
    rings.attach(&mut doc, item).unwrap();
    pump(&mut rings, &mut doc);

    let before = rings.stats().realignments;
    append_marker(&mut doc, item, "span", "x");
    pump(&mut rings, &mut doc);
    assert!(rings.stats().realignments > before);
}

#[test]
fn feedback_label_reverts_once_after_last_invocation() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();

    for now in [0, 300, 600] {
        let outcome = rings.invoke(&mut doc, handle, RingAction::Select, now).unwrap();
        assert_eq!(outcome, RingOutcome::Selected(first));
    }
    let button = rings
        .get(handle)
        .unwrap()
        .affordance(RingAction::Select)
        .unwrap()
        .node();
    assert_eq!(doc.text_content(button), "Selected!");

    // 750ms after the first invocation: nothing yet
    assert_eq!(rings.tick(&mut doc, 750), 0);
    assert_eq!(rings.tick(&mut doc, 1349), 0);
    assert_eq!(rings.tick(&mut doc, 1350), 1);
    assert_eq!(rings.tick(&mut doc, 10_000), 0);

    assert_eq!(doc.text_content(button), "Select");
    assert_eq!(rings.stats().reversions, 1);
}

#[test]
fn detaching_cancels_pending_feedback() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    rings
        .invoke(&mut doc, handle, RingAction::CopyMarkup, 0)
        .unwrap();
    rings.detach(&mut doc, handle);
    assert_eq!(rings.tick(&mut doc, 10_000), 0);
}

#[test]
fn copy_returns_outer_markup() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    let outcome = rings
        .invoke(&mut doc, handle, RingAction::CopyMarkup, 0)
        .unwrap();
    assert_eq!(
        outcome,
        RingOutcome::CopyMarkup("<article id=\"a1\"><p>a1</p></article>".to_string())
    );
    let ring = rings.get(handle).unwrap();
    assert_eq!(
        ring.affordance(RingAction::CopyMarkup).unwrap().label,
        "Copied HTML!"
    );
}

#[test]
fn open_replies_show_close_button_and_block_select() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    pump(&mut rings, &mut doc);
    assert!(!rings.get(handle).unwrap().is_available(RingAction::CloseReplies));

    let notes = append_marker(&mut doc, first, "div", "ePsyd");
    pump(&mut rings, &mut doc);

    let ring = rings.get(handle).unwrap();
    assert!(ring.is_available(RingAction::CloseReplies));
    assert!(!ring.is_available(RingAction::Select));
    let select_button = ring.affordance(RingAction::Select).unwrap().node();
    assert_eq!(doc.attribute(select_button, "disabled"), Some(""));
    assert_eq!(
        rings.invoke(&mut doc, handle, RingAction::Select, 0),
        Err(RingError::Disabled(RingAction::Select))
    );

    let outcome = rings
        .invoke(&mut doc, handle, RingAction::CloseReplies, 0)
        .unwrap();
    assert_eq!(outcome, RingOutcome::Activated(notes));
    assert_eq!(doc.take_activations(), vec![notes]);

    let ring = rings.get(handle).unwrap();
    assert!(ring.is_available(RingAction::Select));
    assert!(ring.is_available(RingAction::CopyMarkup));
    assert!(!ring.is_available(RingAction::CloseReplies));
    assert_eq!(doc.attribute(select_button, "disabled"), None);

    // The page closes the panel in response to the click
    doc.remove(notes).unwrap();
    pump(&mut rings, &mut doc);
    let ring = rings.get(handle).unwrap();
    assert!(!ring.is_available(RingAction::CloseReplies));
    assert!(ring.is_available(RingAction::Select));
}

#[test]
fn expand_activates_truncation_and_disappears() {
    let Page {
        mut doc,
        first,
        second,
        ..
    } = page();
    let mut rings = controller();
    let plain = rings.attach(&mut doc, first).unwrap();
    let truncated = rings.attach(&mut doc, second).unwrap();

    assert!(rings.get(plain).unwrap().affordance(RingAction::ExpandContent).is_none());
    let expand = rings
        .get(truncated)
        .unwrap()
        .affordance(RingAction::ExpandContent)
        .unwrap()
        .node();

    let keep_reading = doc
        .query(second, &Selector::parse("[aria-label=\"Keep reading\"]").unwrap())
        .unwrap();
    assert_eq!(
        rings.invoke(&mut doc, truncated, RingAction::ExpandContent, 0),
        Ok(RingOutcome::Activated(keep_reading))
    );
    assert!(!doc.is_connected(expand));
    assert_eq!(
        rings.invoke(&mut doc, truncated, RingAction::ExpandContent, 0),
        Err(RingError::Unavailable(RingAction::ExpandContent))
    );
}

#[test]
fn close_action_detaches_ring() {
    let Page { mut doc, first, .. } = page();
    let mut rings = controller();
    let handle = rings.attach(&mut doc, first).unwrap();
    assert_eq!(
        rings.invoke(&mut doc, handle, RingAction::Close, 0),
        Ok(RingOutcome::Closed)
    );
    assert!(rings.is_empty());
    assert_eq!(doc.observer_count(), 0);
    assert_eq!(
        rings.invoke(&mut doc, handle, RingAction::Select, 0),
        Err(RingError::UnknownRing(handle))
    );
}

#[test]
fn detach_all_clears_every_ring() {
    let Page {
        mut doc,
        first,
        second,
        ..
    } = page();
    let mut rings = controller();
    rings.attach(&mut doc, first).unwrap();
    rings.attach(&mut doc, second).unwrap();
    assert_eq!(ring_surfaces(&doc), 2);

    assert_eq!(rings.detach_all(&mut doc), 2);
    assert_eq!(ring_surfaces(&doc), 0);
    assert_eq!(doc.observer_count(), 0);
    assert!(rings.handle_for(first).is_none());
}

#[test]
fn action_names_parse() {
    assert_eq!("select".parse::<RingAction>(), Ok(RingAction::Select));
    assert_eq!("copy".parse::<RingAction>(), Ok(RingAction::CopyMarkup));
    assert!("nope".parse::<RingAction>().is_err());
}
