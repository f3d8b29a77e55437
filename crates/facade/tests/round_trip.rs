use std::cell::RefCell;
use std::rc::Rc;

use dplib::{BudgetAlert, BudgetTracker, EventRequest, ModelSpec, MomentAccountant, PrivacyAccountant};

#[test]
fn accountant_restores_folded_history() {
    let mut acc = PrivacyAccountant::bounded(4.0, 1e-4)
        .unwrap()
        .with_name("queries");
    acc.add_event(0.5, 1e-6).unwrap();
    acc.record(
        EventRequest::new(0.1, 0.0)
            .with_description("zcdp release")
            .with_model_spec(ModelSpec::zcdp(0.05).unwrap())
            .with_target_delta(Some(1e-6)),
    )
    .unwrap();

    let restored = PrivacyAccountant::deserialize(&acc.serialize().unwrap()).unwrap();
    assert_eq!(restored.name(), "queries");
    assert_eq!(restored.spent(), acc.spent());
    assert_eq!(restored.remaining(), acc.remaining());
    assert_eq!(restored.events(), acc.events());
    assert!(restored.events()[1].metadata().contains_key("privacy"));
}

#[test]
fn moment_accountant_restores_curve() {
    let mut acc = MomentAccountant::new();
    acc.add_gaussian_steps(1.1, 0.01, 100).unwrap();
    let restored = MomentAccountant::deserialize(&acc.serialize().unwrap()).unwrap();
    assert_eq!(restored.rdp(), acc.rdp());
    assert_eq!(
        restored.get_epsilon(1e-5).unwrap(),
        acc.get_epsilon(1e-5).unwrap()
    );
}

#[test]
fn tracker_restores_fired_thresholds() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&fired);
    let mut tracker = BudgetTracker::new()
        .with_alert_handler(move |alert| sink.borrow_mut().push(alert.threshold));
    let scope = tracker.register_scope("dataset", "census", 1.0, 0.0, 1e-12).unwrap();
    tracker.spend(&scope, 0.6, 0.0).unwrap();
    assert_eq!(*fired.borrow(), vec![0.5]);

    let snapshot = tracker.serialize().unwrap();
    let refired = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&refired);
    let mut restored = BudgetTracker::deserialize(
        &snapshot,
        Some(Box::new(move |alert: &BudgetAlert| sink.borrow_mut().push(alert.threshold))),
    )
    .unwrap();
    assert_eq!(restored.alerts(), tracker.alerts());

    restored.spend(&scope, 0.1, 0.0).unwrap();
    assert!(refired.borrow().is_empty());
    restored.spend(&scope, 0.15, 0.0).unwrap();
    assert_eq!(*refired.borrow(), vec![0.8]);
}
