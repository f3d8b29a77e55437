use dplib::{BudgetScheduler, BudgetTracker};
use tracing_subscriber::filter::LevelFilter;

fn main() -> dplib::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .init();

    let scheduler = BudgetScheduler::new(3.0, 3e-5)?;
    let shares = scheduler.allocate_proportional([("survey", 2.0), ("logs", 1.0)])?;

    let mut tracker = BudgetTracker::new()
        .with_alert_handler(|alert| println!("alert: {}", alert.message));
    for (task, share) in &shares {
        tracker.register_scope("task", task, share.epsilon, share.delta, 1e-12)?;
    }
    for scope in tracker.scopes().to_vec() {
        for _ in 0..4 {
            if let Err(err) = tracker.spend(&scope, 0.45, 1e-6) {
                println!("{scope}: {err}");
                break;
            }
        }
        println!("{scope}: remaining {:?}", tracker.remaining(&scope)?);
    }
    Ok(())
}
