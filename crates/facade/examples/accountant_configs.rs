use dplib::{
    AccountantConfig, AccountingMethod, CdpAccountantConfig, ComposeOptions,
    CoreAccountantConfig, Metadata, MomentAccountantConfig,
};
use tracing_subscriber::filter::LevelFilter;

fn main() -> dplib::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    let mut moments = MomentAccountantConfig::default().create_accountant()?;
    moments.add_gaussian_steps(1.1, 0.01, 1000)?;
    let (order, eps) = moments.best_order(1e-5)?;
    println!("RDP epsilon @1e-5: {eps:.4} (order {order})");

    let core = CoreAccountantConfig::bounded(3.0, 1e-5).with_name("release");
    let mut cdp = CdpAccountantConfig::new(core, AccountingMethod::Optimal).create_accountant()?;
    let composed = cdp.add_composed_event(
        vec![(0.1, 1e-7); 20],
        None,
        &ComposeOptions::new(),
        Some("twenty counting queries".to_string()),
        Metadata::new(),
    )?;
    println!("optimal composition of 20 queries: eps={:.4} delta={:e}", composed.epsilon, composed.delta);
    println!("remaining: {:?}", cdp.remaining());
    Ok(())
}
