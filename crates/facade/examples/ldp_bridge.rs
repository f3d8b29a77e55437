use dplib::{
    AccountingMethod, CdpPrivacyAccountant, LdpPrivacyAccountant, LocalPrivacyUsage, Metadata,
};
use serde_json::json;
use tracing_subscriber::filter::LevelFilter;

fn main() -> dplib::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    let central = CdpPrivacyAccountant::bounded(2.0, 1e-5, AccountingMethod::Basic)?;
    let mut local = LdpPrivacyAccountant::new()
        .with_per_user_limit(1.0)?
        .with_cdp_accountant(central);

    let mut metadata = Metadata::new();
    metadata.insert("mechanism".into(), json!("grr"));
    metadata.insert("mechanism_params".into(), json!({"domain_size": 16}));
    for (round, user) in ["alice", "bob", "alice"].into_iter().enumerate() {
        let usage = LocalPrivacyUsage::for_user(user, 0.5)
            .with_round(round as u64)
            .with_metadata(metadata.clone());
        local.add_usage(&usage)?;
    }

    let summary = local.summarize();
    println!("local total: {:.2}, worst user: {:.2}", summary.total_epsilon, summary.max_user_epsilon);
    if let Some(central) = local.cdp_accountant() {
        println!("central spend: {}", central.spent());
        for event in central.events() {
            println!("  {}", event.metadata()["ldp_context"]);
        }
    }
    Ok(())
}
