//! `ragdesk classify` — Show the routing decision for a query.

use std::path::Path;

use ragdesk_agent::DomainClassifier;

pub fn run(config_path: Option<&Path>, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let classifier = DomainClassifier::from_config(&config);

    let decision = classifier.classify(query, &[]);
    println!("{}", serde_json::to_string_pretty(&decision)?);

    println!();
    println!("Confidence by domain:");
    for (domain, confidence) in classifier.confidences(query, &[]) {
        let marker = if decision.active_domains().contains(&domain) {
            "*"
        } else {
            " "
        };
        println!(" {marker} {:<16} {confidence:.3}", domain.as_str());
    }
    println!(
        "   (threshold {:.2}, mixed within {:.2})",
        config.classifier.min_confidence, config.classifier.mixed_epsilon
    );

    Ok(())
}
