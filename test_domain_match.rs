#![allow(clippy::uninlined_format_args)]

use phishscope::corpus::{DomainCorpus, SqliteCorpus};
use phishscope::domain_reputation::{normalize_domain, similarity_threshold, DomainMatcher};
use phishscope::domain_utils::DomainUtils;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let db_path = args
        .next()
        .unwrap_or_else(|| "data/wikidata_websites.db".to_string());
    let inputs: Vec<String> = args.collect();
    let inputs = if inputs.is_empty() {
        vec![
            "service@mail.paypal.com".to_string(),
            "alerts@paypa1.com".to_string(),
            "someone@gmail.com".to_string(),
            "news@natlonalge0graphlc.com".to_string(),
        ]
    } else {
        inputs
    };

    println!("Testing domain classification against {}", db_path);
    let corpus: Arc<dyn DomainCorpus> = Arc::new(SqliteCorpus::new(&db_path));
    corpus.check_available()?;
    let matcher = Arc::new(DomainMatcher::default());

    for input in inputs {
        let host = DomainUtils::extract_domain(&input).unwrap_or_else(|| input.clone());
        let domain = DomainUtils::registrable_domain(&host);
        let normalized = normalize_domain(&domain);

        println!("\n=== {} ===", input);
        println!("  Host: {}", host);
        println!("  Registrable domain: {}", domain);
        println!(
            "  Similarity threshold: {}",
            similarity_threshold(normalized.len())
        );

        let (result, elapsed) = Arc::clone(&matcher)
            .analyze(Arc::clone(&corpus), domain, host)
            .await;
        println!("  Status: {}", result.status);
        println!("  Message: {}", result.message);
        println!("  Matched: {}", result.matched_domain);
        println!("  Score impact: {}", result.score_impact);
        if let Some(error) = result.error {
            println!("  Error: {}", error);
        }
        println!("  Corpus read time: {:?}", elapsed);
    }

    Ok(())
}
