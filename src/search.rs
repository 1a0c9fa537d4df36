//! `rag search`: run a query and print ranked chunks.

use anyhow::{bail, Result};

use rag_harness_core::models::SearchResponse;
use rag_harness_core::search::SearchStrategy;

use crate::config::Config;
use crate::engine::build_engine;

pub fn parse_strategy(s: &str) -> Result<SearchStrategy> {
    match s {
        "auto" => Ok(SearchStrategy::Auto),
        "vector" => Ok(SearchStrategy::Vector),
        "keyword" => Ok(SearchStrategy::Keyword),
        _ => bail!(
            "Unknown search strategy: {}. Use auto, vector, or keyword.",
            s
        ),
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    min_similarity: Option<f32>,
    strategy: &str,
) -> Result<()> {
    let strategy = parse_strategy(strategy)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let min_similarity = min_similarity.unwrap_or(config.retrieval.min_similarity);
    if top_k == 0 {
        bail!("--top-k must be >= 1");
    }

    let engine = build_engine(config)?;
    let response = engine
        .search_with(strategy, query, top_k, min_similarity)
        .await;
    print_response(&response);

    if !response.success {
        bail!(
            "search failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    println!("method: {}", response.method.as_str());

    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        let marker = if result.priority { " *" } else { "" };
        println!(
            "{}. [{:.3}] {} (chunk {}/{}){}",
            i + 1,
            result.boosted_similarity,
            result.filename,
            result.chunk_index + 1,
            result.total_chunks,
            marker
        );
        if result.boosted_similarity != result.similarity {
            println!("    raw similarity: {:.3}", result.similarity);
        }
        println!("    excerpt: \"{}\"", excerpt(&result.text, 160));
        println!();
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
